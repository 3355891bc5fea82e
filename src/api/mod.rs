pub mod control;
pub mod storage;

pub use control::{
    AbortMultipartRequest, CompleteMultipartRequest, CompletedPart, ConfirmSingleUpload,
    ControlPlane, HttpControlPlane, MultipartSessionInfo, PartUrlRequest, SingleUploadRequest,
    StartMultipartRequest, UploadAuthorization, UploadTarget,
};
pub use storage::{DataPlane, HttpStorage, PutBody, StorageResponse, extract_etag};
