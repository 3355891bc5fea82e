//! Upload files and directory trees to object storage through presigned URLs.
//!
//! A control-plane API hands out upload authorizations; bytes go straight to
//! storage. Small files use one request, large files a multipart session
//! whose parts upload concurrently and are retried independently.

pub mod api;
pub mod checksum;
pub mod config;
pub mod error;
pub mod helpers;
pub mod progress;
pub mod retry;
pub mod scanner;
pub mod upload;

pub use api::{ControlPlane, DataPlane, HttpControlPlane, HttpStorage};
pub use config::{Config, TransferConfig};
pub use error::{Result, UploadError};
pub use progress::{FolderProgress, ProgressCallback, ProgressEvent};
pub use retry::RetryPolicy;
pub use scanner::{
    GlobIgnore, IgnorePredicate, NoIgnore, ScanResult, TransferCandidate, TransferStatus, scan,
};
pub use upload::{FileResult, FolderSummary, UploadOutcome, Uploader};
