//! In-memory control-plane and storage doubles for orchestration tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    AbortMultipartRequest, CompleteMultipartRequest, ConfirmSingleUpload, ControlPlane, DataPlane,
    MultipartSessionInfo, PartUrlRequest, PutBody, SingleUploadRequest, StartMultipartRequest,
    StorageResponse, UploadAuthorization, UploadTarget,
};
use crate::error::{Result, UploadError};
use crate::helpers::join_destination;

#[derive(Debug, Clone)]
pub enum Call {
    Presign(SingleUploadRequest),
    Confirm(ConfirmSingleUpload),
    Start(StartMultipartRequest),
    PartUrl(PartUrlRequest),
    Complete(CompleteMultipartRequest),
    Abort(AbortMultipartRequest),
}

/// Tracks how many operations overlap
#[derive(Debug, Default)]
pub struct Gauge {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockControl {
    pub form_upload: bool,
    /// Presign always fails for these file names
    pub fail_names: Vec<String>,
    /// Presign answers with this status for every file
    pub reject_status: Option<u16>,
    pub fail_confirm: bool,
    pub fail_start: bool,
    pub fail_complete: bool,
    pub fail_abort: bool,
    /// Pause inside presign/start so file tasks overlap
    pub delay: Duration,
    pub(crate) presign_failures: AtomicU32,
    pub(crate) sessions: AtomicUsize,
    pub(crate) calls: Mutex<Vec<Call>>,
    /// Files between presign/start and confirm/complete/abort
    pub files: Gauge,
}

impl MockControl {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Make the next `n` presign calls fail
    pub fn fail_next_presigns(&self, n: u32) {
        self.presign_failures.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn key(&self, collection_id: &str, destination: &str, name: &str) -> String {
        format!(
            "{}/{}",
            collection_id,
            join_destination(destination, name)
        )
    }
}

#[async_trait]
impl ControlPlane for MockControl {
    async fn request_single_upload_url(
        &self,
        request: &SingleUploadRequest,
    ) -> Result<UploadAuthorization> {
        self.record(Call::Presign(request.clone()));
        if let Some(status) = self.reject_status {
            return Err(UploadError::control("presign", Some(status), "rejected"));
        }
        if self.fail_names.contains(&request.name) {
            return Err(UploadError::control("presign", Some(503), "unavailable"));
        }
        let remaining = self.presign_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.presign_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(UploadError::control("presign", Some(502), "bad gateway"));
        }

        self.files.enter();
        tokio::time::sleep(self.delay).await;

        let key = self.key(&request.collection_id, &request.dest_path, &request.name);
        let url = format!("https://storage.test/object/{}", key);
        let target = if self.form_upload {
            let mut fields = BTreeMap::new();
            fields.insert("key".to_string(), key.clone());
            fields.insert("policy".to_string(), "cG9saWN5".to_string());
            UploadTarget::FormUpload { url, fields }
        } else {
            UploadTarget::DirectPut { url }
        };
        Ok(UploadAuthorization {
            storage_key: key,
            target,
        })
    }

    async fn confirm_single_upload(&self, request: &ConfirmSingleUpload) -> Result<()> {
        self.record(Call::Confirm(request.clone()));
        self.files.leave();
        if self.fail_confirm {
            return Err(UploadError::control("confirm", Some(500), "database down"));
        }
        Ok(())
    }

    async fn start_multipart(
        &self,
        request: &StartMultipartRequest,
    ) -> Result<MultipartSessionInfo> {
        self.record(Call::Start(request.clone()));
        if self.fail_start {
            return Err(UploadError::control("start", Some(500), "no sessions left"));
        }
        self.files.enter();
        tokio::time::sleep(self.delay).await;

        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MultipartSessionInfo {
            session_id: format!("session-{}", id),
            storage_key: self.key(&request.collection_id, &request.dest_path, &request.name),
        })
    }

    async fn request_part_url(&self, request: &PartUrlRequest) -> Result<String> {
        self.record(Call::PartUrl(request.clone()));
        Ok(format!(
            "https://storage.test/{}/part/{}",
            request.session_id, request.part_number
        ))
    }

    async fn complete_multipart(&self, request: &CompleteMultipartRequest) -> Result<String> {
        self.record(Call::Complete(request.clone()));
        if self.fail_complete {
            // The abort that follows closes the gauge
            return Err(UploadError::control("complete", Some(500), "parts mismatch"));
        }
        self.files.leave();
        Ok(format!("https://storage.test/{}", request.storage_key))
    }

    async fn abort_multipart(&self, request: &AbortMultipartRequest) -> Result<()> {
        self.record(Call::Abort(request.clone()));
        self.files.leave();
        if self.fail_abort {
            return Err(UploadError::control("abort", Some(500), "abort failed"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum StorageCall {
    Put {
        url: String,
        len: u64,
        content_type: String,
    },
    Form {
        url: String,
        fields: BTreeMap<String, String>,
        file_name: String,
        len: u64,
    },
}

#[derive(Debug, Default)]
pub struct MockStorage {
    /// URLs containing any of these answer 500
    pub fail_matching: Vec<String>,
    /// URLs containing any of these succeed without an ETag
    pub no_etag_matching: Vec<String>,
    /// URLs containing any of these succeed with an empty ETag header
    pub empty_etag_matching: Vec<String>,
    /// Extra latency for matching URLs
    pub delay_matching: Vec<(String, Duration)>,
    pub delay: Duration,
    pub(crate) requests: Mutex<Vec<StorageCall>>,
    pub(crate) transfers: Gauge,
}

impl MockStorage {
    pub fn requests(&self) -> Vec<StorageCall> {
        self.requests.lock().unwrap().clone()
    }

    /// Most transfers observed in flight at once
    pub fn max_active(&self) -> usize {
        self.transfers.max()
    }

    async fn respond(&self, url: &str, call: StorageCall) -> Result<StorageResponse> {
        self.requests.lock().unwrap().push(call);
        self.transfers.enter();

        let extra = self
            .delay_matching
            .iter()
            .filter(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, delay)| *delay)
            .sum::<Duration>();
        tokio::time::sleep(self.delay + extra).await;
        self.transfers.leave();

        if self.fail_matching.iter().any(|p| url.contains(p.as_str())) {
            return Err(UploadError::Storage {
                status: 500,
                message: "InternalError".into(),
            });
        }
        let etag = if self.no_etag_matching.iter().any(|p| url.contains(p.as_str())) {
            None
        } else if self.empty_etag_matching.iter().any(|p| url.contains(p.as_str())) {
            Some(String::new())
        } else {
            Some(format!("etag-{}", url.rsplit('/').next().unwrap_or_default()))
        };
        Ok(StorageResponse { status: 200, etag })
    }
}

#[async_trait]
impl DataPlane for MockStorage {
    async fn put(&self, url: &str, body: PutBody, content_type: &str) -> Result<StorageResponse> {
        let call = StorageCall::Put {
            url: url.to_string(),
            len: body.len(),
            content_type: content_type.to_string(),
        };
        self.respond(url, call).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
        _file: &Path,
        file_name: &str,
        size: u64,
        _content_type: &str,
    ) -> Result<StorageResponse> {
        let call = StorageCall::Form {
            url: url.to_string(),
            fields: fields.clone(),
            file_name: file_name.to_string(),
            len: size,
        };
        self.respond(url, call).await
    }
}
