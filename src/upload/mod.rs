//! Transfer orchestration: single-request uploads, multipart sessions and
//! folder-wide scheduling on top of the [`ControlPlane`] and [`DataPlane`]
//! collaborators.
//!
//! Two independent pools bound concurrency: the folder scheduler runs at most
//! `file_concurrency` files at once, and every multipart file runs at most
//! `part_concurrency` parts at once. Peak data-plane concurrency is therefore
//! `file_concurrency * part_concurrency`; set
//! [`TransferConfig::max_in_flight`] to cap it across all files.

mod folder;
mod multipart;
mod single;

#[cfg(test)]
pub(crate) mod mock;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ControlPlane, DataPlane};
use crate::config::TransferConfig;
use crate::error::{Result, UploadError};
use crate::progress::{ProgressCallback, ProgressEvent, emit};
use crate::retry::RetryPolicy;

pub use folder::{FileResult, FolderSummary};
pub use multipart::{PartRecord, SessionState, UploadSession, part_count, plan_parts};

/// Result of one successfully uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub key: String,
    /// Final object location (multipart only)
    pub location: Option<String>,
    pub etag: Option<String>,
    pub size: u64,
    pub multipart: bool,
}

/// Uploads files and folders. Cheap to clone; clones share collaborators,
/// the in-flight limiter and the cancellation token.
#[derive(Clone)]
pub struct Uploader {
    control: Arc<dyn ControlPlane>,
    storage: Arc<dyn DataPlane>,
    collection_id: String,
    config: Arc<TransferConfig>,
    retry: RetryPolicy,
    limiter: Option<Arc<Semaphore>>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        storage: Arc<dyn DataPlane>,
        collection_id: impl Into<String>,
        config: TransferConfig,
    ) -> Self {
        let limiter = config
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            control,
            storage,
            collection_id: collection_id.into(),
            retry: RetryPolicy::from_config(&config),
            config: Arc::new(config),
            limiter,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(self, callback: ProgressCallback) -> Self {
        Self {
            progress: Some(callback),
            ..self
        }
    }

    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    /// Token that stops new files and parts from being dispatched
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload one file, choosing single-request or multipart by size.
    ///
    /// A file exactly at the threshold is uploaded in a single request.
    pub async fn upload_file(
        &self,
        path: &Path,
        size: u64,
        destination: &str,
    ) -> Result<UploadOutcome> {
        let shown = path.display().to_string();
        let multipart = self.config.use_multipart(size);
        emit(
            &self.progress,
            ProgressEvent::FileStarted {
                path: shown.clone(),
                size,
                multipart,
            },
        );

        let result = if multipart {
            info!(
                "Using multipart upload for large file: {} ({} bytes)",
                shown, size
            );
            self.upload_multipart(path, size, destination).await
        } else {
            self.upload_single(path, size, destination).await
        };

        emit(
            &self.progress,
            ProgressEvent::FileFinished {
                path: shown,
                size,
                success: result.is_ok(),
            },
        );
        result
    }

    /// Permit for one data-plane transfer when a global ceiling is configured
    async fn transfer_permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            ))
        })
}
