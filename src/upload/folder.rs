use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{UploadOutcome, Uploader, file_name};
use crate::error::{Result, UploadError};
use crate::helpers::join_destination;
use crate::progress::{FolderProgress, ProgressEvent, emit};
use crate::scanner::{IgnorePredicate, ScanResult, TransferCandidate, TransferStatus, scan};

/// Terminal outcome of one candidate
#[derive(Debug, Clone)]
pub struct FileResult {
    pub candidate: TransferCandidate,
    /// Present when the upload succeeded
    pub outcome: Option<UploadOutcome>,
}

/// Aggregate result of a folder upload
#[derive(Debug, Clone, Default)]
pub struct FolderSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_bytes: u64,
    /// Bytes of successfully uploaded files
    pub uploaded_bytes: u64,
    /// In completion order, not scan order
    pub results: Vec<FileResult>,
}

impl FolderSummary {
    fn progress(&self) -> FolderProgress {
        FolderProgress {
            processed: self.succeeded + self.failed,
            total: self.total,
            bytes_done: self.uploaded_bytes,
            bytes_total: self.total_bytes,
        }
    }
}

impl Uploader {
    /// Upload every file under `root` to `destination`.
    ///
    /// Each file lands under `destination` joined with its directory relative
    /// to `root`. At most `file_concurrency` files are in flight; a slot is
    /// refilled as soon as any file finishes. A failing file never cancels
    /// its siblings. When any file fails the call returns
    /// [`UploadError::FolderFailed`], which still carries the full summary.
    pub async fn upload_folder(
        &self,
        root: &Path,
        destination: &str,
        ignore: Arc<dyn IgnorePredicate>,
    ) -> Result<FolderSummary> {
        let scan_root = root.to_path_buf();
        let denied = self.config.denied_extensions.clone();
        let scanned = tokio::task::spawn_blocking(move || scan(&scan_root, ignore.as_ref(), &denied))
            .await
            .map_err(|e| UploadError::Scan {
                path: root.display().to_string(),
                message: e.to_string(),
            })??;

        self.upload_candidates(scanned, destination).await
    }

    /// Upload a file or a directory tree.
    ///
    /// A single file goes straight to `destination` and is reported as a
    /// one-entry summary.
    pub async fn upload_path(
        &self,
        path: &Path,
        destination: &str,
        ignore: Arc<dyn IgnorePredicate>,
    ) -> Result<FolderSummary> {
        if path.is_dir() {
            return self.upload_folder(path, destination, ignore).await;
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::from_io_error(e, &path.display().to_string()))?;
        let size = metadata.len();
        let scanned = ScanResult {
            candidates: vec![TransferCandidate::new(
                path.to_path_buf(),
                file_name(path)?,
                size,
            )],
            total_bytes: size,
        };
        self.upload_candidates(scanned, destination).await
    }

    async fn upload_candidates(
        &self,
        scanned: ScanResult,
        destination: &str,
    ) -> Result<FolderSummary> {
        let ScanResult {
            mut candidates,
            total_bytes,
        } = scanned;
        let total = candidates.len();
        let mut summary = FolderSummary {
            total,
            total_bytes,
            ..Default::default()
        };

        if total == 0 {
            info!("No files to upload");
            return Ok(summary);
        }

        emit(&self.progress, ProgressEvent::Folder(summary.progress()));

        let width = self.config.file_concurrency.max(1);
        info!(
            "Uploading {} files ({} bytes) with {} workers",
            total, total_bytes, width
        );

        // Only this loop touches `candidates` and `summary`; tasks hand back
        // their index and result.
        let mut in_flight: JoinSet<(usize, Result<UploadOutcome>)> = JoinSet::new();
        let mut cursor = 0;
        loop {
            while in_flight.len() < width && cursor < total && !self.cancel.is_cancelled() {
                let candidate = &candidates[cursor];
                let uploader = self.clone();
                let path = candidate.path.clone();
                let size = candidate.size;
                let dest = join_destination(destination, candidate.relative_dir());
                let index = cursor;
                in_flight.spawn(async move {
                    let result = uploader.upload_file(&path, size, &dest).await;
                    (index, result)
                });
                cursor += 1;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((index, result)) => self.record(&mut summary, &mut candidates[index], result),
                Err(e) => error!("Upload task failed to complete: {}", e),
            }
        }

        // Candidates never dispatched (cancellation) or lost to a panicked task
        for (index, candidate) in candidates.iter_mut().enumerate() {
            if candidate.status() != TransferStatus::Pending {
                continue;
            }
            let err = if index >= cursor {
                UploadError::Cancelled
            } else {
                UploadError::Io(std::io::Error::other("upload task did not complete"))
            };
            self.record(&mut summary, candidate, Err(err));
        }

        info!(
            "Folder upload finished: {} uploaded, {} failed",
            summary.succeeded, summary.failed
        );

        if summary.failed > 0 {
            return Err(UploadError::FolderFailed {
                failed: summary.failed,
                total: summary.total,
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }

    fn record(
        &self,
        summary: &mut FolderSummary,
        candidate: &mut TransferCandidate,
        result: Result<UploadOutcome>,
    ) {
        let outcome = match result {
            Ok(outcome) => {
                if candidate.finish(Ok(())) {
                    summary.succeeded += 1;
                    summary.uploaded_bytes += candidate.size;
                }
                Some(outcome)
            }
            Err(e) => {
                match &e {
                    UploadError::Cancelled => {
                        warn!("Skipped {}: {}", candidate.relative_path, e)
                    }
                    _ => error!("Upload failed for {}: {}", candidate.relative_path, e),
                }
                if candidate.finish(Err(e.to_string())) {
                    summary.failed += 1;
                }
                None
            }
        };

        summary.results.push(FileResult {
            candidate: candidate.clone(),
            outcome,
        });
        emit(&self.progress, ProgressEvent::Folder(summary.progress()));
    }
}
