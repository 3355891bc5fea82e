use std::path::Path;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tracing::{debug, info, warn};

use super::{UploadOutcome, Uploader, file_name};
use crate::api::{
    AbortMultipartRequest, CompleteMultipartRequest, CompletedPart, MultipartSessionInfo,
    PartUrlRequest, PutBody, StartMultipartRequest,
};
use crate::checksum::{checksum_bytes, checksum_file, checksum_range, read_range};
use crate::error::{Result, UploadError};
use crate::helpers::{detect_content_type, is_denied_extension};
use crate::progress::{ProgressEvent, emit};

/// Lifecycle of one multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Preparing,
    Initiated,
    PartsUploading,
    Completing,
    Completed,
    Aborting,
    Aborted,
}

/// One byte range of the file
#[derive(Debug, Clone)]
pub struct PartRecord {
    /// 1-based
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
    /// Loaded right before upload and dropped right after
    data: Option<Bytes>,
    pub checksum: String,
    pub etag: Option<String>,
    pub error: Option<String>,
    pub retries: u32,
}

impl PartRecord {
    fn new(part_number: u32, offset: u64, length: u64) -> Self {
        Self {
            part_number,
            offset,
            length,
            data: None,
            checksum: String::new(),
            etag: None,
            error: None,
            retries: 0,
        }
    }

    fn fail(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
        self.data = None;
    }
}

/// Backend-tracked state of one multipart upload
#[derive(Debug)]
pub struct UploadSession {
    pub session_id: String,
    pub storage_key: String,
    pub mime_type: String,
    pub checksum: String,
    pub parts: Vec<PartRecord>,
    state: SessionState,
}

impl UploadSession {
    fn new(info: MultipartSessionInfo, mime_type: String, checksum: String) -> Self {
        Self {
            session_id: info.session_id,
            storage_key: info.storage_key,
            mime_type,
            checksum,
            parts: Vec::new(),
            state: SessionState::Initiated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "Session {} {:?} -> {:?}",
            self.session_id, self.state, next
        );
        self.state = next;
    }

    /// Parts in ascending order for completion, or `None` if any lacks a non-empty ETag
    fn completed_parts(&self) -> Option<Vec<CompletedPart>> {
        let mut parts = self
            .parts
            .iter()
            .map(|part| {
                part.etag
                    .as_ref()
                    .filter(|etag| !etag.is_empty())
                    .map(|etag| CompletedPart {
                        part_number: part.part_number,
                        etag: etag.clone(),
                        checksum: part.checksum.clone(),
                    })
            })
            .collect::<Option<Vec<_>>>()?;
        parts.sort_by_key(|part| part.part_number);
        Some(parts)
    }
}

/// Number of parts needed for `size` bytes
pub fn part_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size.max(1))
}

/// Split `size` bytes into contiguous parts of `chunk_size`; only the last may be shorter
pub fn plan_parts(size: u64, chunk_size: u64) -> Vec<PartRecord> {
    let chunk_size = chunk_size.max(1);
    (0..part_count(size, chunk_size))
        .map(|index| {
            let offset = index * chunk_size;
            let length = chunk_size.min(size - offset);
            PartRecord::new(index as u32 + 1, offset, length)
        })
        .collect()
}

/// What every part of one file shares
struct PartContext<'a> {
    path: &'a Path,
    shown: &'a str,
    session_id: &'a str,
    storage_key: &'a str,
    mime_type: &'a str,
}

impl Uploader {
    /// Upload a large file through a multipart session.
    ///
    /// Once the session is started it always ends in either a completion or
    /// exactly one abort call. The error that caused the abort is the one
    /// returned; an abort failure is only logged.
    pub async fn upload_multipart(
        &self,
        path: &Path,
        size: u64,
        destination: &str,
    ) -> Result<UploadOutcome> {
        let shown = path.display().to_string();
        debug!("{} {:?}", shown, SessionState::Preparing);

        if is_denied_extension(path, &self.config.denied_extensions) {
            return Err(UploadError::DisallowedType { path: shown });
        }

        let chunk_size = self.config.effective_chunk_size();
        let parts = part_count(size, chunk_size);
        if parts > self.config.max_parts {
            return Err(UploadError::TooManyParts {
                size,
                parts,
                max: self.config.max_parts,
            });
        }

        let name = file_name(path)?;
        let checksum = checksum_file(path, self.config.read_buffer_size).await?;
        let mime_type = detect_content_type(path);

        info!(
            "Starting multipart upload for {} ({} bytes, {} parts)",
            shown, size, parts
        );

        // No retry here: a failed start leaves nothing to clean up
        let info = self
            .control
            .start_multipart(&StartMultipartRequest {
                name: name.clone(),
                collection_id: self.collection_id.clone(),
                dest_path: destination.to_string(),
                mime_type: mime_type.clone(),
                checksum: checksum.clone(),
            })
            .await?;

        let mut session = UploadSession::new(info, mime_type, checksum);
        debug!(
            "Multipart upload initiated with ID: {}",
            session.session_id
        );

        match self
            .drive_session(&mut session, path, &name, size, destination, chunk_size)
            .await
        {
            Ok(location) => {
                session.transition(SessionState::Completed);
                info!(
                    "Successfully completed multipart upload: {} -> {}",
                    shown, location
                );
                Ok(UploadOutcome {
                    key: session.storage_key,
                    location: Some(location),
                    etag: None,
                    size,
                    multipart: true,
                })
            }
            Err(err) => {
                warn!("Multipart upload of {} failed: {}", shown, err);
                self.abort_session(&mut session, &name).await;
                Err(err)
            }
        }
    }

    /// Everything between a successful start and a successful completion
    async fn drive_session(
        &self,
        session: &mut UploadSession,
        path: &Path,
        name: &str,
        size: u64,
        destination: &str,
        chunk_size: u64,
    ) -> Result<String> {
        // Read and checksum every part up front so unreadable ranges fail
        // before any bytes go out. Buffers are not kept.
        let mut parts = plan_parts(size, chunk_size);
        for part in parts.iter_mut() {
            let (_, checksum) = checksum_range(path, part.offset, part.length).await?;
            part.checksum = checksum;
        }

        session.transition(SessionState::PartsUploading);
        let shown = path.display().to_string();
        let ctx = PartContext {
            path,
            shown: &shown,
            session_id: &session.session_id,
            storage_key: &session.storage_key,
            mime_type: &session.mime_type,
        };

        // Every part runs its own retry budget; siblings are never cancelled
        // by one part's failure.
        let mut uploaded: Vec<PartRecord> = stream::iter(parts)
            .map(|part| self.upload_part(&ctx, part))
            .buffer_unordered(self.config.part_concurrency.max(1))
            .collect()
            .await;
        uploaded.sort_by_key(|part| part.part_number);
        session.parts = uploaded;

        let Some(completed) = session.completed_parts() else {
            let failed: Vec<_> = session
                .parts
                .iter()
                .filter(|part| part.etag.is_none())
                .collect();
            for part in &failed {
                warn!(
                    "Part {} of {} failed after {} retries: {}",
                    part.part_number,
                    shown,
                    part.retries,
                    part.error.as_deref().unwrap_or("no ETag")
                );
            }
            return Err(UploadError::IncompleteParts {
                failed: failed.len(),
                total: session.parts.len(),
            });
        };

        session.transition(SessionState::Completing);
        debug!(
            "All {} parts uploaded, completing multipart upload",
            completed.len()
        );

        self.control
            .complete_multipart(&CompleteMultipartRequest {
                session_id: session.session_id.clone(),
                storage_key: session.storage_key.clone(),
                name: name.to_string(),
                collection_id: self.collection_id.clone(),
                checksum: session.checksum.clone(),
                size,
                dest_path: destination.to_string(),
                parts: completed,
            })
            .await
    }

    /// Upload one part under the retry policy. Never fails as a whole: the
    /// outcome is recorded on the returned part.
    async fn upload_part(&self, ctx: &PartContext<'_>, mut part: PartRecord) -> PartRecord {
        if self.cancel.is_cancelled() {
            part.fail(UploadError::Cancelled);
            return part;
        }

        match read_range(ctx.path, part.offset, part.length).await {
            Ok(data) if checksum_bytes(&data) == part.checksum => part.data = Some(data),
            Ok(_) => {
                part.fail(UploadError::PartChanged {
                    part_number: part.part_number,
                });
                return part;
            }
            Err(err) => {
                part.fail(err);
                return part;
            }
        }

        let request = PartUrlRequest {
            session_id: ctx.session_id.to_string(),
            part_number: part.part_number,
            storage_key: ctx.storage_key.to_string(),
            collection_id: self.collection_id.clone(),
            checksum: part.checksum.clone(),
            mime_type: ctx.mime_type.to_string(),
        };
        let data = part.data.clone().unwrap_or_default();
        let part_number = part.part_number;
        let label = format!("part {} of {}", part_number, ctx.shown);
        let mut attempts = 0u32;

        let result = self
            .retry
            .run(&label, |attempt| {
                attempts = attempt + 1;
                let request = &request;
                let data = data.clone();
                async move {
                    let url = self.control.request_part_url(request).await?;
                    let _permit = self.transfer_permit().await;
                    let response = self
                        .storage
                        .put(&url, PutBody::Bytes(data), ctx.mime_type)
                        .await?;
                    response
                        .etag
                        .filter(|etag| !etag.is_empty())
                        .ok_or(UploadError::MissingEtag { part_number })
                }
            })
            .await;

        part.retries = attempts.saturating_sub(1);
        part.data = None;
        match result {
            Ok(etag) => {
                debug!("Uploaded part {} ({} bytes)", part_number, part.length);
                part.etag = Some(etag);
                emit(
                    &self.progress,
                    ProgressEvent::PartUploaded {
                        path: ctx.shown.to_string(),
                        part_number,
                        bytes: part.length,
                    },
                );
            }
            Err(err) => part.fail(err),
        }
        part
    }

    async fn abort_session(&self, session: &mut UploadSession, name: &str) {
        session.transition(SessionState::Aborting);
        let request = AbortMultipartRequest {
            session_id: session.session_id.clone(),
            storage_key: session.storage_key.clone(),
            name: name.to_string(),
            collection_id: self.collection_id.clone(),
        };
        match self.control.abort_multipart(&request).await {
            Ok(()) => debug!("Aborted multipart upload {}", session.session_id),
            Err(err) => warn!(
                "Failed to abort multipart upload {}: {}",
                session.session_id, err
            ),
        }
        session.transition(SessionState::Aborted);
    }
}
