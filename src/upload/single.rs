use std::path::Path;

use tracing::{debug, info, warn};

use super::{UploadOutcome, Uploader, file_name};
use crate::api::{ConfirmSingleUpload, PutBody, SingleUploadRequest, UploadTarget};
use crate::checksum::checksum_file;
use crate::error::{Result, UploadError};
use crate::helpers::{detect_content_type, is_denied_extension};

impl Uploader {
    /// Upload a file that fits in one storage request.
    ///
    /// Only the authorization request is retried. A storage rejection or a
    /// failed confirmation is terminal for the file.
    pub async fn upload_single(
        &self,
        path: &Path,
        size: u64,
        destination: &str,
    ) -> Result<UploadOutcome> {
        let shown = path.display().to_string();
        if is_denied_extension(path, &self.config.denied_extensions) {
            return Err(UploadError::DisallowedType { path: shown });
        }

        let name = file_name(path)?;
        let checksum = checksum_file(path, self.config.read_buffer_size).await?;
        let mime_type = detect_content_type(path);

        let request = SingleUploadRequest {
            name: name.clone(),
            collection_id: self.collection_id.clone(),
            size,
            checksum: checksum.clone(),
            mime_type: mime_type.clone(),
            dest_path: destination.to_string(),
        };
        let authorization = self
            .retry
            .run("presign", |_| self.control.request_single_upload_url(&request))
            .await?;
        debug!(
            "Authorized {} as {} via {}",
            shown,
            authorization.storage_key,
            authorization.target.url()
        );

        let response = {
            let _permit = self.transfer_permit().await;
            match &authorization.target {
                UploadTarget::FormUpload { url, fields } => {
                    self.storage
                        .post_form(url, fields, path, &name, size, &mime_type)
                        .await?
                }
                UploadTarget::DirectPut { url } => {
                    self.storage
                        .put(
                            url,
                            PutBody::File {
                                path: path.to_path_buf(),
                                size,
                            },
                            &mime_type,
                        )
                        .await?
                }
            }
        };

        if response.etag.is_none() {
            warn!("Storage returned no ETag for {}", shown);
        }

        self.control
            .confirm_single_upload(&ConfirmSingleUpload {
                storage_key: authorization.storage_key.clone(),
                name,
                collection_id: self.collection_id.clone(),
                size,
                checksum,
                mime_type,
                dest_path: destination.to_string(),
                etag: response.etag.clone(),
            })
            .await?;

        info!(
            "Uploaded {} -> {} ({} bytes)",
            shown, authorization.storage_key, size
        );

        Ok(UploadOutcome {
            key: authorization.storage_key,
            location: None,
            etag: response.etag,
            size,
            multipart: false,
        })
    }
}
