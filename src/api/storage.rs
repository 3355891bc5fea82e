use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap};
use reqwest::{Body, multipart};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{Result, UploadError};

/// Body of a storage PUT
#[derive(Debug, Clone)]
pub enum PutBody {
    Bytes(Bytes),
    /// Streamed from disk, never held in memory as a whole
    File { path: PathBuf, size: u64 },
}

impl PutBody {
    pub fn len(&self) -> u64 {
        match self {
            Self::Bytes(data) => data.len() as u64,
            Self::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Successful storage response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResponse {
    pub status: u16,
    pub etag: Option<String>,
}

/// Direct writes to presigned storage URLs. Non-2xx responses are errors.
#[async_trait]
pub trait DataPlane: Send + Sync {
    async fn put(&self, url: &str, body: PutBody, content_type: &str) -> Result<StorageResponse>;

    async fn post_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
        file: &Path,
        file_name: &str,
        size: u64,
        content_type: &str,
    ) -> Result<StorageResponse>;
}

/// Read the ETag header with surrounding quotes stripped
pub fn extract_etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// reqwest-backed storage client. No request timeout: large bodies may take
/// arbitrarily long.
#[derive(Clone)]
pub struct HttpStorage {
    client: reqwest::Client,
}

impl HttpStorage {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().use_rustls_tls().build()?;
        Ok(Self { client })
    }

    async fn file_body(path: &Path) -> Result<Body> {
        let file = File::open(path)
            .await
            .map_err(|e| UploadError::from_io_error(e, &path.display().to_string()))?;
        Ok(Body::wrap_stream(ReaderStream::new(file)))
    }

    async fn finish(response: reqwest::Response) -> Result<StorageResponse> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UploadError::Storage {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(StorageResponse {
            status: status.as_u16(),
            etag: extract_etag(response.headers()),
        })
    }
}

#[async_trait]
impl DataPlane for HttpStorage {
    async fn put(&self, url: &str, body: PutBody, content_type: &str) -> Result<StorageResponse> {
        let length = body.len();
        debug!("PUT {} bytes to storage", length);

        let body = match body {
            PutBody::Bytes(data) => Body::from(data),
            PutBody::File { path, .. } => Self::file_body(&path).await?,
        };

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;

        Self::finish(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
        file: &Path,
        file_name: &str,
        size: u64,
        content_type: &str,
    ) -> Result<StorageResponse> {
        debug!("POST form with {} fields and {} bytes", fields.len(), size);

        let part = multipart::Part::stream_with_length(Self::file_body(file).await?, size)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| UploadError::Config(format!("invalid content type: {}", e)))?;

        // Storage requires the file to be the last form field
        let form = fields
            .iter()
            .fold(multipart::Form::new(), |form, (key, value)| {
                form.text(key.clone(), value.clone())
            })
            .part("file", part);

        let response = self.client.post(url).multipart(form).send().await?;
        Self::finish(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_extract_etag_strips_quotes() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"9b2cf535f27731c974343645a3985328\""));
        assert_eq!(
            extract_etag(&headers).as_deref(),
            Some("9b2cf535f27731c974343645a3985328")
        );
    }

    #[test]
    fn test_extract_etag_absent_or_empty() {
        assert_eq!(extract_etag(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"\""));
        assert_eq!(extract_etag(&headers), None);
    }

    #[test]
    fn test_put_body_len() {
        assert_eq!(PutBody::Bytes(Bytes::from_static(b"abc")).len(), 3);
        let body = PutBody::File {
            path: PathBuf::from("/tmp/x"),
            size: 0,
        };
        assert!(body.is_empty());
    }
}
