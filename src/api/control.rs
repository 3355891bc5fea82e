use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, UploadError};

/// Request for a single-request upload authorization
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SingleUploadRequest {
    pub name: String,
    pub collection_id: String,
    pub size: u64,
    pub checksum: String,
    pub mime_type: String,
    pub dest_path: String,
}

/// Where and how storage expects the bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// Multipart form POST: fields first, then the file
    FormUpload {
        url: String,
        fields: BTreeMap<String, String>,
    },
    /// Plain PUT of the file body
    DirectPut { url: String },
}

impl UploadTarget {
    pub fn url(&self) -> &str {
        match self {
            Self::FormUpload { url, .. } | Self::DirectPut { url } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAuthorization {
    pub storage_key: String,
    pub target: UploadTarget,
}

/// Wire shape of the presign response; `fields` is only present for form uploads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub url: String,
    #[serde(alias = "storageKey")]
    pub key: String,
    #[serde(default)]
    pub fields: Option<BTreeMap<String, String>>,
}

impl PresignResponse {
    /// Resolve the response shape once into a tagged target
    pub fn into_authorization(self) -> UploadAuthorization {
        let target = match self.fields {
            Some(fields) if !fields.is_empty() => UploadTarget::FormUpload {
                url: self.url,
                fields,
            },
            _ => UploadTarget::DirectPut { url: self.url },
        };
        UploadAuthorization {
            storage_key: self.key,
            target,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSingleUpload {
    #[serde(rename = "key")]
    pub storage_key: String,
    pub name: String,
    pub collection_id: String,
    pub size: u64,
    pub checksum: String,
    pub mime_type: String,
    pub dest_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartMultipartRequest {
    pub name: String,
    pub collection_id: String,
    pub dest_path: String,
    pub mime_type: String,
    pub checksum: String,
}

/// Identifiers of a freshly started multipart session
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MultipartSessionInfo {
    #[serde(alias = "uploadId")]
    pub session_id: String,
    #[serde(rename = "key", alias = "storageKey")]
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlRequest {
    pub session_id: String,
    pub part_number: u32,
    #[serde(rename = "key")]
    pub storage_key: String,
    pub collection_id: String,
    pub checksum: String,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
struct PartUrlResponse {
    url: String,
}

/// One finished part as the completion call expects it
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Checksum")]
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub session_id: String,
    #[serde(rename = "key")]
    pub storage_key: String,
    pub name: String,
    pub collection_id: String,
    pub checksum: String,
    pub size: u64,
    pub dest_path: String,
    /// Sorted by part number
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AbortMultipartRequest {
    pub session_id: String,
    #[serde(rename = "key")]
    pub storage_key: String,
    pub name: String,
    pub collection_id: String,
}

/// Remote service that authorizes uploads and coordinates multipart sessions
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn request_single_upload_url(
        &self,
        request: &SingleUploadRequest,
    ) -> Result<UploadAuthorization>;

    async fn confirm_single_upload(&self, request: &ConfirmSingleUpload) -> Result<()>;

    async fn start_multipart(&self, request: &StartMultipartRequest)
    -> Result<MultipartSessionInfo>;

    /// Returns the presigned URL for one part
    async fn request_part_url(&self, request: &PartUrlRequest) -> Result<String>;

    /// Returns the final object location
    async fn complete_multipart(&self, request: &CompleteMultipartRequest) -> Result<String>;

    async fn abort_multipart(&self, request: &AbortMultipartRequest) -> Result<()>;
}

/// JSON-over-HTTP control-plane client
#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    collection_id: String,
}

impl HttpControlPlane {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.transfer.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            collection_id: config.collection_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/collections/{}/{}",
            self.base_url, self.collection_id, path
        )
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        debug!("POST {} ({})", url, operation);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(UploadError::control(operation, Some(status.as_u16()), text));
        }
        Ok(response)
    }

    async fn call<B, R>(&self, operation: &'static str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(operation, path, body).await?;
        let status = response.status().as_u16();
        response.json().await.map_err(|e| {
            UploadError::control(operation, Some(status), format!("invalid response: {}", e))
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn request_single_upload_url(
        &self,
        request: &SingleUploadRequest,
    ) -> Result<UploadAuthorization> {
        let response: PresignResponse = self.call("presign", "uploads/presign", request).await?;
        Ok(response.into_authorization())
    }

    async fn confirm_single_upload(&self, request: &ConfirmSingleUpload) -> Result<()> {
        self.send("confirm", "uploads/confirm", request).await?;
        Ok(())
    }

    async fn start_multipart(
        &self,
        request: &StartMultipartRequest,
    ) -> Result<MultipartSessionInfo> {
        let session: MultipartSessionInfo = self.call("start", "multipart/start", request).await?;
        if session.session_id.is_empty() || session.storage_key.is_empty() {
            return Err(UploadError::control(
                "start",
                None,
                "response carried no session id or key",
            ));
        }
        Ok(session)
    }

    async fn request_part_url(&self, request: &PartUrlRequest) -> Result<String> {
        let response: PartUrlResponse =
            self.call("part-url", "multipart/part-url", request).await?;
        Ok(response.url)
    }

    async fn complete_multipart(&self, request: &CompleteMultipartRequest) -> Result<String> {
        let response: CompleteResponse =
            self.call("complete", "multipart/complete", request).await?;
        match response.location {
            Some(location) if !location.is_empty() => Ok(location),
            _ => Err(UploadError::control(
                "complete",
                None,
                "response carried no location",
            )),
        }
    }

    async fn abort_multipart(&self, request: &AbortMultipartRequest) -> Result<()> {
        self.send("abort", "multipart/abort", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presign_with_fields_is_form_upload() {
        let response: PresignResponse = serde_json::from_value(json!({
            "url": "https://bucket.example.com/",
            "key": "col/docs/a.txt",
            "fields": {"policy": "p", "x-amz-signature": "s"}
        }))
        .unwrap();

        let auth = response.into_authorization();
        assert_eq!(auth.storage_key, "col/docs/a.txt");
        match auth.target {
            UploadTarget::FormUpload { url, fields } => {
                assert_eq!(url, "https://bucket.example.com/");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("expected form upload, got {other:?}"),
        }
    }

    #[test]
    fn test_presign_without_fields_is_direct_put() {
        for body in [
            json!({"url": "https://u", "storageKey": "k"}),
            json!({"url": "https://u", "key": "k", "fields": {}}),
            json!({"url": "https://u", "key": "k", "fields": null}),
        ] {
            let response: PresignResponse = serde_json::from_value(body).unwrap();
            let auth = response.into_authorization();
            assert_eq!(
                auth.target,
                UploadTarget::DirectPut {
                    url: "https://u".into()
                }
            );
            assert_eq!(auth.target.url(), "https://u");
        }
    }

    #[test]
    fn test_complete_request_wire_shape() {
        let request = CompleteMultipartRequest {
            session_id: "sess".into(),
            storage_key: "key".into(),
            name: "big.bin".into(),
            collection_id: "col".into(),
            checksum: "sum".into(),
            size: 42,
            dest_path: "data".into(),
            parts: vec![CompletedPart {
                part_number: 1,
                etag: "e1".into(),
                checksum: "c1".into(),
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sessionId"], "sess");
        assert_eq!(value["key"], "key");
        assert_eq!(value["destPath"], "data");
        assert_eq!(value["parts"][0]["PartNumber"], 1);
        assert_eq!(value["parts"][0]["ETag"], "e1");
        assert_eq!(value["parts"][0]["Checksum"], "c1");
    }

    #[test]
    fn test_session_info_aliases() {
        let info: MultipartSessionInfo =
            serde_json::from_value(json!({"uploadId": "u1", "key": "k1"})).unwrap();
        assert_eq!(info.session_id, "u1");
        assert_eq!(info.storage_key, "k1");
    }

    #[test]
    fn test_confirm_omits_missing_etag() {
        let request = ConfirmSingleUpload {
            storage_key: "k".into(),
            name: "a".into(),
            collection_id: "c".into(),
            size: 1,
            checksum: "s".into(),
            mime_type: "text/plain".into(),
            dest_path: String::new(),
            etag: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("etag").is_none());
        assert_eq!(value["mimeType"], "text/plain");
    }

    #[test]
    fn test_endpoint_layout() {
        let config = Config::from_lookup(|key| match key {
            "UPLOAD_API_URL" => Some("https://api.example.com/v1/".to_string()),
            "UPLOAD_COLLECTION_ID" => Some("col-9".to_string()),
            _ => None,
        })
        .unwrap();
        let client = HttpControlPlane::new(&config).unwrap();
        assert_eq!(
            client.endpoint("multipart/start"),
            "https://api.example.com/v1/collections/col-9/multipart/start"
        );
    }
}
