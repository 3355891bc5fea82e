use thiserror::Error;

use crate::upload::FolderSummary;

/// Errors that can occur while uploading files or folders
#[derive(Error, Debug)]
pub enum UploadError {
    /// File not found on local filesystem
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Permission denied accessing local file
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    /// File extension is on the deny-list
    #[error("File type not allowed: {path}")]
    DisallowedType { path: String },

    /// File would need more parts than the storage backend accepts
    #[error("File too large: {size} bytes needs {parts} parts (max: {max})")]
    TooManyParts { size: u64, parts: u64, max: u64 },

    /// Directory walk failed
    #[error("Scan error at '{path}': {message}")]
    Scan { path: String, message: String },

    /// Control-plane call returned an error or an unusable response
    #[error("Control plane {operation} failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    ControlPlane {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Storage rejected a PUT/POST
    #[error("Storage rejected upload with status {status}: {message}")]
    Storage { status: u16, message: String },

    /// Transport-level failure talking to either plane
    #[error("Network error: {message}")]
    Network { message: String },

    /// Storage accepted a part but did not return an ETag
    #[error("Storage response for part {part_number} carried no ETag")]
    MissingEtag { part_number: u32 },

    /// Part bytes changed between preparation and upload
    #[error("Part {part_number} changed on disk since it was checksummed")]
    PartChanged { part_number: u32 },

    /// Some parts of a multipart session never got an ETag
    #[error("Multipart upload incomplete: {failed} of {total} parts failed")]
    IncompleteParts { failed: usize, total: usize },

    /// At least one file of a folder upload failed; the summary is still available
    #[error("{failed} of {total} files failed to upload")]
    FolderFailed {
        failed: usize,
        total: usize,
        summary: Box<FolderSummary>,
    },

    /// Work was not dispatched because cancellation was requested
    #[error("Upload cancelled")]
    Cancelled,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Create an error from an IO error with context
    pub fn from_io_error(error: std::io::Error, path: &str) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_string(),
            },
            _ => Self::Io(error),
        }
    }

    /// Create a control-plane error for the named operation
    pub fn control(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Local problems (missing files, denied types, bad config) and
    /// cancellation never get better by waiting. Control-plane client errors
    /// are permanent too, except request timeout (408) and throttling (429).
    pub fn is_retryable(&self) -> bool {
        if let Self::ControlPlane {
            status: Some(status),
            ..
        } = self
        {
            return !(400..500).contains(status) || matches!(status, 408 | 429);
        }
        !matches!(
            self,
            Self::FileNotFound { .. }
                | Self::PermissionDenied { .. }
                | Self::DisallowedType { .. }
                | Self::TooManyParts { .. }
                | Self::PartChanged { .. }
                | Self::Scan { .. }
                | Self::FolderFailed { .. }
                | Self::Cancelled
                | Self::Config(_)
                | Self::Io(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { path } => {
                format!(
                    "File not found: {}\n\nPossible solutions:\n  \
                     1. Check if the file path is correct\n  \
                     2. The file may have been removed while the upload was running",
                    path
                )
            }
            Self::PermissionDenied { path } => {
                format!(
                    "Permission denied: {}\n\nPossible solutions:\n  \
                     1. Check file permissions: ls -l {}\n  \
                     2. Ensure you have read access to the file",
                    path, path
                )
            }
            Self::ControlPlane {
                status: Some(401 | 403),
                ..
            } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check UPLOAD_API_TOKEN in .env\n  \
                     2. Verify you have write access to UPLOAD_COLLECTION_ID",
                    self
                )
            }
            Self::Network { message } => {
                format!(
                    "Network error: {}\n\nPossible solutions:\n  \
                     1. Check your internet connection\n  \
                     2. Verify UPLOAD_API_URL is correct in .env\n  \
                     3. Try again with --file-concurrency 1",
                    message
                )
            }
            Self::TooManyParts { .. } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Increase --chunk-size-mb so fewer parts are needed",
                    self
                )
            }
            _ => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network {
            message: error.to_string(),
        }
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_specialisation() {
        let err = UploadError::from_io_error(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "a.txt",
        );
        assert!(matches!(err, UploadError::FileNotFound { ref path } if path == "a.txt"));

        let err = UploadError::from_io_error(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
            "b.txt",
        );
        assert!(matches!(err, UploadError::PermissionDenied { .. }));

        let err = UploadError::from_io_error(std::io::Error::other("disk"), "c.txt");
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(UploadError::control("start", Some(503), "busy").is_retryable());
        assert!(UploadError::MissingEtag { part_number: 2 }.is_retryable());
        assert!(
            UploadError::Storage {
                status: 500,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(UploadError::control("presign", None, "connection reset").is_retryable());
        assert!(UploadError::control("presign", Some(429), "slow down").is_retryable());
        assert!(UploadError::control("presign", Some(408), "timeout").is_retryable());
        for status in [400, 401, 403, 404, 422] {
            assert!(
                !UploadError::control("presign", Some(status), "rejected").is_retryable(),
                "status {status}"
            );
        }
        assert!(!UploadError::Cancelled.is_retryable());
        assert!(
            !UploadError::DisallowedType {
                path: "x.exe".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_control_plane_display() {
        let err = UploadError::control("complete", Some(409), "part order");
        assert_eq!(
            err.to_string(),
            "Control plane complete failed with status 409: part order"
        );
        let err = UploadError::control("start", None, "no session id");
        assert_eq!(err.to_string(), "Control plane start failed: no session id");
    }
}
