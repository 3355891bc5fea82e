use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, UploadError};

const MIB: u64 = 1024 * 1024;

/// Smallest part size the storage backend accepts (5MB), except for the last part
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// Maximum number of parts in one multipart session
pub const MAX_PARTS: u64 = 10_000;

/// Read buffer used when hashing whole files (8MB)
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024 * 1024;

/// Extensions that are never uploaded
pub const DEFAULT_DENIED_EXTENSIONS: &[&str] =
    &["exe", "dll", "bat", "cmd", "com", "msi", "scr", "ps1", "vbs"];

/// Configuration for talking to the upload control-plane
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub collection_id: String,
    pub target_path: String,
    pub transfer: TransferConfig,
}

/// Tunables for a single upload operation.
///
/// Values are immutable once built; the `with_*` methods hand back a new
/// value so a caller can derive a per-operation variant without touching
/// the one other operations are using.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Files strictly larger than this use multipart upload
    pub multipart_threshold: u64,
    pub chunk_size_mb: u64,
    pub file_concurrency: usize,
    pub part_concurrency: usize,
    /// Ceiling on concurrent data-plane transfers across all files and parts
    pub max_in_flight: Option<usize>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_parts: u64,
    pub read_buffer_size: usize,
    /// Timeout for control-plane calls; storage transfers have none
    pub request_timeout: Duration,
    pub denied_extensions: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: 100 * MIB,
            chunk_size_mb: 10,
            file_concurrency: 4,
            part_concurrency: 4,
            max_in_flight: None,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_parts: MAX_PARTS,
            read_buffer_size: DEFAULT_READ_BUFFER,
            request_timeout: Duration::from_secs(30),
            denied_extensions: DEFAULT_DENIED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl TransferConfig {
    /// Part size actually used: the configured size, never below 5MB
    pub fn effective_chunk_size(&self) -> u64 {
        (self.chunk_size_mb.saturating_mul(MIB)).max(MIN_CHUNK_SIZE)
    }

    /// Whether a file of `size` bytes goes through multipart upload
    pub fn use_multipart(&self, size: u64) -> bool {
        size > self.multipart_threshold
    }

    pub fn with_multipart_threshold(self, bytes: u64) -> Self {
        Self {
            multipart_threshold: bytes,
            ..self
        }
    }

    pub fn with_chunk_size_mb(self, mb: u64) -> Self {
        Self {
            chunk_size_mb: mb,
            ..self
        }
    }

    pub fn with_file_concurrency(self, n: usize) -> Self {
        Self {
            file_concurrency: n.max(1),
            ..self
        }
    }

    pub fn with_part_concurrency(self, n: usize) -> Self {
        Self {
            part_concurrency: n.max(1),
            ..self
        }
    }

    pub fn with_max_in_flight(self, n: Option<usize>) -> Self {
        Self {
            max_in_flight: n.map(|n| n.max(1)),
            ..self
        }
    }

    pub fn with_max_retries(self, n: u32) -> Self {
        Self {
            max_retries: n,
            ..self
        }
    }

    pub fn with_retry_base_delay(self, delay: Duration) -> Self {
        Self {
            retry_base_delay: delay,
            ..self
        }
    }

    pub fn with_max_parts(self, n: u64) -> Self {
        Self {
            max_parts: n,
            ..self
        }
    }

    pub fn with_denied_extensions(self, extensions: Vec<String>) -> Self {
        Self {
            denied_extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            ..self
        }
    }
}

impl Config {
    /// Load configuration from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("UPLOAD_API_URL").ok_or_else(|| {
            UploadError::Config(
                "UPLOAD_API_URL not found in environment. Please set it in .env file".into(),
            )
        })?;
        Self::validate_api_url(&api_url)?;

        let api_token = lookup("UPLOAD_API_TOKEN").filter(|t| !t.is_empty());

        let collection_id = lookup("UPLOAD_COLLECTION_ID").ok_or_else(|| {
            UploadError::Config(
                "UPLOAD_COLLECTION_ID not found in environment. Please set it in .env file".into(),
            )
        })?;
        Self::validate_collection_id(&collection_id)?;

        let target_path = lookup("UPLOAD_TARGET_PATH").unwrap_or_default();
        Self::validate_target_path(&target_path)?;

        let defaults = TransferConfig::default();
        let threshold_mb: u64 = parse_var(&lookup, "UPLOAD_MULTIPART_THRESHOLD_MB", 100)?;
        let timeout_secs: u64 = parse_var(&lookup, "UPLOAD_TIMEOUT_SECS", 30)?;
        let max_in_flight = match lookup("UPLOAD_MAX_IN_FLIGHT") {
            Some(raw) => Some(parse_value::<usize>("UPLOAD_MAX_IN_FLIGHT", &raw)?),
            None => None,
        };

        let transfer = TransferConfig {
            request_timeout: Duration::from_secs(timeout_secs),
            ..defaults
        }
        .with_multipart_threshold(threshold_mb.saturating_mul(MIB))
        .with_chunk_size_mb(parse_var(&lookup, "UPLOAD_CHUNK_SIZE_MB", 10)?)
        .with_file_concurrency(parse_var(&lookup, "UPLOAD_FILE_CONCURRENCY", 4)?)
        .with_part_concurrency(parse_var(&lookup, "UPLOAD_PART_CONCURRENCY", 4)?)
        .with_max_retries(parse_var(&lookup, "UPLOAD_MAX_RETRIES", 3)?)
        .with_max_in_flight(max_in_flight);

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token,
            collection_id,
            target_path,
            transfer,
        })
    }

    /// Same configuration with a different transfer section
    pub fn with_transfer(self, transfer: TransferConfig) -> Self {
        Self { transfer, ..self }
    }

    /// Validate control-plane base URL
    fn validate_api_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(UploadError::Config("UPLOAD_API_URL cannot be empty".into()));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(UploadError::Config(format!(
                "UPLOAD_API_URL '{}' must start with http:// or https://",
                url
            )));
        }

        Ok(())
    }

    /// Validate collection identifier
    fn validate_collection_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(UploadError::Config(
                "UPLOAD_COLLECTION_ID cannot be empty".into(),
            ));
        }

        if let Some(c) = id.chars().find(|c| c.is_whitespace() || *c == '/') {
            return Err(UploadError::Config(format!(
                "UPLOAD_COLLECTION_ID '{}' contains invalid character {:?}",
                id, c
            )));
        }

        Ok(())
    }

    /// Validate remote target path
    fn validate_target_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }

        if path.contains("//") {
            return Err(UploadError::Config(format!(
                "UPLOAD_TARGET_PATH '{}' contains consecutive slashes (not allowed)",
                path
            )));
        }

        if path.split('/').any(|segment| segment == "..") {
            return Err(UploadError::Config(format!(
                "UPLOAD_TARGET_PATH '{}' contains '..' (not allowed for security)",
                path
            )));
        }

        if path.starts_with('/') {
            return Err(UploadError::Config(format!(
                "UPLOAD_TARGET_PATH '{}' should not start with '/' (use relative path)",
                path
            )));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| UploadError::Config(format!("{} has invalid value '{}'", key, raw)))
}
