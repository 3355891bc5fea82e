//! Content digests used both as backend integrity checks and per-part fingerprints.
//!
//! The digest is MD5 encoded as padded standard base64, the same form storage
//! expects in a `Content-MD5` header.

use std::io::SeekFrom;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, UploadError};

/// Checksum of an in-memory byte range
pub fn checksum_bytes(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

/// Stream a whole file through the hasher using a fixed-size buffer.
///
/// Memory use is bounded by `buffer_size` regardless of file size. Any read
/// error aborts the digest; a partially read file is never reported.
pub async fn checksum_file(path: &Path, buffer_size: usize) -> Result<String> {
    let display = path.display().to_string();
    let mut file = File::open(path)
        .await
        .map_err(|e| UploadError::from_io_error(e, &display))?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(STANDARD.encode(hasher.finalize()))
}

/// Read exactly `len` bytes at `offset`.
///
/// Fails with `UnexpectedEof` if the file is shorter than the range.
pub async fn read_range(path: &Path, offset: u64, len: u64) -> Result<Bytes> {
    let display = path.display().to_string();
    let mut file = File::open(path)
        .await
        .map_err(|e| UploadError::from_io_error(e, &display))?;
    file.seek(SeekFrom::Start(offset)).await?;

    let len = usize::try_from(len)
        .map_err(|_| UploadError::Config(format!("part length {} exceeds memory", len)))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Read a byte range and return it together with its checksum
pub async fn checksum_range(path: &Path, offset: u64, len: u64) -> Result<(Bytes, String)> {
    let data = read_range(path, offset, len).await?;
    let checksum = checksum_bytes(&data);
    Ok((data, checksum))
}
