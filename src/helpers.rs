use std::path::Path;

/// Detect Content-Type based on file extension
///
/// Returns the MIME type for common file formats. Falls back to
/// "application/octet-stream" for unknown types.
pub fn detect_content_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        // Video
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",

        // Image
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",

        // Audio
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",

        // Documents and text
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",

        // Archives and data
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("parquet") => "application/vnd.apache.parquet",

        _ => "application/octet-stream",
    }
    .to_string()
}

/// Whether the file's extension is on the deny-list (case-insensitive)
pub fn is_denied_extension(path: &Path, denied: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => denied.iter().any(|d| d.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Join a base destination with a relative sub-directory.
///
/// Both sides are forward-slash paths; empty segments and a leading `./`
/// are dropped so `("docs", "")` stays `docs` and `("", "a/b")` is `a/b`.
pub fn join_destination(base: &str, relative_dir: &str) -> String {
    base.split('/')
        .chain(relative_dir.trim_start_matches("./").split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
