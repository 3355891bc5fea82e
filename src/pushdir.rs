use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

use presign_uploader::helpers::{format_size, join_destination};
use presign_uploader::{
    Config, FolderSummary, GlobIgnore, HttpControlPlane, HttpStorage, IgnorePredicate, NoIgnore,
    ProgressEvent, ScanResult, TransferCandidate, TransferConfig, UploadError, Uploader, scan,
};

#[derive(Parser, Debug)]
#[command(
    name = "pushdir",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Upload files and folders to object storage through presigned URLs",
    long_about = "Uploads a file or a whole directory tree through an upload API that hands out presigned URLs. \
                  Large files are split into parts that upload concurrently and are retried independently. \
                  Configure via .env file with the API endpoint and collection.",
    after_help = "Examples:\n  \
                  pushdir ./report.pdf                      # Upload single file\n  \
                  pushdir ./photos -d albums/2024           # Upload folder under a destination\n  \
                  pushdir ./data -c 8 -p 4                  # 8 files at once, 4 parts per file\n  \
                  pushdir ./data -i '*.tmp,.git/'           # Skip matching paths\n  \
                  pushdir ./data --dry-run                  # Show what would be uploaded\n\n\
                  Configuration (.env):\n  \
                  UPLOAD_API_URL=https://api.example.com/v1\n  \
                  UPLOAD_API_TOKEN=secret\n  \
                  UPLOAD_COLLECTION_ID=my-collection\n  \
                  UPLOAD_TARGET_PATH=uploads\n\n\
                  For more information: https://github.com/tyrchen/presign-uploader"
)]
struct Cli {
    /// File or directory to upload
    path: PathBuf,

    /// Destination path inside the collection (overrides UPLOAD_TARGET_PATH)
    #[arg(long, short = 'd')]
    dest: Option<String>,

    /// Maximum number of files uploading at once
    #[arg(long, short = 'c')]
    file_concurrency: Option<usize>,

    /// Maximum number of parts uploading at once for each large file
    #[arg(long, short = 'p')]
    part_concurrency: Option<usize>,

    /// Part size in MB for multipart uploads (minimum 5)
    #[arg(long)]
    chunk_size_mb: Option<u64>,

    /// Files larger than this many MB use multipart upload
    #[arg(long)]
    threshold_mb: Option<u64>,

    /// Retries for each authorization request and each part
    #[arg(long)]
    retries: Option<u32>,

    /// Ceiling on concurrent storage transfers across all files
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Glob patterns to skip (comma-separated, e.g. "*.tmp,.git/")
    #[arg(long, short = 'i', value_delimiter = ',')]
    ignore: Vec<String>,

    /// Perform a dry run (show what would be uploaded without uploading)
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Command-line overrides on top of the environment configuration
    fn apply(&self, transfer: TransferConfig) -> TransferConfig {
        let mut transfer = transfer;
        if let Some(n) = self.file_concurrency {
            transfer = transfer.with_file_concurrency(n);
        }
        if let Some(n) = self.part_concurrency {
            transfer = transfer.with_part_concurrency(n);
        }
        if let Some(mb) = self.chunk_size_mb {
            transfer = transfer.with_chunk_size_mb(mb);
        }
        if let Some(mb) = self.threshold_mb {
            transfer = transfer.with_multipart_threshold(mb.saturating_mul(1024 * 1024));
        }
        if let Some(n) = self.retries {
            transfer = transfer.with_max_retries(n);
        }
        if self.max_in_flight.is_some() {
            transfer = transfer.with_max_in_flight(self.max_in_flight);
        }
        transfer
    }

    fn ignore(&self) -> Result<Arc<dyn IgnorePredicate>> {
        if self.ignore.is_empty() {
            return Ok(Arc::new(NoIgnore));
        }
        Ok(Arc::new(
            GlobIgnore::new(self.ignore.as_slice()).context("Invalid ignore pattern")?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    info!("Pushdir v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let config = config.clone().with_transfer(cli.apply(config.transfer));
    let destination = cli
        .dest
        .clone()
        .unwrap_or_else(|| config.target_path.clone());
    let ignore = cli.ignore()?;

    if !cli.path.exists() {
        bail!("Path not found: {}", cli.path.display());
    }

    println!(
        "{}",
        style(format!(
            "📦 Target: {}/{}",
            config.collection_id, destination
        ))
        .cyan()
        .bold()
    );

    if cli.dry_run {
        return dry_run(&cli.path, &destination, ignore, &config.transfer);
    }

    let control = Arc::new(HttpControlPlane::new(&config)?);
    let storage = Arc::new(HttpStorage::new()?);
    let pb = progress_bar();
    let uploader = Uploader::new(
        control,
        storage,
        config.collection_id.clone(),
        config.transfer.clone(),
    )
    .with_progress(progress_callback(pb.clone()));

    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight transfers");
            cancel.cancel();
        }
    });

    println!(
        "{}",
        style(format!(
            "⚡ Uploading with {} file workers, {} parts per file...",
            config.transfer.file_concurrency, config.transfer.part_concurrency
        ))
        .cyan()
    );

    let start = Instant::now();
    let summary = match uploader.upload_path(&cli.path, &destination, ignore).await {
        Ok(summary) => summary,
        Err(UploadError::FolderFailed { summary, .. }) => *summary,
        Err(e) => {
            pb.finish_and_clear();
            return Err(anyhow::anyhow!(e.user_message()));
        }
    };
    pb.finish_and_clear();

    print_results(&summary);
    print_summary(&summary, start);

    if summary.failed > 0 {
        bail!("{} of {} files failed to upload", summary.failed, summary.total);
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:>4} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Feed upload events into the byte progress bar.
///
/// Multipart files advance per part; single-request files advance when done.
fn progress_callback(pb: ProgressBar) -> presign_uploader::ProgressCallback {
    let multipart_files = Mutex::new(HashSet::new());
    Arc::new(move |event: &ProgressEvent| match event {
        ProgressEvent::FileStarted {
            path, multipart, ..
        } => {
            if *multipart {
                if let Ok(mut files) = multipart_files.lock() {
                    files.insert(path.clone());
                }
            }
            pb.set_message(short_name(path));
        }
        ProgressEvent::PartUploaded { bytes, .. } => pb.inc(*bytes),
        ProgressEvent::FileFinished {
            path,
            size,
            success,
        } => {
            let was_multipart = multipart_files
                .lock()
                .map(|mut files| files.remove(path))
                .unwrap_or(false);
            if *success && !was_multipart {
                pb.inc(*size);
            }
        }
        ProgressEvent::Folder(progress) => {
            pb.set_length(progress.bytes_total);
            pb.set_prefix(format!("{:.0}%", progress.fraction() * 100.0));
        }
    })
}

fn short_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn dry_run(
    path: &Path,
    destination: &str,
    ignore: Arc<dyn IgnorePredicate>,
    transfer: &TransferConfig,
) -> Result<()> {
    println!(
        "{}",
        style("🔍 DRY RUN MODE - No files will be uploaded")
            .yellow()
            .bold()
    );
    println!();

    let scanned = if path.is_dir() {
        scan(path, ignore.as_ref(), &transfer.denied_extensions)?
    } else {
        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .len();
        let name = short_name(&path.display().to_string());
        ScanResult {
            candidates: vec![TransferCandidate::new(path.to_path_buf(), name, size)],
            total_bytes: size,
        }
    };

    if scanned.candidates.is_empty() {
        println!("{}", style("No files to upload").yellow());
        return Ok(());
    }

    for candidate in &scanned.candidates {
        let mode = if transfer.use_multipart(candidate.size) {
            style("MULTIPART").magenta().bold()
        } else {
            style("SINGLE   ").green().bold()
        };
        let dest = join_destination(
            &join_destination(destination, candidate.relative_dir()),
            candidate.file_name(),
        );
        println!(
            "  {} {} → {} ({})",
            mode,
            candidate.relative_path,
            dest,
            format_size(candidate.size)
        );
    }

    println!();
    println!(
        "{}",
        style(format!(
            "Would upload {} file(s), {}",
            scanned.candidates.len(),
            format_size(scanned.total_bytes)
        ))
        .bold()
    );
    Ok(())
}

fn print_results(summary: &FolderSummary) {
    let mut results: Vec<_> = summary.results.iter().collect();
    results.sort_by(|a, b| a.candidate.relative_path.cmp(&b.candidate.relative_path));

    println!();
    for result in results {
        let candidate = &result.candidate;
        match &result.outcome {
            Some(outcome) => {
                let kind = if outcome.multipart { "multipart" } else { "single" };
                println!(
                    "{} {} {}",
                    style("✓").green(),
                    style(&candidate.relative_path).green(),
                    style(format!("({}, {})", format_size(candidate.size), kind)).dim()
                );
                println!("  {} {}", style("→").blue(), style(&outcome.key).dim());
            }
            None => {
                println!(
                    "{} {} {}",
                    style("✗").red(),
                    style(&candidate.relative_path).red(),
                    style(candidate.error().unwrap_or("unknown error")).dim()
                );
            }
        }
    }
}

fn print_summary(summary: &FolderSummary, start: Instant) {
    let duration = start.elapsed();

    println!("\n{}", style("═".repeat(70)).dim());
    println!(
        "{}",
        style(format!(
            "Summary: {} uploaded, {} failed, {} total",
            summary.succeeded, summary.failed, summary.total
        ))
        .bold()
    );

    if summary.uploaded_bytes > 0 {
        println!(
            "{}",
            style(format!(
                "Total uploaded: {} ({} bytes)",
                format_size(summary.uploaded_bytes),
                summary.uploaded_bytes
            ))
            .dim()
        );
    }

    if duration.as_secs() > 0 {
        let speed = summary.uploaded_bytes as f64 / duration.as_secs_f64() / 1024.0 / 1024.0;
        println!(
            "{}",
            style(format!(
                "Time: {:.2}s, Average speed: {:.2} MB/s",
                duration.as_secs_f64(),
                speed
            ))
            .dim()
        );
    }
}
