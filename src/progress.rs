use std::sync::Arc;

/// Aggregate progress of a folder upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderProgress {
    /// Files that reached a terminal state (success or failure)
    pub processed: usize,
    pub total: usize,
    /// Bytes of successfully uploaded files
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl FolderProgress {
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            if self.total == 0 {
                1.0
            } else {
                self.processed as f64 / self.total as f64
            }
        } else {
            self.bytes_done as f64 / self.bytes_total as f64
        }
    }
}

/// Progress notifications. Events from concurrent files and parts interleave freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    FileStarted {
        path: String,
        size: u64,
        multipart: bool,
    },
    PartUploaded {
        path: String,
        part_number: u32,
        bytes: u64,
    },
    FileFinished {
        path: String,
        size: u64,
        success: bool,
    },
    Folder(FolderProgress),
}

/// Callback invoked with progress events.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub(crate) fn emit(callback: &Option<ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(&event);
    }
}
