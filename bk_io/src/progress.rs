//! Install progress events for front-ends.

use std::time::Duration;

use bk_core::Stage;

/// Events emitted while a formula is installed, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallProgress {
    StageStarted {
        stage: Stage,
    },
    DownloadStarted {
        name: String,
    },
    /// The file was already present in the downloads directory.
    DownloadReused {
        name: String,
    },
    DownloadCompleted {
        name: String,
        total_bytes: u64,
    },
    Verified {
        name: String,
    },
    UnpackStarted {
        name: String,
    },
    UnpackCompleted {
        name: String,
    },
    PatchApplied {
        index: usize,
        attribution: String,
    },
    StepStarted {
        index: usize,
        command: String,
    },
    StepCompleted {
        index: usize,
        duration: Duration,
    },
    InstallCompleted {
        name: String,
    },
}

pub type ProgressCallback = Box<dyn Fn(InstallProgress) + Send + Sync>;
