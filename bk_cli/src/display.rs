//! Display utilities for progress spinners and formatting helpers.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bk_io::{InstallProgress, ProgressCallback};

/// Spinner styles used while an install runs.
pub struct ProgressStyles {
    pub spinner: ProgressStyle,
    pub done: ProgressStyle,
}

impl Default for ProgressStyles {
    fn default() -> Self {
        Self {
            spinner: ProgressStyle::default_spinner()
                .template("    {prefix:<10} {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            done: ProgressStyle::default_spinner()
                .template("    {prefix:<10} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        }
    }
}

/// The spinner for the stage currently running, if any.
pub type StageBar = Arc<Mutex<Option<ProgressBar>>>;

/// Create a progress callback that shows one spinner per pipeline stage.
pub fn create_progress_callback(multi: MultiProgress, styles: ProgressStyles) -> (Arc<ProgressCallback>, StageBar) {
    let current: StageBar = Arc::new(Mutex::new(None));
    let current_clone = current.clone();

    let callback: Arc<ProgressCallback> = Arc::new(Box::new(move |event: InstallProgress| {
        let Ok(mut current) = current_clone.lock() else {
            return;
        };

        if let InstallProgress::StageStarted { stage } = event {
            if let Some(pb) = current.take() {
                finish_ok(&pb, &styles.done);
            }
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(styles.spinner.clone());
            pb.set_prefix(stage.to_string());
            pb.enable_steady_tick(Duration::from_millis(80));
            *current = Some(pb);
            return;
        }

        if let InstallProgress::InstallCompleted { .. } = event {
            if let Some(pb) = current.take() {
                finish_ok(&pb, &styles.done);
            }
            return;
        }

        if let Some(ref pb) = *current
            && let Some(message) = progress_message(&event)
        {
            pb.set_message(message);
        }
    }));

    (callback, current)
}

fn finish_ok(pb: &ProgressBar, done: &ProgressStyle) {
    pb.set_style(done.clone());
    pb.set_message(format!("{}", style("✓").green()));
    pb.finish();
}

/// Spinner text for an event, or `None` when the event does not change it.
pub fn progress_message(event: &InstallProgress) -> Option<String> {
    match event {
        InstallProgress::DownloadStarted { name } => Some(format!("downloading {}", name)),
        InstallProgress::DownloadReused { name } => Some(format!("{} (cached)", name)),
        InstallProgress::DownloadCompleted { name, total_bytes } => {
            Some(format!("{} ({})", name, format_bytes(*total_bytes)))
        }
        InstallProgress::Verified { name } => Some(format!("verified {}", name)),
        InstallProgress::UnpackStarted { name } => Some(format!("unpacking {}", name)),
        InstallProgress::UnpackCompleted { name } => Some(format!("unpacked {}", name)),
        InstallProgress::PatchApplied { index, attribution } => {
            Some(format!("patch #{}: {}", index, attribution))
        }
        InstallProgress::StepStarted { command, .. } => Some(command.clone()),
        InstallProgress::StageStarted { .. }
        | InstallProgress::StepCompleted { .. }
        | InstallProgress::InstallCompleted { .. } => None,
    }
}

/// Abandon the spinner of a stage that failed.
pub fn fail_stage_bar(bar: &StageBar) {
    if let Ok(mut current) = bar.lock()
        && let Some(pb) = current.take()
    {
        pb.abandon_with_message(format!("{}", style("✗").red()));
    }
}

/// Format bytes into a human-readable string (e.g., "1.5 MB").
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn print_caveats(caveats: &str) {
    println!();
    println!("{} {}", style("==>").cyan().bold(), style("Caveats").bold());
    for line in caveats.lines() {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bk_core::Stage;

    #[test]
    fn test_format_bytes_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_kilobytes() {
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
    }

    #[test]
    fn test_format_bytes_megabytes() {
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_format_bytes_gigabytes() {
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_progress_message_download() {
        let msg = progress_message(&InstallProgress::DownloadCompleted {
            name: "nginx-1.0.14.tar.gz".to_string(),
            total_bytes: 2048,
        });
        assert_eq!(msg.as_deref(), Some("nginx-1.0.14.tar.gz (2.0 KB)"));
    }

    #[test]
    fn test_progress_message_step_shows_command() {
        let msg = progress_message(&InstallProgress::StepStarted {
            index: 1,
            command: "make install".to_string(),
        });
        assert_eq!(msg.as_deref(), Some("make install"));
    }

    #[test]
    fn test_progress_message_ignores_stage_events() {
        assert!(progress_message(&InstallProgress::StageStarted { stage: Stage::Fetch }).is_none());
    }

    #[test]
    fn test_callback_tracks_current_stage() {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let (callback, bar) = create_progress_callback(multi, ProgressStyles::default());

        callback(InstallProgress::StageStarted { stage: Stage::Fetch });
        assert!(bar.lock().unwrap().is_some());

        callback(InstallProgress::InstallCompleted {
            name: "nginx".to_string(),
        });
        assert!(bar.lock().unwrap().is_none());
    }
}
