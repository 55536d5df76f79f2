//! Install command implementation.

use console::style;
use indicatif::MultiProgress;
use std::path::Path;
use std::time::Instant;

use bk_core::InstallRoots;
use bk_io::{Cancellation, InstallResult};

use crate::EngineSettings;
use crate::commands::{engine_builder, load_formula, option_set};
use crate::display::{ProgressStyles, create_progress_callback, fail_stage_bar, print_caveats};
use crate::error::CliError;

/// Run the install command.
pub async fn run(
    formula_path: &Path,
    variant: Option<String>,
    options: Vec<String>,
    roots: &InstallRoots,
    settings: EngineSettings,
    json: bool,
) -> Result<(), CliError> {
    let spec = load_formula(formula_path)?;
    let start = Instant::now();

    let cancellation = Cancellation::new();
    let on_interrupt = cancellation.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} interrupted, stopping the running step", style("==>").yellow().bold());
            on_interrupt.cancel();
        }
    });

    let mut builder = engine_builder(&settings).cancellation(cancellation);
    let mut stage_bar = None;
    if !json {
        println!(
            "{} Installing {}{}",
            style("==>").cyan().bold(),
            style(&spec.name).bold(),
            variant.as_deref().map(|v| format!(" ({})", v)).unwrap_or_default()
        );
        let (callback, bar) = create_progress_callback(MultiProgress::new(), ProgressStyles::default());
        builder = builder.progress(callback);
        stage_bar = Some(bar);
    }
    let engine = builder.build();

    let outcome = engine
        .install(&spec, variant.as_deref(), &option_set(options), roots)
        .await;
    signal_task.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if let Some(ref bar) = stage_bar {
                fail_stage_bar(bar);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
        return Ok(());
    }

    print_summary(&result, start.elapsed().as_secs_f64());
    Ok(())
}

fn print_summary(result: &InstallResult, elapsed_secs: f64) {
    println!();
    println!("{} {}", style("==>").cyan().bold(), format_install_complete_message(result, elapsed_secs));
    for artifact in &result.artifacts {
        println!("    {} wrote {}", style("✓").green(), artifact.display());
    }
    if let Some(ref caveats) = result.caveats {
        print_caveats(caveats);
    }
}

pub(crate) fn format_install_complete_message(result: &InstallResult, elapsed_secs: f64) -> String {
    let steps = result.steps.len();
    format!(
        "Installed {} {} ({}, {} step{}) in {:.2}s",
        result.formula,
        result.version,
        result.variant,
        steps,
        if steps == 1 { "" } else { "s" },
        elapsed_secs
    )
}
