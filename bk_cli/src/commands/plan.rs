//! Plan command: resolve a formula and print the steps install would run.

use console::style;
use std::path::Path;

use bk_core::InstallRoots;

use crate::EngineSettings;
use crate::commands::{engine_builder, load_formula, option_set};
use crate::error::CliError;

pub fn run(
    formula_path: &Path,
    variant: Option<String>,
    options: Vec<String>,
    roots: &InstallRoots,
    settings: EngineSettings,
    json: bool,
) -> Result<(), CliError> {
    let spec = load_formula(formula_path)?;
    let engine = engine_builder(&settings).build();
    let plan = engine.plan(&spec, variant.as_deref(), &option_set(options), roots)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan).unwrap_or_default());
        return Ok(());
    }

    println!(
        "{} {} {} ({}) in {}",
        style("==>").cyan().bold(),
        style(&plan.formula).bold(),
        plan.version,
        plan.variant,
        plan.working_dir.display()
    );
    for line in plan.command_lines() {
        println!("{}", line);
    }
    for artifact in &plan.artifacts {
        println!("{} write {}", style("==>").cyan().bold(), artifact.path.display());
    }
    Ok(())
}
