//! Options command: list the flags a formula accepts.

use console::style;
use std::path::Path;

use bk_core::FormulaOption;

use crate::commands::{load_formula, query_engine};
use crate::error::CliError;

pub fn run(formula_path: &Path, json: bool) -> Result<(), CliError> {
    let spec = load_formula(formula_path)?;
    let engine = query_engine();
    let options = engine.list_options(&spec);

    if json {
        let entries: Vec<serde_json::Value> = options
            .iter()
            .map(|o| serde_json::json!({ "flag": o.flag, "description": o.description }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
        return Ok(());
    }

    if options.is_empty() {
        println!("{} has no options", spec.name);
        return Ok(());
    }

    for line in format_option_lines(options) {
        println!("{}", line);
    }
    Ok(())
}

fn format_option_lines(options: &[FormulaOption]) -> Vec<String> {
    options
        .iter()
        .flat_map(|o| [format!("{}", style(&o.flag).bold()), format!("\t{}", o.description)])
        .collect()
}
