//! Caveats command: print post-install guidance for the given roots.

use std::path::Path;

use bk_core::{FormulaSpec, InstallRoots};

use crate::commands::{load_formula, query_engine};
use crate::display::print_caveats;
use crate::error::CliError;

pub fn run(formula_path: &Path, roots: &InstallRoots) -> Result<(), CliError> {
    let spec = load_formula(formula_path)?;

    match caveat_text(&spec, roots) {
        Some(text) => print_caveats(&text),
        None => println!("{} has no caveats", spec.name),
    }
    Ok(())
}

fn caveat_text(spec: &FormulaSpec, roots: &InstallRoots) -> Option<String> {
    query_engine().caveats(spec, roots)
}
