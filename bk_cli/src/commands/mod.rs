//! Command implementations for the brewkit CLI.
//!
//! Each submodule handles one subcommand; shared formula loading lives here.

pub mod caveats;
pub mod install;
pub mod options;
pub mod plan;

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use bk_core::{FormulaSpec, parse_json_formula, parse_ruby_formula};
use bk_io::FormulaEngine;
use bk_io::engine::FormulaEngineBuilder;

use crate::EngineSettings;
use crate::error::CliError;

/// Load a formula file; `.json` files use the JSON form, anything else the DSL.
pub fn load_formula(path: &Path) -> Result<FormulaSpec, CliError> {
    let source = std::fs::read_to_string(path).map_err(|e| CliError::ReadFormula {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!(path = %path.display(), bytes = source.len(), "loading formula");
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        parse_json_formula(&source)
    } else {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        parse_ruby_formula(&source, name)
    };

    parsed.map_err(|error| CliError::ParseFormula {
        path: path.to_path_buf(),
        error,
    })
}

pub fn engine_builder(settings: &EngineSettings) -> FormulaEngineBuilder {
    let mut builder = FormulaEngine::builder(&settings.work_root).service_user(settings.service_user.clone());
    if let Some(deadline) = settings.deadline {
        builder = builder.deadline(deadline);
    }
    builder
}

/// Engine for read-only queries (`options`, `caveats`); its work root is never touched.
pub fn query_engine() -> FormulaEngine {
    FormulaEngine::builder(std::env::temp_dir().join("brewkit")).build()
}

pub fn option_set(flags: Vec<String>) -> BTreeSet<String> {
    flags.into_iter().collect()
}
