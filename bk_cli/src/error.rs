use std::fmt;
use std::path::PathBuf;

use bk_core::{FormulaError, ParseError};

/// Errors surfaced by the `bk` binary.
#[derive(Debug)]
pub enum CliError {
    ReadFormula { path: PathBuf, message: String },
    ParseFormula { path: PathBuf, error: ParseError },
    Formula(FormulaError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::ReadFormula { path, message } => {
                write!(f, "cannot read formula {}: {}", path.display(), message)
            }
            CliError::ParseFormula { path, error } => {
                write!(f, "cannot load formula {}: {}", path.display(), error)
            }
            CliError::Formula(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CliError {}

impl From<FormulaError> for CliError {
    fn from(e: FormulaError) -> Self {
        CliError::Formula(e)
    }
}
