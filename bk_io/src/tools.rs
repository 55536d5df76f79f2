use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use bk_core::{ToolLocator, ToolLookupError};

/// Locates tool roots by running the tool and reading a path from stdout.
#[derive(Debug, Clone, Default)]
pub struct SystemToolLocator;

impl SystemToolLocator {
    pub fn new() -> Self {
        Self
    }
}

impl ToolLocator for SystemToolLocator {
    fn root(&self, tool: &str, args: &[String]) -> Result<PathBuf, ToolLookupError> {
        debug!(tool, ?args, "querying tool root");

        let output = Command::new(tool).args(args).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ToolLookupError::NotFound {
                    tool: tool.to_string(),
                }
            } else {
                ToolLookupError::Failed {
                    tool: tool.to_string(),
                    status: None,
                    stderr: e.to_string(),
                }
            }
        })?;

        if !output.status.success() {
            return Err(ToolLookupError::Failed {
                tool: tool.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        if path.as_os_str().is_empty() || !path.is_dir() {
            return Err(ToolLookupError::NotADirectory {
                tool: tool.to_string(),
                path,
            });
        }

        Ok(path)
    }
}
