//! Install locations and the `{placeholder}` templating used by formulas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where an install puts its files. Passed explicitly into every stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRoots {
    pub prefix: PathBuf,
    pub config_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub lock_dir: PathBuf,
}

impl InstallRoots {
    /// Conventional layout under a single prefix: `etc`, `var/run` and `var`.
    pub fn under_prefix(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            config_dir: prefix.join("etc"),
            runtime_dir: prefix.join("var/run"),
            lock_dir: prefix.join("var"),
        }
    }
}

/// Values substituted for `{name}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// The variables every formula template can use.
    pub fn for_install(name: &str, version: &str, roots: &InstallRoots) -> Self {
        Self::new()
            .with("name", name)
            .with("version", version)
            .with("prefix", roots.prefix.to_string_lossy())
            .with("config_dir", roots.config_dir.to_string_lossy())
            .with("runtime_dir", roots.runtime_dir.to_string_lossy())
            .with("lock_dir", roots.lock_dir.to_string_lossy())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Replace every known `{key}` in `template`.
    ///
    /// Unknown placeholders and stray braces are copied through unchanged, and
    /// substituted values are never re-expanded.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };

            let key = &after[..close];
            match self.values.get(key) {
                Some(value) if is_placeholder_key(key) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
