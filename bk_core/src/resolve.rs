//! Variant and option resolution.
//!
//! Turns a formula plus the caller's variant choice and enabled option flags
//! into a [`ResolvedConfig`]: the selected source and the ordered configure
//! arguments contributed by options.
//!
//! # Ordering
//!
//! Option effects are evaluated in the order the formula declares the
//! options, not the order the flags were passed. Tool lookups therefore run
//! in a predictable sequence and two runs with the same inputs produce the
//! same argument list.
//!
//! # Unknown flags
//!
//! A flag the formula does not declare is rejected with
//! [`ResolveError::UnknownOption`] instead of being silently ignored.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::errors::ResolveError;
use crate::formula::{FormulaSpec, OptionEffect, Resource, SourceVariant};

/// Capability for asking an installed tool where it lives (`passenger-config --root`).
pub trait ToolLocator: Send + Sync {
    fn root(&self, tool: &str, args: &[String]) -> Result<PathBuf, ToolLookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLookupError {
    /// The tool is not installed or not on PATH.
    NotFound { tool: String },
    /// The tool ran but exited unsuccessfully.
    Failed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    /// The tool printed something that is not an existing directory.
    NotADirectory { tool: String, path: PathBuf },
}

impl fmt::Display for ToolLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolLookupError::NotFound { tool } => write!(f, "'{}' is not installed or not on PATH", tool),
            ToolLookupError::Failed {
                tool,
                status,
                stderr,
            } => {
                match status {
                    Some(code) => write!(f, "'{}' exited with status {}", tool, code)?,
                    None => write!(f, "'{}' was terminated by a signal", tool)?,
                }
                if !stderr.trim().is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
            ToolLookupError::NotADirectory { tool, path } => {
                write!(f, "'{}' reported '{}', which is not a directory", tool, path.display())
            }
        }
    }
}

impl std::error::Error for ToolLookupError {}

/// A configure argument whose final text may depend on a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureArg {
    Literal(String),
    /// Rendered with `{path}` once the resource has been extracted.
    FromResource { resource: Resource, template: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub variant: SourceVariant,
    pub version: String,
    /// Enabled option flags, in declaration order.
    pub enabled: Vec<String>,
    /// Option-contributed configure arguments, in declaration order.
    pub args: Vec<ConfigureArg>,
}

impl ResolvedConfig {
    /// Extra archives needed by the enabled options, in declaration order.
    pub fn resources(&self) -> Vec<&Resource> {
        let mut seen = BTreeSet::new();
        self.args
            .iter()
            .filter_map(|arg| match arg {
                ConfigureArg::FromResource { resource, .. } => Some(resource),
                ConfigureArg::Literal(_) => None,
            })
            .filter(|r| seen.insert(r.url.as_str()))
            .collect()
    }
}

/// Select a variant and compute option arguments.
///
/// # Errors
/// - `UnknownVariant` if `requested_variant` names no variant
/// - `UnknownOption` if an enabled flag is not declared by the formula
/// - `OptionUnsatisfied` if an option's tool lookup fails
pub fn resolve(
    spec: &FormulaSpec,
    requested_variant: Option<&str>,
    enabled_options: &BTreeSet<String>,
    tools: &dyn ToolLocator,
) -> Result<ResolvedConfig, ResolveError> {
    let variant = match requested_variant {
        Some(id) => spec
            .variant(id)
            .ok_or_else(|| ResolveError::UnknownVariant(id.to_string()))?,
        None => spec
            .default_variant()
            .ok_or_else(|| ResolveError::UnknownVariant(crate::formula::DEFAULT_VARIANT.to_string()))?,
    };

    if let Some(unknown) = enabled_options.iter().find(|flag| spec.option(flag).is_none()) {
        return Err(ResolveError::UnknownOption(unknown.clone()));
    }

    let mut enabled = Vec::new();
    let mut args = Vec::new();

    for option in spec.options.iter().filter(|o| enabled_options.contains(&o.flag)) {
        enabled.push(option.flag.clone());

        for effect in &option.effects {
            match effect {
                OptionEffect::Arg { value } => args.push(ConfigureArg::Literal(value.clone())),
                OptionEffect::ToolRoot {
                    tool,
                    args: tool_args,
                    template,
                } => {
                    let root = tools.root(tool, tool_args).map_err(|e| {
                        ResolveError::OptionUnsatisfied {
                            flag: option.flag.clone(),
                            detail: e.to_string(),
                        }
                    })?;
                    let rendered = crate::roots::TemplateVars::new()
                        .with("root", root.to_string_lossy())
                        .render(template);
                    args.push(ConfigureArg::Literal(rendered));
                }
                OptionEffect::Resource { resource, template } => {
                    args.push(ConfigureArg::FromResource {
                        resource: resource.clone(),
                        template: template.clone(),
                    });
                }
            }
        }
    }

    let version = variant
        .effective_version()
        .unwrap_or_else(|| variant.id.clone());

    Ok(ResolvedConfig {
        variant: variant.clone(),
        version,
        enabled,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Checksum, DigestAlgorithm, FormulaOption, InstallSpec};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Locator that answers from a fixed table and records lookups.
    struct FakeTools {
        roots: Vec<(String, Result<PathBuf, ToolLookupError>)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTools {
        fn new(roots: Vec<(&str, Result<PathBuf, ToolLookupError>)>) -> Self {
            Self {
                roots: roots.into_iter().map(|(t, r)| (t.to_string(), r)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn none() -> Self {
            Self::new(vec![])
        }
    }

    impl ToolLocator for FakeTools {
        fn root(&self, tool: &str, _args: &[String]) -> Result<PathBuf, ToolLookupError> {
            self.calls.lock().unwrap().push(tool.to_string());
            self.roots
                .iter()
                .find(|(t, _)| t == tool)
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| {
                    Err(ToolLookupError::NotFound {
                        tool: tool.to_string(),
                    })
                })
        }
    }

    fn web_server() -> FormulaSpec {
        FormulaSpec {
            name: "web-server".to_string(),
            variants: vec![
                SourceVariant {
                    id: "stable".to_string(),
                    url: "https://example.com/web-server-1.0.14.tar.gz".to_string(),
                    checksum: Checksum::new(DigestAlgorithm::Md5, "abc123"),
                    version: None,
                    default: true,
                },
                SourceVariant {
                    id: "head".to_string(),
                    url: "https://example.com/web-server-head.tar.gz".to_string(),
                    checksum: Checksum::sha256("def456"),
                    version: None,
                    default: false,
                },
            ],
            options: vec![
                FormulaOption {
                    flag: "--with-passenger".to_string(),
                    description: "Phusion Passenger".to_string(),
                    effects: vec![OptionEffect::ToolRoot {
                        tool: "passenger-config".to_string(),
                        args: vec!["--root".to_string()],
                        template: "--add-module={root}/ext/nginx".to_string(),
                    }],
                },
                FormulaOption {
                    flag: "--with-webdav".to_string(),
                    description: "WebDAV".to_string(),
                    effects: vec![OptionEffect::Arg {
                        value: "--with-http_dav_module".to_string(),
                    }],
                },
                FormulaOption {
                    flag: "--with-mod-zip".to_string(),
                    description: "mod_zip".to_string(),
                    effects: vec![OptionEffect::Resource {
                        resource: Resource {
                            url: "https://example.com/mod_zip-1.1.6.tar.gz".to_string(),
                            checksum: Checksum::new(DigestAlgorithm::Sha1, "b241"),
                        },
                        template: "--add-module={path}".to_string(),
                    }],
                },
            ],
            install: InstallSpec {
                configure: Some(vec!["--prefix={prefix}".to_string()]),
                steps: vec![vec!["make".to_string()]],
            },
            ..Default::default()
        }
    }

    fn flags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_requested_variant_selects_default() {
        let spec = web_server();
        let resolved = resolve(&spec, None, &BTreeSet::new(), &FakeTools::none()).unwrap();

        assert_eq!(resolved.variant.id, "stable");
        assert_eq!(resolved.variant.checksum.digest, "abc123");
        assert_eq!(resolved.version, "1.0.14");
        assert!(resolved.args.is_empty());
    }

    #[test]
    fn requested_variant_is_selected() {
        let spec = web_server();
        let resolved = resolve(&spec, Some("head"), &BTreeSet::new(), &FakeTools::none()).unwrap();

        assert_eq!(resolved.variant.id, "head");
        // No version in the URL, so the variant id stands in
        assert_eq!(resolved.version, "head");
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let spec = web_server();
        let err = resolve(&spec, Some("devel"), &BTreeSet::new(), &FakeTools::none()).unwrap_err();
        assert_eq!(err, ResolveError::UnknownVariant("devel".to_string()));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let spec = web_server();
        let err = resolve(&spec, None, &flags(&["--with-gzip"]), &FakeTools::none()).unwrap_err();
        assert_eq!(err, ResolveError::UnknownOption("--with-gzip".to_string()));
    }

    #[test]
    fn failed_tool_lookup_is_option_unsatisfied() {
        let spec = web_server();
        let tools = FakeTools::none();
        let err = resolve(&spec, None, &flags(&["--with-passenger"]), &tools).unwrap_err();

        match err {
            ResolveError::OptionUnsatisfied { flag, detail } => {
                assert_eq!(flag, "--with-passenger");
                assert!(detail.contains("passenger-config"));
            }
            other => panic!("expected OptionUnsatisfied, got {:?}", other),
        }
    }

    #[test]
    fn tool_root_is_rendered_into_argument() {
        let spec = web_server();
        let tools = FakeTools::new(vec![("passenger-config", Ok(PathBuf::from("/gems/passenger")))]);
        let resolved = resolve(&spec, None, &flags(&["--with-passenger"]), &tools).unwrap();

        assert_eq!(
            resolved.args,
            vec![ConfigureArg::Literal("--add-module=/gems/passenger/ext/nginx".to_string())]
        );
    }

    #[test]
    fn option_effects_follow_declaration_order() {
        let spec = web_server();
        let tools = FakeTools::new(vec![("passenger-config", Ok(PathBuf::from("/p")))]);
        // BTreeSet order is alphabetical: mod-zip, passenger, webdav
        let resolved = resolve(
            &spec,
            None,
            &flags(&["--with-webdav", "--with-mod-zip", "--with-passenger"]),
            &tools,
        )
        .unwrap();

        assert_eq!(
            resolved.enabled,
            vec!["--with-passenger", "--with-webdav", "--with-mod-zip"]
        );
        assert_eq!(resolved.args[0], ConfigureArg::Literal("--add-module=/p/ext/nginx".to_string()));
        assert_eq!(resolved.args[1], ConfigureArg::Literal("--with-http_dav_module".to_string()));
        assert!(matches!(resolved.args[2], ConfigureArg::FromResource { .. }));
        assert_eq!(resolved.resources().len(), 1);
    }

    #[test]
    fn disabled_options_never_query_tools() {
        let spec = web_server();
        let tools = FakeTools::none();
        resolve(&spec, None, &flags(&["--with-webdav"]), &tools).unwrap();
        assert!(tools.calls.lock().unwrap().is_empty());
    }

    fn spec_with_variants(count: usize, default_index: usize) -> FormulaSpec {
        let variants = (0..count)
            .map(|i| SourceVariant {
                id: format!("v{}", i),
                url: format!("https://example.com/pkg-{}.0.tar.gz", i),
                checksum: Checksum::sha256(format!("{:064x}", i)),
                version: None,
                default: i == default_index,
            })
            .collect();
        FormulaSpec {
            name: "pkg".to_string(),
            variants,
            ..Default::default()
        }
    }

    proptest! {
        #[test]
        fn default_is_always_selected_without_request(
            (count, default_index) in (1usize..8).prop_flat_map(|n| (Just(n), 0..n))
        ) {
            let spec = spec_with_variants(count, default_index);
            prop_assert!(spec.validate().is_ok());

            let resolved = resolve(&spec, None, &BTreeSet::new(), &FakeTools::none()).unwrap();
            prop_assert_eq!(resolved.variant.id, format!("v{}", default_index));
        }
    }
}
