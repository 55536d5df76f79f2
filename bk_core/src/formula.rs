use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::ValidationError;

/// Identifier of the variant declared by the top-level `url`.
pub const DEFAULT_VARIANT: &str = "stable";

/// Archive suffixes the extractor understands, longest first.
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tar.xz", ".tar.zst", ".tgz", ".txz", ".tar"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FormulaSpec {
    pub name: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    pub variants: Vec<SourceVariant>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub options: Vec<FormulaOption>,
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub install: InstallSpec,
    #[serde(default)]
    pub service: Option<ServiceSpec>,
    #[serde(default)]
    pub caveats: Option<String>,
    /// Directories under the prefix a post-install cleanup must keep.
    ///
    /// Formula metadata only: the engine has no cleanup step, so nothing
    /// acts on it during an install.
    #[serde(default)]
    pub skip_clean: Vec<String>,
}

/// One downloadable source of the formula (stable, devel, head, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceVariant {
    pub id: String,
    pub url: String,
    pub checksum: Checksum,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: DigestAlgorithm,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormulaOption {
    pub flag: String,
    pub description: String,
    #[serde(default)]
    pub effects: Vec<OptionEffect>,
}

/// What enabling an option contributes to the build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionEffect {
    /// A fixed configure argument.
    Arg { value: String },
    /// Ask an installed tool for a directory and render `template` with `{root}`.
    ToolRoot {
        tool: String,
        #[serde(default)]
        args: Vec<String>,
        template: String,
    },
    /// Fetch an extra archive and render `template` with `{path}` set to its source dir.
    Resource { resource: Resource, template: String },
}

/// An extra archive fetched alongside the main source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patch {
    pub source: PatchSource,
    #[serde(default = "default_strip")]
    pub strip: u32,
    #[serde(default)]
    pub attribution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchSource {
    Inline { content: String },
    Remote(Resource),
}

/// The configure/build/install commands, before templating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InstallSpec {
    /// Arguments to `./configure`; `None` means the formula has no configure step.
    #[serde(default)]
    pub configure: Option<Vec<String>>,
    /// Commands run after configure, each `[program, args...]`.
    #[serde(default)]
    pub steps: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub program_args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_true")]
    pub run_at_load: bool,
    #[serde(default)]
    pub keep_alive: bool,
}

fn default_strip() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "md5" => Some(DigestAlgorithm::Md5),
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Length of the digest in hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Checksum {
    pub fn new(algorithm: DigestAlgorithm, digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            digest: digest.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn sha256(digest: impl Into<String>) -> Self {
        Self::new(DigestAlgorithm::Sha256, digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl SourceVariant {
    /// The explicit version, or one derived from the download URL.
    pub fn effective_version(&self) -> Option<String> {
        self.version
            .clone()
            .or_else(|| extract_version_from_url(&self.url))
    }

    pub fn archive_name(&self) -> Option<&str> {
        url_basename(&self.url)
    }
}

impl Resource {
    pub fn archive_name(&self) -> Option<&str> {
        url_basename(&self.url)
    }
}

impl FormulaSpec {
    pub fn default_variant(&self) -> Option<&SourceVariant> {
        self.variants.iter().find(|v| v.default)
    }

    pub fn variant(&self, id: &str) -> Option<&SourceVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn option(&self, flag: &str) -> Option<&FormulaOption> {
        self.options.iter().find(|o| o.flag == flag)
    }

    /// Check the structural rules every loaded formula must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.variants.is_empty() {
            return Err(ValidationError::NoVariants);
        }

        let defaults = self.variants.iter().filter(|v| v.default).count();
        if defaults != 1 {
            return Err(ValidationError::DefaultVariantCount(defaults));
        }

        let mut seen = BTreeSet::new();
        for variant in &self.variants {
            if !seen.insert(variant.id.as_str()) {
                return Err(ValidationError::DuplicateVariant(variant.id.clone()));
            }
            if variant.checksum.digest.is_empty() {
                return Err(ValidationError::MissingChecksum {
                    variant: variant.id.clone(),
                });
            }
        }

        let mut flags = BTreeSet::new();
        for option in &self.options {
            if !option.flag.starts_with("--") {
                return Err(ValidationError::InvalidOptionFlag(option.flag.clone()));
            }
            if !flags.insert(option.flag.as_str()) {
                return Err(ValidationError::DuplicateOption(option.flag.clone()));
            }
            if !option.effects.is_empty() && self.install.configure.is_none() {
                return Err(ValidationError::NoConfigureStep {
                    flag: option.flag.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Last path segment of a URL, ignoring any query string or fragment.
pub fn url_basename(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() || without_query.ends_with("//") || !without_query.contains('/') {
        return None;
    }
    Some(name)
}

/// Archive file name with its known archive suffix removed.
///
/// `nginx-1.0.14.tar.gz` becomes `nginx-1.0.14`.
pub fn archive_stem(file_name: &str) -> Option<&str> {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
}

/// Extracts version from a URL using common patterns.
pub fn extract_version_from_url(url: &str) -> Option<String> {
    // Common patterns:
    // - nginx-1.0.14.tar.gz
    // - archive/refs/tags/v1.2.3.tar.gz
    // - releases/download/v1.2.3/...
    let version_regex = regex::Regex::new(
        r"[-_/]v?(\d+\.\d+(?:\.\d+)*)(?:[-_.](?:tar|zip|gz|tgz|txz|xz|zst|bz2)|/|$)",
    )
    .ok()?;

    version_regex
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, default: bool, digest: &str) -> SourceVariant {
        SourceVariant {
            id: id.to_string(),
            url: format!("https://example.com/foo-{id}-1.0.tar.gz"),
            checksum: Checksum::sha256(digest),
            version: None,
            default,
        }
    }

    fn spec_with(variants: Vec<SourceVariant>) -> FormulaSpec {
        FormulaSpec {
            name: "foo".to_string(),
            variants,
            ..Default::default()
        }
    }

    #[test]
    fn deserialize_formula_fixture() {
        let fixture = include_str!("../fixtures/nginx.json");
        let spec: FormulaSpec = serde_json::from_str(fixture).unwrap();

        assert_eq!(spec.name, "nginx");
        assert_eq!(spec.variants.len(), 2);
        assert_eq!(spec.default_variant().unwrap().id, "stable");
        assert_eq!(spec.options.len(), 3);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn patch_strip_defaults_to_one() {
        let json = r#"{"source": {"kind": "inline", "content": "--- a/x\n+++ b/x\n"}}"#;
        let patch: Patch = serde_json::from_str(json).unwrap();
        assert_eq!(patch.strip, 1);
        assert!(patch.attribution.is_empty());
    }

    #[test]
    fn resource_deserializes_and_names_its_archive() {
        let json = r#"{"url": "http://mod-zip.googlecode.com/files/mod_zip-1.1.6.tar.gz",
                       "checksum": {"algorithm": "sha1", "digest": "b241e624cf98c3ae45d289df20df1132ab4f76d5"}}"#;
        let resource: Resource = serde_json::from_str(json).unwrap();

        assert_eq!(resource.archive_name(), Some("mod_zip-1.1.6.tar.gz"));
        assert_eq!(resource.checksum.algorithm, DigestAlgorithm::Sha1);
        assert_eq!(resource.clone(), resource);
    }

    #[test]
    fn checksum_is_normalized_to_lowercase() {
        let checksum = Checksum::new(DigestAlgorithm::Md5, " ABCDEF ");
        assert_eq!(checksum.digest, "abcdef");
        assert_eq!(checksum.to_string(), "md5:abcdef");
    }

    #[test]
    fn validate_rejects_missing_checksum() {
        let spec = spec_with(vec![variant("stable", true, "")]);
        assert_eq!(
            spec.validate(),
            Err(ValidationError::MissingChecksum {
                variant: "stable".to_string()
            })
        );
    }

    #[test]
    fn validate_requires_exactly_one_default() {
        let none = spec_with(vec![variant("devel", false, "aa")]);
        assert_eq!(none.validate(), Err(ValidationError::DefaultVariantCount(0)));

        let two = spec_with(vec![variant("stable", true, "aa"), variant("devel", true, "bb")]);
        assert_eq!(two.validate(), Err(ValidationError::DefaultVariantCount(2)));
    }

    #[test]
    fn validate_rejects_duplicate_variant_ids() {
        let spec = spec_with(vec![variant("stable", true, "aa"), variant("stable", false, "bb")]);
        assert_eq!(
            spec.validate(),
            Err(ValidationError::DuplicateVariant("stable".to_string()))
        );
    }

    #[test]
    fn validate_rejects_bad_option_flags() {
        let mut spec = spec_with(vec![variant("stable", true, "aa")]);
        spec.options.push(FormulaOption {
            flag: "with-webdav".to_string(),
            description: "WebDAV".to_string(),
            effects: vec![],
        });
        assert_eq!(
            spec.validate(),
            Err(ValidationError::InvalidOptionFlag("with-webdav".to_string()))
        );
    }

    #[test]
    fn validate_rejects_option_args_without_configure() {
        let mut spec = spec_with(vec![variant("stable", true, "aa")]);
        spec.options.push(FormulaOption {
            flag: "--with-webdav".to_string(),
            description: "WebDAV".to_string(),
            effects: vec![OptionEffect::Arg {
                value: "--with-http_dav_module".to_string(),
            }],
        });
        assert_eq!(
            spec.validate(),
            Err(ValidationError::NoConfigureStep {
                flag: "--with-webdav".to_string()
            })
        );
    }

    #[test]
    fn effective_version_prefers_explicit() {
        let mut v = variant("stable", true, "aa");
        assert_eq!(v.effective_version().as_deref(), Some("1.0"));
        v.version = Some("7.3.462".to_string());
        assert_eq!(v.effective_version().as_deref(), Some("7.3.462"));
    }

    #[test]
    fn url_basename_handles_queries_and_trailing_slashes() {
        assert_eq!(
            url_basename("http://nginx.org/download/nginx-1.0.14.tar.gz"),
            Some("nginx-1.0.14.tar.gz")
        );
        assert_eq!(
            url_basename("https://example.com/dl/foo-1.0.tar.gz?mirror=1"),
            Some("foo-1.0.tar.gz")
        );
        assert_eq!(url_basename("https://example.com/"), Some("example.com"));
        assert_eq!(url_basename("nonsense"), None);
    }

    #[test]
    fn archive_stem_strips_known_suffixes() {
        assert_eq!(archive_stem("nginx-1.0.14.tar.gz"), Some("nginx-1.0.14"));
        assert_eq!(archive_stem("mod_zip-1.1.6.tgz"), Some("mod_zip-1.1.6"));
        assert_eq!(archive_stem("foo-2.0.tar.xz"), Some("foo-2.0"));
        assert_eq!(archive_stem("foo-2.0.tar"), Some("foo-2.0"));
        assert_eq!(archive_stem("foo-2.0.zip"), None);
        assert_eq!(archive_stem(".tar.gz"), None);
    }

    #[test]
    fn extract_version_from_url_works() {
        assert_eq!(
            extract_version_from_url("http://nginx.org/download/nginx-1.0.14.tar.gz"),
            Some("1.0.14".to_string())
        );
        assert_eq!(
            extract_version_from_url("http://mod-zip.googlecode.com/files/mod_zip-1.1.6.tar.gz"),
            Some("1.1.6".to_string())
        );
        assert_eq!(
            extract_version_from_url("https://github.com/foo/bar/archive/refs/tags/v2.0.0.tar.gz"),
            Some("2.0.0".to_string())
        );
        assert_eq!(
            extract_version_from_url("https://example.com/vim-7.3.462.tar.gz"),
            Some("7.3.462".to_string())
        );
    }
}
