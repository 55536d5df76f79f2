use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::formula::DigestAlgorithm;

/// Pipeline stage a failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Resolve,
    Fetch,
    Integrity,
    Extract,
    Patch,
    Build,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Integrity => "integrity",
            Stage::Extract => "extract",
            Stage::Patch => "patch",
            Stage::Build => "build",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    Mismatch {
        file: String,
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },
    Unreadable {
        path: PathBuf,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    NetworkFailure { url: String, message: String },
    NotFound { url: String },
    InvalidUrl { url: String },
    Io { path: PathBuf, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractError {
    CorruptArchive { archive: PathBuf, message: String },
    UnsupportedFormat { archive: PathBuf },
    MissingSourceDir { archive: PathBuf, expected: PathBuf },
    Io { path: PathBuf, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchError {
    RejectedHunk {
        patch_index: usize,
        attribution: String,
        detail: String,
    },
    ToolUnavailable {
        message: String,
    },
    Unreadable {
        patch_index: usize,
        path: PathBuf,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    UnknownVariant(String),
    UnknownOption(String),
    OptionUnsatisfied { flag: String, detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    StepFailed {
        step_index: usize,
        command: String,
        output: String,
    },
    SpawnFailed {
        step_index: usize,
        command: String,
        message: String,
    },
    Cancelled {
        step_index: usize,
        command: String,
    },
    DeadlineExceeded {
        step_index: usize,
        command: String,
        deadline: Duration,
    },
    ArtifactWrite {
        path: PathBuf,
        message: String,
    },
}

impl BuildError {
    /// The command that was running when the build stopped, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            BuildError::StepFailed { command, .. }
            | BuildError::SpawnFailed { command, .. }
            | BuildError::Cancelled { command, .. }
            | BuildError::DeadlineExceeded { command, .. } => Some(command),
            BuildError::ArtifactWrite { .. } => None,
        }
    }

    pub fn step_index(&self) -> Option<usize> {
        match self {
            BuildError::StepFailed { step_index, .. }
            | BuildError::SpawnFailed { step_index, .. }
            | BuildError::Cancelled { step_index, .. }
            | BuildError::DeadlineExceeded { step_index, .. } => Some(*step_index),
            BuildError::ArtifactWrite { .. } => None,
        }
    }
}

/// A formula that breaks one of the structural rules checked at load time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    MissingName,
    NoVariants,
    DefaultVariantCount(usize),
    DuplicateVariant(String),
    MissingChecksum { variant: String },
    DuplicateOption(String),
    InvalidOptionFlag(String),
    NoConfigureStep { flag: String },
}

/// Failure of an install run, tagged with the stage it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormulaError {
    Invalid(ValidationError),
    Resolve(ResolveError),
    Fetch(FetchError),
    Integrity(IntegrityError),
    Extract(ExtractError),
    Patch(PatchError),
    Build(BuildError),
}

impl FormulaError {
    pub fn stage(&self) -> Stage {
        match self {
            FormulaError::Invalid(_) => Stage::Validate,
            FormulaError::Resolve(_) => Stage::Resolve,
            FormulaError::Fetch(_) => Stage::Fetch,
            FormulaError::Integrity(_) => Stage::Integrity,
            FormulaError::Extract(_) => Stage::Extract,
            FormulaError::Patch(_) => Stage::Patch,
            FormulaError::Build(_) => Stage::Build,
        }
    }
}

impl From<ValidationError> for FormulaError {
    fn from(e: ValidationError) -> Self {
        FormulaError::Invalid(e)
    }
}

impl From<ResolveError> for FormulaError {
    fn from(e: ResolveError) -> Self {
        FormulaError::Resolve(e)
    }
}

impl From<FetchError> for FormulaError {
    fn from(e: FetchError) -> Self {
        FormulaError::Fetch(e)
    }
}

impl From<IntegrityError> for FormulaError {
    fn from(e: IntegrityError) -> Self {
        FormulaError::Integrity(e)
    }
}

impl From<ExtractError> for FormulaError {
    fn from(e: ExtractError) -> Self {
        FormulaError::Extract(e)
    }
}

impl From<PatchError> for FormulaError {
    fn from(e: PatchError) -> Self {
        FormulaError::Patch(e)
    }
}

impl From<BuildError> for FormulaError {
    fn from(e: BuildError) -> Self {
        FormulaError::Build(e)
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::Mismatch {
                file,
                algorithm,
                expected,
                actual,
            } => {
                write!(f, "{} checksum verification failed for '{}'", algorithm, file)?;
                write!(f, "\n  expected: {}\n  got:      {}", expected, actual)?;
                write!(
                    f,
                    "\n  hint: the download may be corrupted or stale; delete the cached file and try again"
                )
            }
            IntegrityError::Unreadable { path, message } => {
                write!(f, "cannot read '{}' for verification: {}", path.display(), message)
            }
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NetworkFailure { url, message } => {
                write!(
                    f,
                    "network error while fetching {}: {}\n  hint: check your internet connection and try again",
                    url, message
                )
            }
            FetchError::NotFound { url } => {
                write!(
                    f,
                    "{} was not found (HTTP 404)\n  hint: the formula URL may be outdated",
                    url
                )
            }
            FetchError::InvalidUrl { url } => {
                write!(f, "cannot derive a file name from URL '{}'", url)
            }
            FetchError::Io { path, message } => {
                write!(f, "failed to write download {}: {}", path.display(), message)
            }
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::CorruptArchive { archive, message } => {
                write!(f, "corrupt archive {}: {}", archive.display(), message)
            }
            ExtractError::UnsupportedFormat { archive } => {
                write!(
                    f,
                    "unsupported archive format: {}\n  hint: supported suffixes are .tar.gz, .tgz, .tar.xz, .txz, .tar.zst and .tar",
                    archive.display()
                )
            }
            ExtractError::MissingSourceDir { archive, expected } => {
                write!(
                    f,
                    "archive {} did not unpack into {}",
                    archive.display(),
                    expected.display()
                )
            }
            ExtractError::Io { path, message } => {
                write!(f, "failed to prepare {}: {}", path.display(), message)
            }
        }
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::RejectedHunk {
                patch_index,
                attribution,
                detail,
            } => {
                write!(f, "patch #{} ({}) did not apply", patch_index, attribution)?;
                if !detail.is_empty() {
                    write!(f, "\n{}", detail.trim_end())?;
                }
                write!(
                    f,
                    "\n  hint: the source tree is left as-is; start again from a fresh extraction"
                )
            }
            PatchError::ToolUnavailable { message } => {
                write!(
                    f,
                    "cannot run the patch tool: {}\n  hint: install GNU or BSD patch and make sure it is on PATH",
                    message
                )
            }
            PatchError::Unreadable {
                patch_index,
                path,
                message,
            } => {
                write!(
                    f,
                    "cannot read patch #{} from {}: {}\n  hint: remote patches must be UTF-8 text; delete the file to download it again",
                    patch_index,
                    path.display(),
                    message
                )
            }
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::UnknownVariant(name) => {
                write!(f, "formula has no variant named '{}'", name)
            }
            ResolveError::UnknownOption(flag) => {
                write!(
                    f,
                    "unknown option '{}'\n  hint: run 'bk options <formula>' to list supported options",
                    flag
                )
            }
            ResolveError::OptionUnsatisfied { flag, detail } => {
                write!(
                    f,
                    "option '{}' cannot be satisfied: {}\n  hint: install what the option needs or build without it",
                    flag, detail
                )
            }
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::StepFailed {
                step_index,
                command,
                output,
            } => {
                write!(f, "step {} failed: {}", step_index, command)?;
                if !output.is_empty() {
                    write!(f, "\n{}", output.trim_end())?;
                }
                Ok(())
            }
            BuildError::SpawnFailed {
                step_index,
                command,
                message,
            } => write!(f, "step {} could not start: {}: {}", step_index, command, message),
            BuildError::Cancelled {
                step_index,
                command,
            } => write!(
                f,
                "step {} cancelled: {}\n  hint: the build tree was left in its partial state",
                step_index, command
            ),
            BuildError::DeadlineExceeded {
                step_index,
                command,
                deadline,
            } => write!(
                f,
                "step {} exceeded the {}s deadline: {}",
                step_index,
                deadline.as_secs(),
                command
            ),
            BuildError::ArtifactWrite { path, message } => {
                write!(f, "failed to write {}: {}", path.display(), message)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingName => write!(f, "formula has no name"),
            ValidationError::NoVariants => write!(f, "formula declares no source URL"),
            ValidationError::DefaultVariantCount(n) => {
                write!(f, "formula must have exactly one default variant, found {}", n)
            }
            ValidationError::DuplicateVariant(id) => {
                write!(f, "variant '{}' is declared more than once", id)
            }
            ValidationError::MissingChecksum { variant } => {
                write!(
                    f,
                    "variant '{}' has no checksum\n  hint: add an md5, sha1 or sha256 line next to its url",
                    variant
                )
            }
            ValidationError::DuplicateOption(flag) => {
                write!(f, "option '{}' is declared more than once", flag)
            }
            ValidationError::InvalidOptionFlag(flag) => {
                write!(f, "option flag '{}' must start with '--'", flag)
            }
            ValidationError::NoConfigureStep { flag } => {
                write!(
                    f,
                    "option '{}' adds configure arguments but the formula has no configure step",
                    flag
                )
            }
        }
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: ", self.stage())?;
        match self {
            FormulaError::Invalid(e) => e.fmt(f),
            FormulaError::Resolve(e) => e.fmt(f),
            FormulaError::Fetch(e) => e.fmt(f),
            FormulaError::Integrity(e) => e.fmt(f),
            FormulaError::Extract(e) => e.fmt(f),
            FormulaError::Patch(e) => e.fmt(f),
            FormulaError::Build(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for IntegrityError {}
impl std::error::Error for FetchError {}
impl std::error::Error for ExtractError {}
impl std::error::Error for PatchError {}
impl std::error::Error for ResolveError {}
impl std::error::Error for BuildError {}
impl std::error::Error for ValidationError {}

impl std::error::Error for FormulaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormulaError::Invalid(e) => Some(e),
            FormulaError::Resolve(e) => Some(e),
            FormulaError::Fetch(e) => Some(e),
            FormulaError::Integrity(e) => Some(e),
            FormulaError::Extract(e) => Some(e),
            FormulaError::Patch(e) => Some(e),
            FormulaError::Build(e) => Some(e),
        }
    }
}
