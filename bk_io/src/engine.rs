//! The formula engine: one pipeline from formula to installed software.
//!
//! ```text
//! resolve -> fetch -> verify -> extract -> patch -> plan -> execute
//! ```
//!
//! Every file is downloaded and verified before anything is extracted, so a
//! checksum mismatch never leaves a source tree behind. Each stage's error is
//! wrapped in [`FormulaError`], which records the stage it came from.
//!
//! Patch text, inline or downloaded, is rendered with the install template
//! variables before it is applied, so a diff can refer to `{prefix}`.
//!
//! Work directories are keyed by formula name:
//!
//! ```text
//! <work_root>/downloads/<url key>/<url basename>
//! <work_root>/build/<name>/<archive stem>/     main source, steps run here
//! <work_root>/build/<name>/resources/<stem>/   option resources
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use bk_core::formula::{Checksum, PatchSource, SourceVariant, archive_stem, url_basename};
use bk_core::plan::{BuildPlan, PlanContext};
use bk_core::{
    DescriptorFormat, ExtractError, FetchError, FormulaError, FormulaOption, FormulaSpec,
    InstallRoots, PatchError, ResolvedConfig, Stage, TemplateVars, ToolLocator, render_caveats,
    resolve,
};

use crate::executor::{Cancellation, Executor, InstallResult};
use crate::extract::extract;
use crate::fetch::Fetcher;
use crate::integrity;
use crate::patch::{self, PreparedPatch};
use crate::progress::{InstallProgress, ProgressCallback};
use crate::tools::SystemToolLocator;
use crate::traits::{HttpClient, ReqwestHttpClient};

/// Service user written into descriptors when none is configured.
pub const DEFAULT_SERVICE_USER: &str = "root";

pub struct FormulaEngine {
    fetcher: Fetcher,
    tools: Arc<dyn ToolLocator>,
    work_root: PathBuf,
    service_user: String,
    descriptor_format: DescriptorFormat,
    executor: Executor,
    progress: Option<Arc<ProgressCallback>>,
}

pub struct FormulaEngineBuilder {
    http: Option<Arc<dyn HttpClient>>,
    tools: Option<Arc<dyn ToolLocator>>,
    work_root: PathBuf,
    service_user: String,
    descriptor_format: DescriptorFormat,
    cancellation: Option<Cancellation>,
    deadline: Option<Duration>,
    download_timeout: Option<Duration>,
    progress: Option<Arc<ProgressCallback>>,
}

/// A downloaded file waiting for verification.
struct Download {
    url: String,
    path: PathBuf,
    checksum: Checksum,
}

impl FormulaEngineBuilder {
    fn new(work_root: PathBuf) -> Self {
        Self {
            http: None,
            tools: None,
            work_root,
            service_user: DEFAULT_SERVICE_USER.to_string(),
            descriptor_format: DescriptorFormat::native(),
            cancellation: None,
            deadline: None,
            download_timeout: None,
            progress: None,
        }
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn tool_locator(mut self, tools: Arc<dyn ToolLocator>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn service_user(mut self, user: impl Into<String>) -> Self {
        self.service_user = user.into();
        self
    }

    pub fn descriptor_format(mut self, format: DescriptorFormat) -> Self {
        self.descriptor_format = format;
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Per-step wall-clock limit for build steps.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    pub fn progress(mut self, progress: Arc<ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> FormulaEngine {
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let tools = self
            .tools
            .unwrap_or_else(|| Arc::new(SystemToolLocator::new()));

        let mut fetcher = Fetcher::new(http, &self.work_root);
        if let Some(timeout) = self.download_timeout {
            fetcher = fetcher.with_timeout(timeout);
        }

        let mut executor = Executor::new();
        if let Some(cancellation) = self.cancellation {
            executor = executor.with_cancellation(cancellation);
        }
        if let Some(deadline) = self.deadline {
            executor = executor.with_deadline(deadline);
        }
        if let Some(ref progress) = self.progress {
            executor = executor.with_progress(progress.clone());
        }

        FormulaEngine {
            fetcher,
            tools,
            work_root: self.work_root,
            service_user: self.service_user,
            descriptor_format: self.descriptor_format,
            executor,
            progress: self.progress,
        }
    }
}

impl FormulaEngine {
    pub fn builder(work_root: impl Into<PathBuf>) -> FormulaEngineBuilder {
        FormulaEngineBuilder::new(work_root.into())
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Options the formula declares, in declaration order.
    pub fn list_options<'a>(&self, spec: &'a FormulaSpec) -> &'a [FormulaOption] {
        &spec.options
    }

    /// Post-install guidance rendered for `roots`.
    pub fn caveats(&self, spec: &FormulaSpec, roots: &InstallRoots) -> Option<String> {
        render_caveats(spec, roots, self.descriptor_format)
    }

    /// Resolve and render the plan `install` would run, without side effects.
    pub fn plan(
        &self,
        spec: &FormulaSpec,
        requested_variant: Option<&str>,
        enabled_options: &BTreeSet<String>,
        roots: &InstallRoots,
    ) -> Result<BuildPlan, FormulaError> {
        spec.validate()?;
        let resolved = resolve(spec, requested_variant, enabled_options, self.tools.as_ref())?;
        let source_dir = self.source_dir(spec, &resolved.variant)?;
        Ok(self.build_plan(spec, &resolved, roots, &source_dir))
    }

    /// Run the whole pipeline for one formula.
    ///
    /// # Errors
    /// The first failing stage aborts the install; the returned
    /// [`FormulaError`] names that stage.
    pub async fn install(
        &self,
        spec: &FormulaSpec,
        requested_variant: Option<&str>,
        enabled_options: &BTreeSet<String>,
        roots: &InstallRoots,
    ) -> Result<InstallResult, FormulaError> {
        spec.validate()?;

        self.stage(Stage::Resolve);
        let resolved = resolve(spec, requested_variant, enabled_options, self.tools.as_ref())?;
        info!(
            formula = %spec.name,
            variant = %resolved.variant.id,
            version = %resolved.version,
            options = ?resolved.enabled,
            "resolved"
        );

        self.stage(Stage::Fetch);
        let main = self.download(&resolved.variant.url, &resolved.variant.checksum).await?;
        let mut resources = Vec::new();
        for resource in resolved.resources() {
            resources.push(self.download(&resource.url, &resource.checksum).await?);
        }
        let mut remote_patches = Vec::new();
        for patch in &spec.patches {
            if let PatchSource::Remote(ref resource) = patch.source {
                remote_patches.push(self.download(&resource.url, &resource.checksum).await?);
            }
        }

        self.stage(Stage::Integrity);
        for download in std::iter::once(&main)
            .chain(resources.iter())
            .chain(remote_patches.iter())
        {
            integrity::verify(&download.path, &download.checksum)?;
            self.report(InstallProgress::Verified {
                name: download_name(&download.url),
            });
        }

        self.stage(Stage::Extract);
        let build_dir = self.build_dir(spec);
        let source_dir = self.unpack(&main, &build_dir)?;
        let resources_dir = build_dir.join("resources");
        for resource in &resources {
            self.unpack(resource, &resources_dir)?;
        }

        self.stage(Stage::Patch);
        let vars = TemplateVars::for_install(&spec.name, &resolved.version, roots);
        let prepared = prepare_patches(spec, &remote_patches, &vars)?;
        patch::apply(&source_dir, &prepared).await?;
        for (index, patch) in prepared.iter().enumerate() {
            self.report(InstallProgress::PatchApplied {
                index,
                attribution: patch.attribution.clone(),
            });
        }

        self.stage(Stage::Build);
        let plan = self.build_plan(spec, &resolved, roots, &source_dir);
        let mut result = self.executor.execute(&plan).await?;
        result.caveats = self.caveats(spec, roots);

        info!(formula = %spec.name, version = %result.version, "installed");
        self.report(InstallProgress::InstallCompleted {
            name: spec.name.clone(),
        });

        Ok(result)
    }

    fn build_plan(
        &self,
        spec: &FormulaSpec,
        resolved: &ResolvedConfig,
        roots: &InstallRoots,
        source_dir: &Path,
    ) -> BuildPlan {
        let resources_dir = self.build_dir(spec).join("resources");
        let ctx = PlanContext {
            roots,
            source_dir,
            resources_dir: &resources_dir,
            service_user: &self.service_user,
            descriptor_format: self.descriptor_format,
        };
        BuildPlan::new(spec, resolved, &ctx)
    }

    fn build_dir(&self, spec: &FormulaSpec) -> PathBuf {
        self.work_root.join("build").join(&spec.name)
    }

    /// Where the variant's archive unpacks to; matches what `extract` returns.
    fn source_dir(&self, spec: &FormulaSpec, variant: &SourceVariant) -> Result<PathBuf, FormulaError> {
        let name = url_basename(&variant.url).ok_or_else(|| FetchError::InvalidUrl {
            url: variant.url.clone(),
        })?;
        let archive = self.fetcher.destination(&variant.url)?;
        let stem = archive_stem(name).ok_or(ExtractError::UnsupportedFormat { archive })?;
        Ok(self.build_dir(spec).join(stem))
    }

    async fn download(&self, url: &str, checksum: &Checksum) -> Result<Download, FetchError> {
        let name = download_name(url);
        self.report(InstallProgress::DownloadStarted { name: name.clone() });

        let fetched = self.fetcher.fetch(url).await?;
        match fetched.downloaded {
            Some(total_bytes) => self.report(InstallProgress::DownloadCompleted { name, total_bytes }),
            None => self.report(InstallProgress::DownloadReused { name }),
        }

        Ok(Download {
            url: url.to_string(),
            path: fetched.path,
            checksum: checksum.clone(),
        })
    }

    fn unpack(&self, download: &Download, dest: &Path) -> Result<PathBuf, ExtractError> {
        let name = download_name(&download.url);
        self.report(InstallProgress::UnpackStarted { name: name.clone() });
        let dir = extract(&download.path, dest)?;
        self.report(InstallProgress::UnpackCompleted { name });
        Ok(dir)
    }

    fn stage(&self, stage: Stage) {
        info!(%stage, "stage started");
        self.report(InstallProgress::StageStarted { stage });
    }

    fn report(&self, event: InstallProgress) {
        if let Some(ref cb) = self.progress {
            cb(event);
        }
    }
}

/// Patch diffs in declaration order, rendered with `vars`.
///
/// Remote diffs are read from their verified downloads, which `remote`
/// holds in the same order as the remote entries of `spec.patches`.
fn prepare_patches(
    spec: &FormulaSpec,
    remote: &[Download],
    vars: &TemplateVars,
) -> Result<Vec<PreparedPatch>, PatchError> {
    let mut remote = remote.iter();
    let mut prepared = Vec::with_capacity(spec.patches.len());

    for (index, patch) in spec.patches.iter().enumerate() {
        let content = match patch.source {
            PatchSource::Inline { ref content } => content.clone(),
            PatchSource::Remote(ref resource) => {
                let download = remote.next().ok_or_else(|| PatchError::Unreadable {
                    patch_index: index,
                    path: PathBuf::from(&resource.url),
                    message: "no download for this patch".to_string(),
                })?;
                read_patch(index, &download.path)?
            }
        };
        prepared.push(PreparedPatch::new(patch, vars.render(&content)));
    }

    Ok(prepared)
}

fn read_patch(index: usize, path: &Path) -> Result<String, PatchError> {
    let unreadable = |message: String| PatchError::Unreadable {
        patch_index: index,
        path: path.to_path_buf(),
        message,
    };
    let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| unreadable(e.to_string()))
}

fn download_name(url: &str) -> String {
    url_basename(url).unwrap_or(url).to_string()
}
