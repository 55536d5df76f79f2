//! Build plan construction.
//!
//! A [`BuildPlan`] is the fully rendered list of commands an install runs,
//! plus the files written once they all succeed. Building a plan has no side
//! effects; the same inputs always produce the same plan.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::formula::{FormulaSpec, archive_stem};
use crate::resolve::{ConfigureArg, ResolvedConfig};
use crate::roots::{InstallRoots, TemplateVars};
use crate::service::{DESCRIPTOR_MODE, DescriptorFormat, ServiceDescriptor, descriptor_path};

/// Program name of the configure step.
pub const CONFIGURE: &str = "./configure";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
}

/// A file written after all steps succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: String,
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildPlan {
    pub formula: String,
    pub version: String,
    pub variant: String,
    pub working_dir: PathBuf,
    pub steps: Vec<BuildStep>,
    pub artifacts: Vec<Artifact>,
}

/// Everything besides the formula and resolution that shapes a plan.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    pub roots: &'a InstallRoots,
    /// Extracted main source tree; steps run here.
    pub source_dir: &'a Path,
    /// Directory option resources are extracted into.
    pub resources_dir: &'a Path,
    pub service_user: &'a str,
    pub descriptor_format: DescriptorFormat,
}

impl BuildStep {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Shell-style rendering used in logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl BuildPlan {
    pub fn new(spec: &FormulaSpec, resolved: &ResolvedConfig, ctx: &PlanContext<'_>) -> Self {
        let vars = TemplateVars::for_install(&spec.name, &resolved.version, ctx.roots);
        let mut steps = Vec::new();

        if let Some(ref configure) = spec.install.configure {
            let mut args: Vec<String> = configure.iter().map(|a| vars.render(a)).collect();
            args.extend(resolved.args.iter().map(|arg| render_option_arg(arg, &vars, ctx.resources_dir)));
            steps.push(BuildStep::new(CONFIGURE, args));
        }

        for step in &spec.install.steps {
            let Some((program, args)) = step.split_first() else {
                continue;
            };
            steps.push(BuildStep::new(
                vars.render(program),
                args.iter().map(|a| vars.render(a)).collect(),
            ));
        }

        let mut artifacts = Vec::new();
        if let Some(ref service) = spec.service {
            let descriptor = ServiceDescriptor::from_spec(&spec.name, service, &vars, ctx.service_user);
            artifacts.push(Artifact {
                path: descriptor_path(ctx.roots, &spec.name, ctx.descriptor_format),
                contents: descriptor.render(ctx.descriptor_format),
                mode: DESCRIPTOR_MODE,
            });
        }

        Self {
            formula: spec.name.clone(),
            version: resolved.version.clone(),
            variant: resolved.variant.id.clone(),
            working_dir: ctx.source_dir.to_path_buf(),
            steps,
            artifacts,
        }
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.command_line()).collect()
    }
}

/// Where a resource's source tree ends up once extracted.
pub fn resource_source_dir(resources_dir: &Path, url: &str) -> PathBuf {
    let name = crate::formula::url_basename(url).unwrap_or(url);
    resources_dir.join(archive_stem(name).unwrap_or(name))
}

fn render_option_arg(arg: &ConfigureArg, vars: &TemplateVars, resources_dir: &Path) -> String {
    match arg {
        ConfigureArg::Literal(value) => vars.render(value),
        ConfigureArg::FromResource { resource, template } => {
            let dir = resource_source_dir(resources_dir, &resource.url);
            vars.clone().with("path", dir.to_string_lossy()).render(template)
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
