//! brewkit CLI - install software from source formulas.

use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::time::Duration;

use bk_core::InstallRoots;

mod commands;
mod display;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "bk")]
#[command(about = "brewkit - fetch, verify, patch and build software from formulas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, verify, patch and build a formula
    Install {
        /// Formula file (.rb or .json)
        formula: PathBuf,

        #[command(flatten)]
        variant: VariantArgs,

        #[command(flatten)]
        roots: RootArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Kill a build step that runs longer than this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Print the install result as JSON
        #[arg(long)]
        json: bool,

        /// Option flags to enable, e.g. -- --with-webdav
        #[arg(last = true, value_name = "OPTION_FLAGS")]
        options: Vec<String>,
    },

    /// List the options a formula declares
    Options {
        /// Formula file (.rb or .json)
        formula: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show post-install guidance
    Caveats {
        /// Formula file (.rb or .json)
        formula: PathBuf,

        #[command(flatten)]
        roots: RootArgs,
    },

    /// Print the commands install would run, without running them
    Plan {
        /// Formula file (.rb or .json)
        formula: PathBuf,

        #[command(flatten)]
        variant: VariantArgs,

        #[command(flatten)]
        roots: RootArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Output the full plan as JSON
        #[arg(long)]
        json: bool,

        /// Option flags to enable, e.g. -- --with-webdav
        #[arg(last = true, value_name = "OPTION_FLAGS")]
        options: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct VariantArgs {
    /// Build the development release
    #[arg(long, group = "variant_choice")]
    devel: bool,

    /// Build the HEAD variant
    #[arg(long = "HEAD", group = "variant_choice")]
    head: bool,

    /// Build a named variant
    #[arg(long = "variant", value_name = "NAME", group = "variant_choice")]
    name: Option<String>,
}

impl VariantArgs {
    /// The requested variant id, or `None` for the formula's default.
    pub fn requested(&self) -> Option<String> {
        if self.devel {
            Some("devel".to_string())
        } else if self.head {
            Some("head".to_string())
        } else {
            self.name.clone()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RootArgs {
    /// Install prefix
    #[arg(long, default_value = "/usr/local")]
    prefix: PathBuf,

    /// Configuration directory (default: <prefix>/etc)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Runtime directory for pid files (default: <prefix>/var/run)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Lock/state directory (default: <prefix>/var)
    #[arg(long)]
    lock_dir: Option<PathBuf>,
}

impl RootArgs {
    pub fn roots(&self) -> InstallRoots {
        let defaults = InstallRoots::under_prefix(&self.prefix);
        InstallRoots {
            config_dir: self.config_dir.clone().unwrap_or(defaults.config_dir),
            runtime_dir: self.runtime_dir.clone().unwrap_or(defaults.runtime_dir),
            lock_dir: self.lock_dir.clone().unwrap_or(defaults.lock_dir),
            prefix: defaults.prefix,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Directory for downloads and build trees (default: <prefix>/var/brewkit)
    #[arg(long)]
    work_root: Option<PathBuf>,

    /// User written into generated service descriptors (default: $USER)
    #[arg(long)]
    user: Option<String>,
}

/// Engine settings after defaults are applied.
pub struct EngineSettings {
    pub work_root: PathBuf,
    pub service_user: String,
    pub deadline: Option<Duration>,
}

impl EngineArgs {
    fn settings(&self, roots: &InstallRoots, deadline: Option<u64>) -> EngineSettings {
        EngineSettings {
            work_root: self
                .work_root
                .clone()
                .unwrap_or_else(|| roots.prefix.join("var/brewkit")),
            service_user: self.user.clone().unwrap_or_else(default_user),
            deadline: deadline.map(Duration::from_secs),
        }
    }
}

fn default_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| bk_io::engine::DEFAULT_SERVICE_USER.to_string())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Install {
            formula,
            variant,
            roots,
            engine,
            deadline,
            json,
            options,
        } => {
            let roots = roots.roots();
            let settings = engine.settings(&roots, deadline);
            commands::install::run(&formula, variant.requested(), options, &roots, settings, json).await
        }

        Commands::Options { formula, json } => commands::options::run(&formula, json),

        Commands::Caveats { formula, roots } => commands::caveats::run(&formula, &roots.roots()),

        Commands::Plan {
            formula,
            variant,
            roots,
            engine,
            json,
            options,
        } => {
            let roots = roots.roots();
            let settings = engine.settings(&roots, None);
            commands::plan::run(&formula, variant.requested(), options, &roots, settings, json)
        }
    }
}
