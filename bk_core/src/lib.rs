pub mod caveats;
pub mod errors;
pub mod formula;
pub mod formula_parser;
pub mod plan;
pub mod resolve;
pub mod roots;
pub mod service;

pub use caveats::render_caveats;
pub use errors::{
    BuildError, ExtractError, FetchError, FormulaError, IntegrityError, PatchError, ResolveError,
    Stage, ValidationError,
};
pub use formula::{
    Checksum, DigestAlgorithm, FormulaOption, FormulaSpec, OptionEffect, Patch, PatchSource,
    Resource, ServiceSpec, SourceVariant,
};
pub use formula_parser::{ParseError, parse_json_formula, parse_ruby_formula};
pub use plan::{Artifact, BuildPlan, BuildStep, PlanContext};
pub use resolve::{ConfigureArg, ResolvedConfig, ToolLocator, ToolLookupError, resolve};
pub use roots::{InstallRoots, TemplateVars};
pub use service::{DescriptorFormat, ServiceDescriptor};
