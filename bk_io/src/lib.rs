pub mod engine;
pub mod executor;
pub mod extract;
pub mod fetch;
pub mod integrity;
pub mod patch;
pub mod progress;
pub mod tools;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::{FormulaEngine, FormulaEngineBuilder};
pub use executor::{Cancellation, Executor, InstallResult, StepOutput};
pub use extract::extract;
pub use fetch::{Fetched, Fetcher};
pub use integrity::{bytes_digest, file_digest, verify};
pub use patch::PreparedPatch;
pub use progress::{InstallProgress, ProgressCallback};
pub use tools::SystemToolLocator;
pub use traits::{HttpClient, ReqwestHttpClient};
