pub mod autofix;
pub mod executor;
pub mod state;

pub use executor::{BuildConfig, BuildDeps, BuildOrchestrator, BuildSummary};
pub use state::{StateEntry, StateManager};
