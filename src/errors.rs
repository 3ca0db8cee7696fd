//! Typed error hierarchy for the kiln build orchestrator.
//!
//! Four top-level enums cover the subsystems:
//! - `OrchestratorError`: build run failures (resource, state, locking, cancellation)
//! - `PlanError`: product spec decomposition failures (fatal configuration errors)
//! - `GenerationError`: code-generation service failures
//! - `PreviewError`: dev server process failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the orchestrator subsystem.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to read spec file at {path}: {source}")]
    SpecReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    ResourceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist project state at {path}: {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another build holds the project lock at {path}")]
    BuildLocked { path: PathBuf },

    #[error("Build cancelled")]
    Cancelled,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while decomposing a product spec into modules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Spec declares no features")]
    EmptySpec,

    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Feature {feature} depends on unknown feature {dependency}")]
    UnknownDependency { feature: String, dependency: String },

    #[error("Feature {feature} references unknown screen {screen}")]
    UnknownScreen { feature: String, screen: String },

    #[error("Dependency cycle between features: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },
}

/// Errors from the code-generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Transport(String),

    #[error("Generation service returned status {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("Generation service returned an empty response")]
    EmptyResponse,

    #[error("Generation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to spawn generator process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Missing API key: set {env_var}")]
    MissingApiKey { env_var: String },
}

/// Errors from the preview dev server.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to spawn preview command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Preview process exited early with code {code:?}")]
    ExitedEarly { code: Option<i32> },

    #[error("Preview port {port} did not open within {secs}s")]
    PortTimeout { port: u16, secs: u64 },

    #[error("No free port available: {0}")]
    NoFreePort(#[source] std::io::Error),

    #[error("Preview command is empty")]
    EmptyCommand,
}

impl PreviewError {
    /// True for failures where the server simply never became reachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            PreviewError::PortTimeout { .. } | PreviewError::ExitedEarly { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_error_resource_write_carries_path() {
        let path = PathBuf::from("/app/src/App.tsx");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = OrchestratorError::ResourceWriteFailed {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            OrchestratorError::ResourceWriteFailed { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected ResourceWriteFailed"),
        }
        assert!(err.to_string().contains("App.tsx"));
    }

    #[test]
    fn plan_error_converts_into_orchestrator_error() {
        let err: OrchestratorError = PlanError::EmptySpec.into();
        assert!(matches!(err, OrchestratorError::Plan(PlanError::EmptySpec)));
    }

    #[test]
    fn plan_error_cycle_renders_path() {
        let err = PlanError::DependencyCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle between features: a -> b -> a");
    }

    #[test]
    fn generation_error_api_status_carries_code() {
        let err = GenerationError::ApiStatus {
            status: 529,
            body: "overloaded".into(),
        };
        assert!(err.to_string().contains("529"));
    }

    #[test]
    fn preview_error_unreachable_classification() {
        assert!(PreviewError::PortTimeout { port: 5173, secs: 30 }.is_unreachable());
        assert!(PreviewError::ExitedEarly { code: Some(1) }.is_unreachable());
        assert!(!PreviewError::EmptyCommand.is_unreachable());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&OrchestratorError::Cancelled);
        assert_std_error(&PlanError::EmptySpec);
        assert_std_error(&GenerationError::EmptyResponse);
        assert_std_error(&PreviewError::EmptyCommand);
    }
}
