//! Code-generation client.
//!
//! `CodeGenerator` is the port to the external generative service. It carries
//! two calls: `generate` (task prompt in, raw multi-file response out) and
//! `judge` (verification prompt plus optional screenshot in, raw verdict out).
//! Parsing the response is the caller's job (see [`protocol`]).
//!
//! Backends:
//! - [`HttpGenerator`]: Messages API over HTTPS (`reqwest`)
//! - [`CliGenerator`]: spawns `claude --print --output-format stream-json`

mod cli;
mod http;
pub mod prompt;
pub mod protocol;

pub use cli::CliGenerator;
pub use http::HttpGenerator;
pub use protocol::{
    Completion, GeneratedFile, ParsedResponse, ProtocolViolation, normalize_path, parse_response,
};

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::GenerationError;
use crate::kiln_config::{GenerationSection, GeneratorBackend};
use crate::model::StepType;

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_id: String,
    pub step_type: StepType,
    pub attempt: u32,
    pub system: String,
    /// Fully rendered user prompt
    pub prompt: String,
    /// Paths included as file context
    pub context_paths: Vec<String>,
    /// Pattern facts injected into the prompt
    pub patterns: Vec<String>,
    /// True when this is a corrective (fixing) attempt
    pub corrective: bool,
}

/// A verdict call.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub task_id: String,
    pub attempt: u32,
    pub system: String,
    pub prompt: String,
    /// PNG bytes of the preview, when one was captured
    pub screenshot: Option<Vec<u8>>,
}

/// Abstraction over the generative service for testability.
/// Real implementations: `HttpGenerator`, `CliGenerator`.
/// Test double: `testing::ScriptedGenerator`.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate files for a task. Returns the raw response text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Judge a running preview. Returns the raw verdict text.
    async fn judge(&self, request: &JudgeRequest) -> Result<String, GenerationError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Build the configured generator backend.
pub fn build_generator(
    settings: &GenerationSection,
    project_dir: &std::path::Path,
) -> Result<Arc<dyn CodeGenerator>, GenerationError> {
    match settings.backend {
        GeneratorBackend::Http => Ok(Arc::new(HttpGenerator::from_settings(settings)?)),
        GeneratorBackend::Cli => Ok(Arc::new(CliGenerator::new(
            settings.cli_cmd.clone(),
            settings.model.clone(),
            project_dir.to_path_buf(),
            settings.timeout_secs,
        ))),
    }
}
