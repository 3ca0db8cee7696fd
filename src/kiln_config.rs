//! Unified configuration for kiln.
//!
//! Reads `.kiln/kiln.toml` and layers overrides on top of it
//! (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-app"
//!
//! [build]
//! max_attempts = 3
//! decompose_threshold = 4
//! max_sub_tasks = 4
//! simplify_step = false
//!
//! [generation]
//! backend = "http"            # or "cli"
//! model = "claude-sonnet-4-5"
//! api_url = "https://api.anthropic.com"
//! api_key_env = "ANTHROPIC_API_KEY"
//! max_tokens = 16000
//! timeout_secs = 600
//! cli_cmd = "claude"
//!
//! [preview]
//! command = "npm run dev -- --port {port} --strictPort"
//! start_timeout_secs = 30
//! log_buffer_lines = 400
//!
//! [verify]
//! screenshot_cmd = "chromium --headless --screenshot={output} --window-size=1280,800 {url}"
//! settle_ms = 1500
//!
//! [context]
//! max_files = 12
//! max_bytes = 60000
//!
//! [patterns]
//! max_facts = 24
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::planner::PlannerConfig;

/// Config file name inside the state directory.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Which code-generation backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Messages API over HTTPS
    #[default]
    Http,
    /// Spawn the `claude` CLI in print mode
    Cli,
}

impl std::fmt::Display for GeneratorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorBackend::Http => write!(f, "http"),
            GeneratorBackend::Cli => write!(f, "cli"),
        }
    }
}

impl std::str::FromStr for GeneratorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(GeneratorBackend::Http),
            "cli" => Ok(GeneratorBackend::Cli),
            _ => bail!("Invalid generator backend '{}'. Valid values: http, cli", s),
        }
    }
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to the spec name)
    #[serde(default)]
    pub name: Option<String>,
}

/// Build loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    /// Retry ceiling per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Component estimate at which a feature is split into sub-tasks
    #[serde(default = "default_decompose_threshold")]
    pub decompose_threshold: usize,
    #[serde(default = "default_max_sub_tasks")]
    pub max_sub_tasks: usize,
    /// Append a cleanup module after integration
    #[serde(default)]
    pub simplify_step: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_decompose_threshold() -> usize {
    crate::planner::DEFAULT_DECOMPOSE_THRESHOLD
}

fn default_max_sub_tasks() -> usize {
    crate::planner::DEFAULT_MAX_SUB_TASKS
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            decompose_threshold: default_decompose_threshold(),
            max_sub_tasks: default_max_sub_tasks(),
            simplify_step: false,
        }
    }
}

/// Code-generation service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSection {
    #[serde(default)]
    pub backend: GeneratorBackend,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Command for the CLI backend
    #[serde(default = "default_cli_cmd")]
    pub cli_cmd: String,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    16000
}

fn default_generation_timeout() -> u64 {
    600
}

fn default_cli_cmd() -> String {
    "claude".to_string()
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::default(),
            model: default_model(),
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            cli_cmd: default_cli_cmd(),
        }
    }
}

/// Dev server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewSection {
    /// Shell-style command; `{port}` is replaced with the chosen port
    #[serde(default = "default_preview_command")]
    pub command: String,
    /// Fixed port (a free port is picked when unset)
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Console lines kept for verification snapshots
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
}

fn default_preview_command() -> String {
    "npm run dev -- --port {port} --strictPort".to_string()
}

fn default_start_timeout() -> u64 {
    30
}

fn default_log_buffer_lines() -> usize {
    400
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            command: default_preview_command(),
            port: None,
            start_timeout_secs: default_start_timeout(),
            log_buffer_lines: default_log_buffer_lines(),
        }
    }
}

/// Verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifySection {
    /// Headless browser command with `{url}` and `{output}` placeholders
    #[serde(default)]
    pub screenshot_cmd: Option<String>,
    /// Delay after the preview is up before capturing
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    1500
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            screenshot_cmd: None,
            settle_ms: default_settle_ms(),
        }
    }
}

/// Bounds on the file context sent with each generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_max_files() -> usize {
    12
}

fn default_max_bytes() -> usize {
    60_000
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Pattern learner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternsSection {
    #[serde(default = "default_max_facts")]
    pub max_facts: usize,
}

fn default_max_facts() -> usize {
    24
}

impl Default for PatternsSection {
    fn default() -> Self {
        Self {
            max_facts: default_max_facts(),
        }
    }
}

/// The complete kiln.toml configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KilnToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub preview: PreviewSection,
    #[serde(default)]
    pub verify: VerifySection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub patterns: PatternsSection,
}

impl KilnToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kiln.toml")
    }

    /// Load configuration from `<state_dir>/kiln.toml`.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize kiln.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `KILN_*` overrides using `lookup`. Returns warnings for unusable values.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(raw) = lookup("KILN_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.build.max_attempts = n,
                Err(_) => warnings.push(format!(
                    "Ignoring KILN_MAX_ATTEMPTS='{}': not a number",
                    raw
                )),
            }
        }
        if let Some(model) = lookup("KILN_MODEL")
            && !model.trim().is_empty()
        {
            self.generation.model = model.trim().to_string();
        }
        if let Some(raw) = lookup("KILN_GENERATOR") {
            match raw.parse::<GeneratorBackend>() {
                Ok(backend) => self.generation.backend = backend,
                Err(e) => warnings.push(format!("Ignoring KILN_GENERATOR: {}", e)),
            }
        }

        warnings
    }

    /// Planner settings derived from `[build]`.
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig::default()
            .set_decompose_threshold(self.build.decompose_threshold)
            .set_max_sub_tasks(self.build.max_sub_tasks)
            .set_simplify_step(self.build.simplify_step)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.build.max_attempts == 0 {
            warnings.push(
                "build.max_attempts = 0: every task will fail without generating".to_string(),
            );
        }
        if self.build.decompose_threshold < 2 {
            warnings.push(format!(
                "build.decompose_threshold = {}: every feature will be split",
                self.build.decompose_threshold
            ));
        }
        if self.build.max_sub_tasks < 2 {
            warnings.push(format!(
                "build.max_sub_tasks = {} is below the minimum of 2 and will be raised",
                self.build.max_sub_tasks
            ));
        }
        if self.preview.command.trim().is_empty() {
            warnings.push("preview.command is empty".to_string());
        } else if !self.preview.command.contains("{port}") && self.preview.port.is_none() {
            warnings.push(
                "preview.command has no {port} placeholder and preview.port is unset; \
                 the server port cannot be known"
                    .to_string(),
            );
        }
        if let Some(cmd) = &self.verify.screenshot_cmd
            && (!cmd.contains("{url}") || !cmd.contains("{output}"))
        {
            warnings.push(
                "verify.screenshot_cmd should contain both {url} and {output}".to_string(),
            );
        }
        if self.context.max_files == 0 || self.context.max_bytes == 0 {
            warnings.push("context limits of 0 disable file context entirely".to_string());
        }
        if self.patterns.max_facts == 0 {
            warnings.push("patterns.max_facts = 0 disables pattern learning".to_string());
        }
        let url = &self.generation.api_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            warnings.push(format!(
                "generation.api_url '{}' is not an http(s) URL",
                self.generation.api_url
            ));
        }

        warnings
    }
}

/// Unified configuration that combines KilnToml with runtime settings.
///
/// Merges settings from:
/// 1. kiln.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct KilnConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .kiln directory
    pub state_dir: PathBuf,
    /// Parsed kiln.toml with env and CLI overrides applied
    pub toml: KilnToml,
    /// CLI override: verbose mode
    pub verbose: bool,
    /// Warnings collected while applying overrides
    pub env_warnings: Vec<String>,
}

impl KilnConfig {
    /// Create a new KilnConfig from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(".kiln");
        let mut toml = KilnToml::load_or_default(&state_dir)?;
        let env_warnings = toml.apply_env();

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose: false,
            env_warnings,
        })
    }

    /// Create KilnConfig with CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_attempts: Option<u32>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(n) = max_attempts {
            config.toml.build.max_attempts = n;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE_NAME)
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}
