use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::kiln_config::{KilnConfig, KilnToml};
use crate::spec::AppSpec;

/// Environment variable that relocates the global kiln directory (default `~/.kiln`).
pub const KILN_HOME_ENV: &str = "KILN_HOME";

/// Runtime configuration for kiln.
///
/// Bridges the unified KilnConfig with the runtime needs of the
/// orchestrator: resolved state paths plus the merged settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub project_file: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub patterns_file: PathBuf,
    pub lock_file: PathBuf,
    /// Cross-project timer history
    pub timers_file: PathBuf,
    pub verbose: bool,
    kiln_config: KilnConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, max_attempts: Option<u32>) -> Result<Self> {
        let kiln_config = KilnConfig::with_cli_args(project_dir, verbose, max_attempts)?;
        let project_dir = kiln_config.project_dir.clone();
        let state_dir = kiln_config.state_dir.clone();

        Ok(Self {
            project_file: state_dir.join("project.json"),
            state_file: state_dir.join("state"),
            log_dir: state_dir.join("logs"),
            patterns_file: state_dir.join("patterns.json"),
            lock_file: state_dir.join("build.lock"),
            timers_file: global_dir()?.join("timers.json"),
            project_dir,
            state_dir,
            verbose,
            kiln_config,
        })
    }

    /// Merged kiln.toml settings.
    pub fn settings(&self) -> &KilnToml {
        &self.kiln_config.toml
    }

    pub fn kiln_config(&self) -> &KilnConfig {
        &self.kiln_config
    }

    /// Locate the spec file (`.kiln/spec.json`, then `.kiln/spec.yaml`).
    pub fn spec_file(&self) -> Result<PathBuf> {
        AppSpec::discover(&self.state_dir)
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.exists()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if let Some(parent) = self.timers_file.parent() {
            std::fs::create_dir_all(parent).context("Failed to create global kiln directory")?;
        }
        Ok(())
    }

    /// Project name: kiln.toml, then the directory name.
    pub fn project_name(&self) -> String {
        self.settings().project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "app".to_string())
        })
    }
}

/// Global kiln directory shared across projects.
pub fn global_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(KILN_HOME_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".kiln"))
        .context("Could not determine home directory for ~/.kiln")
}
