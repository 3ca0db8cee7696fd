//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                         |
//! |------------|------------------------------------------|
//! | `project`  | `Init`, `Plan`, `Reset`                  |
//! | `build`    | `Build`                                  |
//! | `status`   | `Status`, `Retry`, `Skip`, `Promote`     |
//! | `inspect`  | `Classify`, `Timers`, `Patterns`         |
//! | `config`   | `Config`                                 |

pub mod build;
pub mod config;
pub mod inspect;
pub mod project;
pub mod status;

pub use build::cmd_build;
pub use config::cmd_config;
pub use inspect::{cmd_classify, cmd_patterns, cmd_timers};
pub use project::{cmd_init, cmd_plan, cmd_reset};
pub use status::{cmd_promote, cmd_retry, cmd_skip, cmd_status};

use anyhow::{Result, bail};
use std::path::Path;

use kiln::config::Config;
use kiln::model::Project;

/// Config for an initialized project, or a pointer to `kiln init`.
fn initialized_config(
    project_dir: &Path,
    verbose: bool,
    max_attempts: Option<u32>,
) -> Result<Config> {
    let config = Config::new(project_dir.to_path_buf(), verbose, max_attempts)?;
    if !config.is_initialized() {
        bail!("Project not initialized. Run 'kiln init' first to create the .kiln/ directory.");
    }
    Ok(config)
}

/// Load `project.json`, or point at `kiln plan`.
fn load_project(config: &Config) -> Result<Project> {
    if !config.project_file.exists() {
        bail!("No plan found. Run 'kiln plan' to plan modules from the spec.");
    }
    Project::load(&config.project_file)
}
