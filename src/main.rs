use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about = "Build a React app module by module from a product spec")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Retry ceiling per task. Overrides kiln.toml.
    #[arg(long, global = true, env = "KILN_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .kiln/ with kiln.toml and a starter spec
    Init,
    /// Plan modules from the spec and write project.json
    Plan {
        /// Replace an existing plan, discarding build progress
        #[arg(long)]
        force: bool,
    },
    /// Generate, preview, verify and fix every unfinished module
    Build {
        /// Build only this module
        #[arg(short, long)]
        module: Option<String>,
    },
    /// Show module and task status
    Status,
    /// Reset a module's failed task so the next build retries it
    Retry { module: String },
    /// Skip a module's failed task so the next build continues past it
    Skip { module: String },
    /// Promote the project to the next stage (dev -> test -> prod)
    Promote {
        mode: String,
        /// Deploy URL recorded for the new stage
        #[arg(long)]
        url: Option<String>,
    },
    /// Classify errors in a log file (or stdin)
    Classify {
        file: Option<PathBuf>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show learned per-step durations
    Timers,
    /// Show learned convention facts for this project
    Patterns,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Delete project state (the spec and kiln.toml are kept)
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default kiln.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let state_dir = project_dir.join(".kiln");
    let log_dir = state_dir.is_dir().then(|| state_dir.join("logs"));
    let _log_guard = kiln::logging::init(cli.verbose, log_dir.as_deref());

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Plan { force } => cmd::cmd_plan(&project_dir, &cli, *force)?,
        Commands::Build { module } => cmd::cmd_build(&cli, project_dir, module.clone()).await?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Retry { module } => cmd::cmd_retry(&project_dir, module)?,
        Commands::Skip { module } => cmd::cmd_skip(&project_dir, module)?,
        Commands::Promote { mode, url } => cmd::cmd_promote(&project_dir, mode, url.clone())?,
        Commands::Classify { file, json } => {
            cmd::cmd_classify(file.as_deref(), *json, cli.verbose)?
        }
        Commands::Timers => cmd::cmd_timers().await?,
        Commands::Patterns => cmd::cmd_patterns(&project_dir).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, &cli, *force)?,
    }

    Ok(())
}
