//! Project setup commands: `kiln init`, `kiln plan`, `kiln reset`.

use anyhow::{Context, Result, bail};
use console::style;
use std::path::Path;

use super::super::Cli;
use super::initialized_config;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use kiln::config::Config;
    use kiln::kiln_config::{CONFIG_FILE_NAME, KilnToml};
    use kiln::spec::AppSpec;

    let state_dir = project_dir.join(".kiln");
    let was_initialized = state_dir.exists();
    std::fs::create_dir_all(state_dir.join("logs"))
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    let config_path = config.state_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        KilnToml::default().save(&config_path)?;
    }

    let spec_created = match AppSpec::discover(&config.state_dir) {
        Ok(_) => false,
        Err(_) => {
            let spec = AppSpec::template(&config.project_name());
            let content = serde_json::to_string_pretty(&spec).context("Failed to serialize spec")?;
            std::fs::write(config.state_dir.join("spec.json"), content)
                .context("Failed to write spec template")?;
            true
        }
    };

    if was_initialized {
        println!("kiln project already initialized at {}", config.state_dir.display());
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized kiln project at {}", config.state_dir.display());
    println!();
    println!("Created:");
    println!("  .kiln/");
    println!("  ├── kiln.toml     # settings (see `kiln config show`)");
    if spec_created {
        println!("  ├── spec.json     # starter spec, edit it to describe your app");
    }
    println!("  └── logs/         # run logs and per-attempt prompts");
    println!();
    println!("Next steps:");
    println!("  1. Edit .kiln/spec.json");
    println!("  2. Run `kiln plan` to split it into modules");
    println!("  3. Run `kiln build`");
    Ok(())
}

pub fn cmd_plan(project_dir: &Path, cli: &Cli, force: bool) -> Result<()> {
    use kiln::model::Project;
    use kiln::planner::ModulePlanner;
    use kiln::spec::AppSpec;

    let config = initialized_config(project_dir, cli.verbose, cli.max_attempts)?;
    let spec_path = config.spec_file()?;
    let spec = AppSpec::load(&spec_path)?;
    let spec_hash = spec.content_hash();

    if config.project_file.exists() && !force {
        let existing = Project::load(&config.project_file)?;
        if existing.spec_hash == spec_hash {
            println!("Plan is up to date with {}", spec_path.display());
            return Ok(());
        }
        bail!(
            "The spec changed since the last plan. \
             Re-run with --force to replan (build progress is discarded)."
        );
    }

    let modules = ModulePlanner::new(config.settings().planner_config()).plan(&spec)?;
    let name = config
        .settings()
        .project
        .name
        .clone()
        .unwrap_or_else(|| spec.name.clone());
    let mut project = Project::new(&name, modules);
    project.spec_hash = spec_hash;
    project.save(&config.project_file)?;
    tracing::info!(project = %project.name, modules = project.modules.len(), "planned");

    println!();
    println!("Planned {} module(s) for {}", project.modules.len(), style(&project.name).bold());
    println!();
    println!("{:<20} {:<12} {:>5}  Depends on", "Module", "Step", "Tasks");
    println!("{:<20} {:<12} {:>5}  ----------", "------", "----", "-----");
    for module in &project.modules {
        println!(
            "{:<20} {:<12} {:>5}  {}",
            module.id,
            module.step_type.as_str(),
            module.tasks.len(),
            style(module.depends_on.join(", ")).dim()
        );
    }
    println!();
    println!("Run 'kiln build' to start.");
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use kiln::orchestrator::StateManager;

    let config = initialized_config(project_dir, cli.verbose, None)?;

    if !force && !cli.yes {
        let confirm = Confirm::new()
            .with_prompt("This deletes the plan and all build progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    StateManager::new(config.state_file.clone()).reset()?;
    for file in [&config.project_file, &config.patterns_file, &config.lock_file] {
        if file.exists() {
            std::fs::remove_file(file)
                .with_context(|| format!("Failed to remove {}", file.display()))?;
        }
    }
    if config.log_dir.exists() {
        std::fs::remove_dir_all(&config.log_dir).ok();
    }
    println!("Reset complete");
    Ok(())
}
