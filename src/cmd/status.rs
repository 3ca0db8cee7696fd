//! Status and manual progression: `kiln status`, `retry`, `skip`, `promote`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use kiln::config::Config;
use kiln::model::{ModuleStatus, Project, TaskStatus};

use super::{initialized_config, load_project};

/// Padded before styling so the table stays aligned.
fn module_status_label(status: ModuleStatus) -> String {
    let label = style(format!("{:<12}", status.as_str()));
    match status {
        ModuleStatus::Complete => label.green().to_string(),
        ModuleStatus::NeedsWork => label.red().to_string(),
        ModuleStatus::Building => label.yellow().to_string(),
        ModuleStatus::Draft => label.dim().to_string(),
    }
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use kiln::classify::summarize;
    use kiln::orchestrator::StateManager;

    println!();
    println!("kiln Project Status");
    println!("===================");
    println!();

    let config = Config::new(project_dir.to_path_buf(), false, None)?;
    if !config.is_initialized() {
        println!("Project: Not initialized");
        println!();
        println!("Run 'kiln init' to initialize the project.");
        println!();
        return Ok(());
    }
    if !config.project_file.exists() {
        let spec = if config.spec_file().is_ok() { "Ready" } else { "Missing" };
        println!("Spec:    {}", spec);
        println!("Plan:    Missing (run 'kiln plan')");
        println!();
        return Ok(());
    }

    let project = Project::load(&config.project_file)?;
    println!("Project: {} ({}, v{})", style(&project.name).bold(), project.mode, project.version);
    if let Some(url) = project.deploy_urls.get(&project.mode) {
        println!("Deploy:  {}", url);
    }
    println!();
    println!("{:<20} {:<12} {:>7}  Suggestions", "Module", "Status", "Tasks");
    println!("{:<20} {:<12} {:>7}  -----------", "------", "------", "-----");
    for module in &project.modules {
        let done = module
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Working)
            .count();
        println!(
            "{:<20} {} {:>7}  {}",
            module.id,
            module_status_label(module.status),
            format!("{}/{}", done, module.tasks.len()),
            module.suggestions.len()
        );
        for task in &module.tasks {
            if task.status == TaskStatus::Failed || task.skipped {
                let why = task
                    .failure
                    .as_ref()
                    .map(|f| f.describe())
                    .unwrap_or_else(|| "failed".to_string());
                println!(
                    "  {} {} after {} attempt(s): {}{}",
                    style("✗").red(),
                    task.id,
                    task.attempts,
                    why,
                    if task.skipped { " (skipped)" } else { "" }
                );
                if !task.last_errors.is_empty() {
                    for line in summarize(&task.last_errors).lines() {
                        println!("      {}", style(line).dim());
                    }
                }
            }
        }
    }

    let entries = StateManager::new(config.state_file.clone()).entries()?;
    if !entries.is_empty() {
        println!();
        println!("Recent activity:");
        for entry in entries.iter().rev().take(5) {
            println!(
                "  {}/{}: {} at attempt {} ({})",
                entry.module,
                entry.task,
                entry.status,
                entry.attempt,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    println!();
    Ok(())
}

fn update_module(
    project_dir: &Path,
    module_id: &str,
    apply: impl FnOnce(&mut kiln::model::Module) -> Result<String>,
) -> Result<String> {
    let config = initialized_config(project_dir, false, None)?;
    let mut project = load_project(&config)?;
    let module = project
        .module_mut(module_id)
        .with_context(|| format!("Unknown module '{}'", module_id))?;
    let task_id = apply(module)?;
    project.save(&config.project_file)?;
    Ok(task_id)
}

pub fn cmd_retry(project_dir: &Path, module_id: &str) -> Result<()> {
    let task = update_module(project_dir, module_id, |m| m.retry_failed())?;
    tracing::info!(module = module_id, task = %task, "task reset for retry");
    println!("Reset {} in {}. The next 'kiln build' retries it.", task, module_id);
    Ok(())
}

pub fn cmd_skip(project_dir: &Path, module_id: &str) -> Result<()> {
    let task = update_module(project_dir, module_id, |m| m.skip_failed())?;
    tracing::info!(module = module_id, task = %task, "failed task skipped");
    println!(
        "Skipped {} in {}. The module stays needs-work; the next build continues past the task.",
        task, module_id
    );
    Ok(())
}

pub fn cmd_promote(project_dir: &Path, mode: &str, url: Option<String>) -> Result<()> {
    use kiln::model::ProjectMode;

    let target: ProjectMode = mode.parse()?;
    let config = initialized_config(project_dir, false, None)?;
    let mut project = load_project(&config)?;
    project.promote(target, url)?;
    project.save(&config.project_file)?;
    println!("Promoted {} to {} (v{})", project.name, target, project.version);
    Ok(())
}
