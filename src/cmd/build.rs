//! `kiln build`: wire the real collaborators into the orchestrator and run it.

use anyhow::{Result, bail};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use super::super::Cli;
use super::{initialized_config, load_project};

pub async fn cmd_build(cli: &Cli, project_dir: PathBuf, module: Option<String>) -> Result<()> {
    use kiln::codegen::build_generator;
    use kiln::orchestrator::{BuildConfig, BuildDeps, BuildOrchestrator};
    use kiln::patterns::JsonPatternStore;
    use kiln::preview::DevServer;
    use kiln::timer::JsonTimerStore;
    use kiln::ui::BuildUI;
    use kiln::verify::{CommandScreenshot, NoScreenshot, ScreenshotCapturer};

    let config = initialized_config(&project_dir, cli.verbose, cli.max_attempts)?;
    let mut project = load_project(&config)?;
    if let Some(id) = &module
        && project.module(id).is_none()
    {
        bail!("Unknown module '{}'. Run 'kiln status' to list modules.", id);
    }
    config.ensure_directories()?;
    for warning in config.kiln_config().validate() {
        tracing::warn!("{}", warning);
    }

    let settings = config.settings();
    let screenshots: Arc<dyn ScreenshotCapturer> = match &settings.verify.screenshot_cmd {
        Some(cmd) => Arc::new(CommandScreenshot::new(cmd.clone())),
        None => Arc::new(NoScreenshot),
    };
    let deps = BuildDeps {
        generator: build_generator(&settings.generation, &config.project_dir)?,
        preview: Box::new(DevServer::new(settings.preview.clone())),
        screenshots,
        timers: Arc::new(JsonTimerStore::new(config.timers_file.clone())),
        patterns: Arc::new(JsonPatternStore::new(config.patterns_file.clone())),
    };

    let mut orchestrator =
        BuildOrchestrator::new(BuildConfig::from_config(&config).with_only_module(module), deps);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                style("Interrupt received, stopping at the next step boundary...").yellow()
            );
            token.cancel();
        }
    });

    let ui = tokio::spawn(BuildUI::new(cli.verbose).run(orchestrator.events().subscribe()));
    let result = orchestrator.run(&mut project).await;
    // Closes the event channel so the UI task ends even on an early error.
    drop(orchestrator);
    let _ = ui.await;
    let summary = result?;

    println!();
    if summary.cancelled {
        println!("{}", style("Build cancelled.").yellow().bold());
    }
    if !summary.changed && !summary.cancelled {
        println!("Nothing to build: every module is complete or blocked on a failed task.");
    }
    println!(
        "Project {} v{}: {} complete, {} needs work",
        style(&project.name).bold(),
        summary.version,
        style(summary.complete.len()).green(),
        style(summary.needs_work.len()).red()
    );
    for id in &summary.needs_work {
        println!("  {} {}", style("needs-work").red(), id);
    }
    if !summary.needs_work.is_empty() {
        println!();
        println!(
            "Run 'kiln status' for errors, then 'kiln retry <module>' or 'kiln skip <module>'."
        );
    }
    Ok(())
}
