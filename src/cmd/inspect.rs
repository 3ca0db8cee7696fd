//! Read-only views of learned state: `kiln classify`, `kiln timers`, `kiln patterns`.

use anyhow::{Context, Result};
use console::style;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

pub fn cmd_classify(file: Option<&Path>, json: bool, verbose: bool) -> Result<()> {
    use kiln::classify::{ErrorClassifier, summarize};

    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let records = ErrorClassifier::new(verbose).classify(&text);
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No errors recognized.");
    } else {
        println!("{}", summarize(&records));
    }
    Ok(())
}

pub async fn cmd_timers() -> Result<()> {
    use kiln::config::global_dir;
    use kiln::timer::{JsonTimerStore, TIMERS_FILE_NAME, TimerEstimator};
    use kiln::ui::format_duration;

    let path = global_dir()?.join(TIMERS_FILE_NAME);
    let estimator = TimerEstimator::load(Arc::new(JsonTimerStore::new(path.clone()))).await;

    println!();
    println!("Step timings ({})", style(path.display()).dim());
    println!();
    println!("{:<14} {:>10} {:>8}", "Step", "Estimate", "Samples");
    println!("{:<14} {:>10} {:>8}", "----", "--------", "-------");
    for (step, estimate, samples) in estimator.snapshot() {
        let samples = if samples == 0 { "seed".to_string() } else { samples.to_string() };
        println!("{:<14} {:>10} {:>8}", step.as_str(), format_duration(estimate), samples);
    }
    println!();
    Ok(())
}

pub async fn cmd_patterns(project_dir: &Path) -> Result<()> {
    use kiln::model::Project;
    use kiln::patterns::{JsonPatternStore, PatternLearner};

    let config = super::initialized_config(project_dir, false, None)?;
    let name = if config.project_file.exists() {
        Project::load(&config.project_file)?.name
    } else {
        config.project_name()
    };
    let store = Arc::new(JsonPatternStore::new(config.patterns_file.clone()));
    let learner =
        PatternLearner::load(store, &name, config.settings().patterns.max_facts).await;
    let record = learner.record();

    if record.facts.is_empty() {
        println!("No patterns learned yet for {}. They appear after the first working task.", name);
        return Ok(());
    }

    let mut facts: Vec<_> = record.facts.iter().collect();
    facts.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));

    println!();
    println!("Patterns for {} ({} observation(s))", style(&name).bold(), record.observations);
    println!();
    println!("{:<16} {:>5}  Fact", "Kind", "Seen");
    println!("{:<16} {:>5}  ----", "----", "----");
    for fact in facts {
        println!("{:<16} {:>5}  {}", fact.kind.as_str(), fact.count, fact.text);
    }
    println!();
    Ok(())
}
