use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::BuildEvent;
use crate::materialize::FileChange;
use crate::model::{ModuleStatus, TaskStatus};
use crate::ui::icons::{BULB, CHECK, CLOCK, CROSS, EYES, SPARKLE, STOP, WRENCH};

/// Terminal UI for a build, driven entirely by [`BuildEvent`]s.
///
/// Two bars are stacked:
/// - Modules: how many modules have finished
/// - Task: spinner with the current task, attempt and status
///
/// The UI is a read-only consumer. It never touches project state.
pub struct BuildUI {
    multi: MultiProgress,
    module_bar: ProgressBar,
    task_bar: ProgressBar,
    verbose: bool,
    eta: Option<f64>,
}

impl BuildUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let module_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let module_bar = multi.add(ProgressBar::new(0));
        module_bar.set_style(module_style);
        module_bar.set_prefix("Modules");

        let task_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let task_bar = multi.add(ProgressBar::new_spinner());
        task_bar.set_style(task_style);
        task_bar.set_prefix("   Task");

        Self {
            multi,
            module_bar,
            task_bar,
            verbose,
            eta: None,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Consume events until the build finishes or the channel closes.
    pub async fn run(mut self, mut rx: broadcast::Receiver<BuildEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = matches!(event, BuildEvent::BuildFinished { .. });
                    self.handle(&event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "build UI lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.task_bar.finish_and_clear();
        self.module_bar.finish();
    }

    pub fn handle(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::BuildStarted { project, modules } => {
                self.module_bar.set_length(modules.len() as u64);
                self.module_bar
                    .set_message(format!("building {}", style(project).bold()));
            }
            BuildEvent::ModuleStarted {
                module,
                version,
                tasks,
            } => {
                self.module_bar.set_message(format!(
                    "{} {}",
                    style(module).yellow(),
                    style(format!("v{}, {} task(s)", version, tasks)).dim()
                ));
                self.task_bar.enable_steady_tick(Duration::from_millis(100));
            }
            BuildEvent::TaskTransition {
                task,
                attempt,
                status,
                ..
            } => self.show_transition(task, *attempt, *status),
            BuildEvent::FilesWritten { files, .. } => {
                if self.verbose {
                    let unchanged = files
                        .iter()
                        .filter(|(_, change)| *change == FileChange::Unchanged)
                        .count();
                    self.print_line(format!(
                        "      {}",
                        style(format!("{} file(s), {} unchanged", files.len(), unchanged)).dim()
                    ));
                }
            }
            BuildEvent::ErrorsClassified { errors, .. } => {
                for error in errors {
                    let location = error
                        .location()
                        .map(|l| format!(" ({})", l))
                        .unwrap_or_default();
                    self.print_line(format!(
                        "      {} {}{}",
                        style(format!("[{}]", error.category)).red(),
                        error.message,
                        style(location).dim()
                    ));
                }
            }
            BuildEvent::SuggestionAdded { suggestion, .. } => {
                if self.verbose {
                    self.print_line(format!(
                        "      {}{}",
                        BULB,
                        style(&suggestion.description).dim()
                    ));
                }
            }
            BuildEvent::TimerEstimate { remaining_secs, .. } => {
                self.eta = Some(*remaining_secs);
            }
            BuildEvent::ModuleFinished { module, status } => {
                self.module_bar.inc(1);
                let line = match status {
                    ModuleStatus::Complete => {
                        format!("{}{} complete", CHECK, style(module).green())
                    }
                    _ => format!("{}{} {}", CROSS, style(module).red(), status),
                };
                self.print_line(line);
            }
            BuildEvent::BuildFinished {
                version,
                changed,
                cancelled,
            } => {
                let msg = if *cancelled {
                    format!("{}cancelled at v{}", STOP, version)
                } else if *changed {
                    format!("{}done, project now v{}", SPARKLE, version)
                } else {
                    "nothing to build".to_string()
                };
                self.module_bar.set_message(msg);
            }
        }
    }

    fn show_transition(&self, task: &str, attempt: u32, status: TaskStatus) {
        let eta = self
            .eta
            .map(|secs| format!(" {}~{} left", CLOCK, format_duration(secs)))
            .unwrap_or_default();
        self.task_bar.set_message(format!(
            "{} {} {}{}",
            style(task).cyan(),
            style(format!("#{}", attempt)).dim(),
            status,
            style(eta).dim()
        ));

        match status {
            TaskStatus::Verifying if self.verbose => {
                self.print_line(format!("    {}{} attempt {}", EYES, task, attempt));
            }
            TaskStatus::Fixing => {
                self.print_line(format!(
                    "    {}{} attempt {} broken, fixing",
                    WRENCH,
                    style(task).yellow(),
                    attempt
                ));
            }
            TaskStatus::Working => {
                self.print_line(format!("    {}{}", CHECK, style(task).green()));
            }
            TaskStatus::Failed => {
                self.print_line(format!(
                    "    {}{} failed after {} attempt(s)",
                    CROSS,
                    style(task).red(),
                    attempt
                ));
            }
            _ => {}
        }
    }
}

/// `45s`, `3m 05s`, `1h 02m`.
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    match secs {
        s if s >= 3600 => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
        s if s >= 60 => format!("{}m {:02}s", s / 60, s % 60),
        s => format!("{}s", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.4), "0s");
        assert_eq!(format_duration(45.0), "45s");
        assert_eq!(format_duration(185.0), "3m 05s");
        assert_eq!(format_duration(3720.0), "1h 02m");
        assert_eq!(format_duration(-5.0), "0s");
    }

    #[tokio::test]
    async fn test_run_stops_on_build_finished() {
        let bus = crate::events::EventBus::new();
        let rx = bus.subscribe();
        bus.emit(BuildEvent::BuildStarted {
            project: "demo".into(),
            modules: vec!["home".into()],
        });
        bus.emit(BuildEvent::ModuleFinished {
            module: "home".into(),
            status: ModuleStatus::Complete,
        });
        bus.emit(BuildEvent::BuildFinished {
            version: 2,
            changed: true,
            cancelled: false,
        });
        let ui = BuildUI::new(false);
        tokio::time::timeout(Duration::from_secs(2), ui.run(rx))
            .await
            .unwrap();
    }
}
