//! The task execution state machine.
//!
//! ```text
//! queued -> generating -> writing -> verifying -> working
//!                ^                        |
//!                +------- fixing <--------+ broken (attempts < max)
//!                                         |
//!                                         +-> failed (attempts == max)
//! ```
//!
//! Modules run in plan order and their tasks strictly one after another.
//! Every transition is written to `project.json` and the state log, then
//! broadcast, before the next external call starts. Cancellation is checked
//! only at transition boundaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tokio_util::sync::CancellationToken;

use super::autofix::{PriorAttempt, corrective_prompt};
use super::state::StateManager;
use crate::classify::ErrorRecord;
use crate::codegen::prompt::{GENERATION_SYSTEM_PROMPT, PromptInput, render_generation_prompt};
use crate::codegen::{CodeGenerator, Completion, GeneratedFile, GenerationRequest, parse_response};
use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::events::{BuildEvent, EventBus};
use crate::materialize::{ContextLimits, FileMaterializer, MaterializeReport, select_context};
use crate::model::{ModuleStatus, Project, Suggestion, SuggestionKind, TaskFailure, TaskStatus};
use crate::patterns::{PatternLearner, PatternStore};
use crate::preview::PreviewController;
use crate::timer::{TimerEstimator, TimerStore};
use crate::verify::{ScreenshotCapturer, Verifier, VerifyOutcome};

/// Explicit settings for one build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_dir: PathBuf,
    pub project_file: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub lock_file: PathBuf,
    /// Retry ceiling per task
    pub max_attempts: u32,
    pub context: ContextLimits,
    /// Delay between the preview coming up and capture
    pub settle: Duration,
    pub max_facts: usize,
    /// Restrict the run to one module
    pub only_module: Option<String>,
    pub verbose: bool,
}

impl BuildConfig {
    /// Defaults for a project rooted at `project_dir` with state in `.kiln/`.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let state_dir = project_dir.join(".kiln");
        Self {
            project_file: state_dir.join("project.json"),
            state_file: state_dir.join("state"),
            log_dir: state_dir.join("logs"),
            lock_file: state_dir.join("build.lock"),
            project_dir,
            max_attempts: 3,
            context: ContextLimits::default(),
            settle: Duration::from_millis(1500),
            max_facts: crate::patterns::DEFAULT_MAX_FACTS,
            only_module: None,
            verbose: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let settings = config.settings();
        Self {
            project_dir: config.project_dir.clone(),
            project_file: config.project_file.clone(),
            state_file: config.state_file.clone(),
            log_dir: config.log_dir.clone(),
            lock_file: config.lock_file.clone(),
            max_attempts: settings.build.max_attempts,
            context: (&settings.context).into(),
            settle: Duration::from_millis(settings.verify.settle_ms),
            max_facts: settings.patterns.max_facts,
            only_module: None,
            verbose: config.verbose,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_only_module(mut self, module: Option<String>) -> Self {
        self.only_module = module;
        self
    }
}

/// Injected collaborators.
pub struct BuildDeps {
    pub generator: Arc<dyn CodeGenerator>,
    pub preview: Box<dyn PreviewController>,
    pub screenshots: Arc<dyn ScreenshotCapturer>,
    pub timers: Arc<dyn TimerStore>,
    pub patterns: Arc<dyn PatternStore>,
}

/// Result of a build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub version: u32,
    /// At least one module or task changed status
    pub changed: bool,
    pub cancelled: bool,
    pub complete: Vec<String>,
    pub needs_work: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Working,
    Failed,
    Cancelled,
}

/// Learners owned by a single run.
struct RunState {
    timers: TimerEstimator,
    patterns: PatternLearner,
}

pub struct BuildOrchestrator {
    config: BuildConfig,
    generator: Arc<dyn CodeGenerator>,
    preview: Box<dyn PreviewController>,
    verifier: Verifier,
    materializer: FileMaterializer,
    state: StateManager,
    events: EventBus,
    cancel: CancellationToken,
    timer_store: Arc<dyn TimerStore>,
    pattern_store: Arc<dyn PatternStore>,
}

impl BuildOrchestrator {
    pub fn new(config: BuildConfig, deps: BuildDeps) -> Self {
        let verifier = Verifier::new(
            Arc::clone(&deps.generator),
            deps.screenshots,
            config.settle,
            config.verbose,
        );
        Self {
            materializer: FileMaterializer::new(config.project_dir.clone()),
            state: StateManager::new(config.state_file.clone()),
            generator: deps.generator,
            preview: deps.preview,
            verifier,
            events: EventBus::new(),
            cancel: CancellationToken::new(),
            timer_store: deps.timers,
            pattern_store: deps.patterns,
            config,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Token that aborts the run at the next transition boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every eligible module of `project`.
    pub async fn run(&mut self, project: &mut Project) -> Result<BuildSummary, OrchestratorError> {
        let _lock = self.acquire_lock()?;
        std::fs::create_dir_all(&self.config.log_dir).map_err(|source| {
            OrchestratorError::ResourceWriteFailed {
                path: self.config.log_dir.clone(),
                source,
            }
        })?;

        let mut run = RunState {
            timers: TimerEstimator::load(Arc::clone(&self.timer_store)).await,
            patterns: PatternLearner::load(
                Arc::clone(&self.pattern_store),
                &project.name,
                self.config.max_facts,
            )
            .await,
        };

        let before = status_snapshot(project);
        self.events.emit(BuildEvent::BuildStarted {
            project: project.name.clone(),
            modules: project.modules.iter().map(|m| m.id.clone()).collect(),
        });
        tracing::info!(project = %project.name, modules = project.modules.len(), "build started");

        let mut cancelled = false;
        for m in 0..project.modules.len() {
            let module = &project.modules[m];
            if let Some(only) = &self.config.only_module
                && &module.id != only
            {
                continue;
            }
            if module.status == ModuleStatus::Complete
                && module.tasks.iter().all(|t| t.is_settled())
            {
                tracing::debug!(module = %module.id, "module already complete");
                continue;
            }
            if self.run_module(project, m, &mut run).await? == TaskOutcome::Cancelled {
                cancelled = true;
                break;
            }
        }

        // A token fired during the last task still marks the run cancelled.
        cancelled |= self.cancel.is_cancelled();

        if let Err(e) = self.preview.stop().await {
            tracing::warn!(error = %e, "failed to stop preview");
        }

        let changed = status_snapshot(project) != before;
        let complete: Vec<String> = project
            .modules
            .iter()
            .filter(|m| m.status == ModuleStatus::Complete)
            .map(|m| m.id.clone())
            .collect();
        let needs_work: Vec<String> = project
            .modules
            .iter()
            .filter(|m| m.status == ModuleStatus::NeedsWork)
            .map(|m| m.id.clone())
            .collect();

        if changed {
            project.bump_version(format!(
                "build: {} complete, {} needs work{}",
                complete.len(),
                needs_work.len(),
                if cancelled { " (cancelled)" } else { "" }
            ));
            self.persist(project)?;
        }

        self.events.emit(BuildEvent::BuildFinished {
            version: project.version,
            changed,
            cancelled,
        });
        tracing::info!(
            version = project.version,
            changed,
            cancelled,
            complete = complete.len(),
            needs_work = needs_work.len(),
            "build finished"
        );

        Ok(BuildSummary {
            version: project.version,
            changed,
            cancelled,
            complete,
            needs_work,
        })
    }

    fn acquire_lock(&self) -> Result<std::fs::File, OrchestratorError> {
        let path = &self.config.lock_file;
        let fail = |source| OrchestratorError::ResourceWriteFailed {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(fail)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(fail)?;
        file.try_lock_exclusive()
            .map_err(|_| OrchestratorError::BuildLocked { path: path.clone() })?;
        Ok(file)
    }

    /// Run one module's unsettled tasks in order. Returns `Cancelled` if the run aborted.
    async fn run_module(
        &mut self,
        project: &mut Project,
        m: usize,
        run: &mut RunState,
    ) -> Result<TaskOutcome, OrchestratorError> {
        {
            let module = &mut project.modules[m];
            module.status = ModuleStatus::Building;
            module.version += 1;
        }
        self.persist(project)?;
        let module = &project.modules[m];
        self.events.emit(BuildEvent::ModuleStarted {
            module: module.id.clone(),
            version: module.version,
            tasks: module.tasks.len(),
        });
        tracing::info!(module = %module.id, version = module.version, "module started");

        let mut outcome = TaskOutcome::Working;
        for t in 0..project.modules[m].tasks.len() {
            let task = &project.modules[m].tasks[t];
            if task.is_settled() {
                continue;
            }
            if task.status == TaskStatus::Failed {
                // Needs a manual retry or skip.
                tracing::info!(
                    module = %project.modules[m].id,
                    task = %task.id,
                    "task failed previously"
                );
                outcome = TaskOutcome::Failed;
                break;
            }
            outcome = self.run_task(project, m, t, run).await?;
            if outcome != TaskOutcome::Working {
                break;
            }
        }

        let status = project.modules[m].settle_status();
        self.persist(project)?;
        self.events.emit(BuildEvent::ModuleFinished {
            module: project.modules[m].id.clone(),
            status,
        });
        tracing::info!(module = %project.modules[m].id, status = %status, "module finished");
        Ok(outcome)
    }

    async fn run_task(
        &mut self,
        project: &mut Project,
        m: usize,
        t: usize,
        run: &mut RunState,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let max_attempts = self.config.max_attempts;
        let step = project.modules[m].tasks[t].step_type;
        let started = Instant::now();

        self.events.emit(BuildEvent::TimerEstimate {
            step_type: step,
            estimate_secs: run.timers.estimate(step),
            remaining_secs: run.timers.estimate_remaining(project),
        });

        {
            let task = &mut project.modules[m].tasks[t];
            task.failure = None;
            task.last_errors.clear();
        }

        let mut errors: Vec<ErrorRecord> = Vec::new();
        let mut prior_report: Option<MaterializeReport> = None;
        let mut prior_violation: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                return self.cancel_task(project, m, t);
            }

            if !project.modules[m].tasks[t].begin_attempt(max_attempts) {
                return self.fail_task(project, m, t, TaskFailure::RetriesExhausted, errors);
            }
            let attempt = project.modules[m].tasks[t].attempts;
            self.transition(project, m, t, TaskStatus::Generating)?;

            let corrective = if errors.is_empty() {
                None
            } else {
                let prior = match (&prior_report, &prior_violation) {
                    (Some(report), _) => PriorAttempt::Written(report),
                    (None, Some(reason)) => PriorAttempt::NothingWritten {
                        reason: reason.as_str(),
                    },
                    (None, None) => PriorAttempt::NothingWritten {
                        reason: "no response",
                    },
                };
                Some(corrective_prompt(attempt - 1, max_attempts, &errors, prior))
            };

            let files = match self
                .generate(project, m, t, attempt, corrective.as_deref(), &prior_report, run)
                .await
            {
                Ok(files) => files,
                Err(broken) => {
                    prior_report = None;
                    prior_violation = Some(broken.message.clone());
                    errors = vec![broken];
                    self.on_broken(project, m, t, &errors);
                    if project.modules[m].tasks[t].attempts >= max_attempts {
                        return self.fail_task(project, m, t, TaskFailure::RetriesExhausted, errors);
                    }
                    if self.cancel.is_cancelled() {
                        return self.cancel_task(project, m, t);
                    }
                    self.transition(project, m, t, TaskStatus::Fixing)?;
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                return self.cancel_task(project, m, t);
            }
            self.transition(project, m, t, TaskStatus::Writing)?;
            let report = match self.materializer.apply(&files) {
                Ok(report) => report,
                Err(e) => {
                    // Written before the failure, so later context still sees them.
                    project.modules[m].touch_files(&e.written.paths());
                    self.emit_files_written(project, m, t, &e.written);
                    tracing::error!(
                        module = %project.modules[m].id,
                        task = %project.modules[m].tasks[t].id,
                        error = %e,
                        "file write failed"
                    );
                    let record = ErrorRecord::unknown(e.to_string());
                    self.on_broken(project, m, t, std::slice::from_ref(&record));
                    return self.fail_task(
                        project,
                        m,
                        t,
                        TaskFailure::Resource {
                            message: e.to_string(),
                        },
                        vec![record],
                    );
                }
            };
            project.modules[m].touch_files(&report.paths());
            self.emit_files_written(project, m, t, &report);

            if self.cancel.is_cancelled() {
                return self.cancel_task(project, m, t);
            }
            self.transition(project, m, t, TaskStatus::Verifying)?;
            let outcome = {
                let module = &project.modules[m];
                self.verifier
                    .verify(
                        self.preview.as_mut(),
                        &self.config.project_dir,
                        module,
                        &module.tasks[t],
                    )
                    .await
            };

            match outcome {
                VerifyOutcome::Working { notes } => {
                    self.on_working(project, m, t, &files, &report, notes, run, started)
                        .await;
                    self.transition(project, m, t, TaskStatus::Working)?;
                    return Ok(TaskOutcome::Working);
                }
                VerifyOutcome::Broken {
                    errors: found,
                    judged,
                } => {
                    tracing::info!(
                        module = %project.modules[m].id,
                        task = %project.modules[m].tasks[t].id,
                        attempt,
                        judged,
                        errors = found.len(),
                        "verification broken"
                    );
                    errors = found;
                    prior_report = Some(report);
                    prior_violation = None;
                    self.on_broken(project, m, t, &errors);
                    if project.modules[m].tasks[t].attempts >= max_attempts {
                        return self.fail_task(project, m, t, TaskFailure::RetriesExhausted, errors);
                    }
                    if self.cancel.is_cancelled() {
                        return self.cancel_task(project, m, t);
                    }
                    self.transition(project, m, t, TaskStatus::Fixing)?;
                }
            }
        }
    }

    /// The `generating` step: prompt, call, parse. A broken attempt comes back as the error record.
    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        project: &Project,
        m: usize,
        t: usize,
        attempt: u32,
        corrective: Option<&str>,
        prior_report: &Option<MaterializeReport>,
        run: &RunState,
    ) -> Result<Vec<GeneratedFile>, ErrorRecord> {
        let module = &project.modules[m];
        let task = &module.tasks[t];
        let prior_paths = prior_report.as_ref().map(|r| r.paths()).unwrap_or_default();
        let context = select_context(
            &self.materializer,
            project,
            module,
            t,
            &prior_paths,
            self.config.context,
        );
        let patterns = run.patterns.prompt_facts();
        let prompt = render_generation_prompt(&PromptInput {
            project_name: &project.name,
            module,
            task,
            context: &context,
            patterns: &patterns,
            corrective,
        });

        self.write_log(&task.id, attempt, "prompt", &prompt);
        let request = GenerationRequest {
            task_id: task.id.clone(),
            step_type: task.step_type,
            attempt,
            system: GENERATION_SYSTEM_PROMPT.to_string(),
            prompt,
            context_paths: context.iter().map(|c| c.path.clone()).collect(),
            patterns,
            corrective: corrective.is_some(),
        };

        tracing::debug!(
            task = %task.id,
            attempt,
            backend = self.generator.name(),
            context_files = request.context_paths.len(),
            "calling generator"
        );
        let response = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(task = %task.id, attempt, error = %e, "generation failed");
                self.write_log(&task.id, attempt, "response", &format!("ERROR: {}", e));
                return Err(ErrorRecord::unknown(format!("Generation failed: {}", e)));
            }
        };
        self.write_log(&task.id, attempt, "response", &response);

        match parse_response(&response) {
            Ok(parsed) => match parsed.completion {
                Completion::Success => Ok(parsed.files),
                Completion::Failure { reason } => {
                    let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                    Err(ErrorRecord::unknown(format!("Generator reported failure: {}", reason)))
                }
            },
            Err(violation) => {
                tracing::warn!(task = %task.id, attempt, %violation, "protocol violation");
                Err(ErrorRecord::unknown(format!("Protocol violation: {}", violation))
                    .with_raw(crate::stream::snippet(&response, 200)))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_working(
        &mut self,
        project: &mut Project,
        m: usize,
        t: usize,
        files: &[GeneratedFile],
        report: &MaterializeReport,
        notes: Option<String>,
        run: &mut RunState,
        started: Instant,
    ) {
        let step = project.modules[m].tasks[t].step_type;
        {
            let task = &mut project.modules[m].tasks[t];
            task.files = report.paths();
            task.last_errors.clear();
            task.failure = None;
        }

        let mut suggestions: Vec<Suggestion> = run
            .patterns
            .learn(files)
            .into_iter()
            .map(|text| Suggestion::new(SuggestionKind::Pattern, text, "pattern-learner"))
            .collect();
        if let Some(notes) = notes {
            suggestions.push(Suggestion::new(SuggestionKind::Improvement, notes, "verifier"));
        }
        for suggestion in suggestions {
            project.modules[m].add_suggestion(suggestion.clone());
            self.events.emit(BuildEvent::SuggestionAdded {
                module: project.modules[m].id.clone(),
                suggestion,
            });
        }

        let estimate = run.timers.observe(step, started.elapsed().as_secs_f64());
        if let Err(e) = run.timers.persist().await {
            tracing::warn!(error = %e, "failed to persist timer history");
        }
        if let Err(e) = run.patterns.persist().await {
            tracing::warn!(error = %e, "failed to persist patterns");
        }
        self.events.emit(BuildEvent::TimerEstimate {
            step_type: step,
            estimate_secs: estimate,
            remaining_secs: run.timers.estimate_remaining(project),
        });
    }

    fn on_broken(&self, project: &Project, m: usize, t: usize, errors: &[ErrorRecord]) {
        let module = &project.modules[m];
        let task = &module.tasks[t];
        self.events.emit(BuildEvent::ErrorsClassified {
            module: module.id.clone(),
            task: task.id.clone(),
            attempt: task.attempts,
            errors: errors.to_vec(),
        });
    }

    fn emit_files_written(
        &self,
        project: &Project,
        m: usize,
        t: usize,
        report: &MaterializeReport,
    ) {
        let module = &project.modules[m];
        let task = &module.tasks[t];
        self.events.emit(BuildEvent::files_written(&module.id, &task.id, task.attempts, report));
    }

    /// Return the task to `queued`, keeping its attempts.
    fn cancel_task(
        &mut self,
        project: &mut Project,
        m: usize,
        t: usize,
    ) -> Result<TaskOutcome, OrchestratorError> {
        project.modules[m].tasks[t].failure = Some(TaskFailure::Cancelled);
        self.transition(project, m, t, TaskStatus::Queued)?;
        tracing::info!(
            module = %project.modules[m].id,
            task = %project.modules[m].tasks[t].id,
            "build cancelled at task boundary"
        );
        Ok(TaskOutcome::Cancelled)
    }

    fn fail_task(
        &mut self,
        project: &mut Project,
        m: usize,
        t: usize,
        failure: TaskFailure,
        errors: Vec<ErrorRecord>,
    ) -> Result<TaskOutcome, OrchestratorError> {
        tracing::warn!(
            module = %project.modules[m].id,
            task = %project.modules[m].tasks[t].id,
            failure = %failure.describe(),
            "task failed"
        );
        {
            let task = &mut project.modules[m].tasks[t];
            task.failure = Some(failure);
            task.last_errors = errors;
        }
        self.transition(project, m, t, TaskStatus::Failed)?;
        Ok(TaskOutcome::Failed)
    }

    /// Set a task status, persist it, then broadcast it.
    fn transition(
        &mut self,
        project: &mut Project,
        m: usize,
        t: usize,
        status: TaskStatus,
    ) -> Result<(), OrchestratorError> {
        let module_id = project.modules[m].id.clone();
        let (task_id, attempt) = {
            let task = &mut project.modules[m].tasks[t];
            task.status = status;
            (task.id.clone(), task.attempts)
        };
        self.persist(project)?;
        self.state
            .record(&module_id, &task_id, attempt, status)
            .map_err(|e| OrchestratorError::StateWriteFailed {
                path: self.config.state_file.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
        tracing::info!(
            module = %module_id,
            task = %task_id,
            attempt,
            status = %status,
            "task transition"
        );
        self.events.emit(BuildEvent::TaskTransition {
            module: module_id,
            task: task_id,
            attempt,
            status,
        });
        Ok(())
    }

    fn persist(&self, project: &Project) -> Result<(), OrchestratorError> {
        project
            .save(&self.config.project_file)
            .map_err(|e| OrchestratorError::StateWriteFailed {
                path: self.config.project_file.clone(),
                source: std::io::Error::other(format!("{:#}", e)),
            })
    }

    /// `<task>-attempt-<n>-<kind>.md` in the log directory. Failures only warn.
    fn write_log(&self, task_id: &str, attempt: u32, kind: &str, content: &str) {
        let path = attempt_log_path(&self.config.log_dir, task_id, attempt, kind);
        if let Err(e) = std::fs::write(&path, content) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write attempt log");
        }
    }
}

pub fn attempt_log_path(log_dir: &Path, task_id: &str, attempt: u32, kind: &str) -> PathBuf {
    log_dir.join(format!("{}-attempt-{}-{}.md", task_id, attempt, kind))
}

/// Module and task statuses plus attempt counts, in plan order.
fn status_snapshot(project: &Project) -> (Vec<ModuleStatus>, Vec<(String, TaskStatus, u32)>) {
    let modules = project.modules.iter().map(|m| m.status).collect();
    let tasks = project
        .modules
        .iter()
        .flat_map(|m| m.tasks.iter())
        .map(|t| (t.id.clone(), t.status, t.attempts))
        .collect();
    (modules, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_log_path() {
        let path = attempt_log_path(Path::new("/p/.kiln/logs"), "cart.1", 2, "prompt");
        assert_eq!(path, PathBuf::from("/p/.kiln/logs/cart.1-attempt-2-prompt.md"));
    }

    #[test]
    fn test_build_config_for_project() {
        let config = BuildConfig::for_project("/tmp/app").with_max_attempts(5);
        assert_eq!(config.project_file, PathBuf::from("/tmp/app/.kiln/project.json"));
        assert_eq!(config.lock_file, PathBuf::from("/tmp/app/.kiln/build.lock"));
        assert_eq!(config.max_attempts, 5);
    }
}
