//! End-to-end orchestrator runs against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tempfile::{TempDir, tempdir};

use kiln::classify::ErrorCategory;
use kiln::errors::OrchestratorError;
use kiln::events::{BuildEvent, drain};
use kiln::materialize::FileChange;
use kiln::model::{
    Module, ModuleStatus, Project, StepType, SuggestionKind, Task, TaskFailure, TaskStatus,
};
use kiln::orchestrator::{BuildConfig, BuildDeps, BuildOrchestrator, StateManager};
use kiln::patterns::MemoryPatternStore;
use kiln::testing::{ScriptedGenerator, ScriptedPreview, StaticScreenshot, file_response};
use kiln::timer::MemoryTimerStore;

const TS_ERROR: &str = "src/Home.tsx(3,10): error TS2304: Cannot find name 'Hero'.";
const BROKEN: &str = r#"{"verdict":"BROKEN","diagnosis":"the page does not render"}"#;
const WORKING: &str = r#"{"verdict":"WORKING"}"#;

struct Harness {
    dir: TempDir,
    generator: Arc<ScriptedGenerator>,
    preview: ScriptedPreview,
    timers: Arc<MemoryTimerStore>,
    patterns: Arc<MemoryPatternStore>,
    max_attempts: u32,
}

impl Harness {
    fn new(generator: ScriptedGenerator, preview: ScriptedPreview) -> Self {
        Self {
            dir: tempdir().unwrap(),
            generator: Arc::new(generator),
            preview,
            timers: Arc::new(MemoryTimerStore::new()),
            patterns: Arc::new(MemoryPatternStore::new()),
            max_attempts: 3,
        }
    }

    fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    fn config(&self) -> BuildConfig {
        BuildConfig::for_project(self.dir.path())
            .with_max_attempts(self.max_attempts)
            .with_settle(Duration::ZERO)
    }

    fn orchestrator(&self) -> BuildOrchestrator {
        BuildOrchestrator::new(
            self.config(),
            BuildDeps {
                generator: self.generator.clone(),
                preview: Box::new(self.preview.clone()),
                screenshots: Arc::new(StaticScreenshot::none()),
                timers: self.timers.clone(),
                patterns: self.patterns.clone(),
            },
        )
    }
}

fn module(id: &str, tasks: usize) -> Module {
    let tasks = (1..=tasks)
        .map(|i| {
            let id = if tasks == 1 { id.to_string() } else { format!("{}.{}", id, i) };
            Task::new(&id, &format!("Build part {} of {}", i, id), StepType::Module)
        })
        .collect();
    Module::new(id, id, StepType::Module, tasks)
}

fn home_files() -> String {
    file_response(&[(
        "src/pages/Home.tsx",
        "import { Hero } from '@/components/Hero';\n\nexport const Home = () => <Hero />;",
    )])
}

#[tokio::test]
async fn test_two_type_errors_then_success_within_ceiling() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files(), home_files(), home_files()])
        .with_verdicts(vec![BROKEN.into(), BROKEN.into(), WORKING.into()]);
    let preview =
        ScriptedPreview::new().with_console_per_start(vec![TS_ERROR.into(), TS_ERROR.into()]);
    let h = Harness::new(generator, preview);
    let mut project = Project::new("shop", vec![module("home", 1)]);

    let mut orchestrator = h.orchestrator();
    let mut rx = orchestrator.events().subscribe();
    let summary = orchestrator.run(&mut project).await.unwrap();

    let task = &project.modules[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Working);
    assert_eq!(task.attempts, 3);
    assert!(task.last_errors.is_empty());
    assert_eq!(task.files, vec!["src/pages/Home.tsx"]);
    assert_eq!(project.modules[0].status, ModuleStatus::Complete);
    assert_eq!(summary.complete, vec!["home"]);
    assert!(summary.changed);

    let calls = h.generator.generate_calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0].corrective);
    assert!(calls[1].corrective);
    assert!(calls[1].prompt.contains("PREVIOUS ATTEMPT FAILED (attempt 1 of 3)"));
    assert!(calls[1].prompt.contains("[type-check]"));
    assert!(calls[1].prompt.contains("src/pages/Home.tsx"));

    let classified: Vec<ErrorCategory> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BuildEvent::ErrorsClassified { errors, .. } => Some(errors[0].category),
            _ => None,
        })
        .collect();
    assert_eq!(classified, vec![ErrorCategory::TypeCheck, ErrorCategory::TypeCheck]);
}

#[tokio::test]
async fn test_exhausted_retries_fail_task_and_skip_siblings() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files(), home_files(), home_files(), home_files()])
        .with_verdicts(vec![BROKEN.into(), BROKEN.into(), BROKEN.into(), WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("cart", 2), module("about", 1)]);

    let summary = h.orchestrator().run(&mut project).await.unwrap();

    let cart = &project.modules[0];
    assert_eq!(cart.tasks[0].status, TaskStatus::Failed);
    assert_eq!(cart.tasks[0].attempts, 3);
    assert_eq!(cart.tasks[0].failure, Some(TaskFailure::RetriesExhausted));
    assert_eq!(cart.tasks[0].last_errors[0].category, ErrorCategory::Unknown);
    assert_eq!(cart.tasks[1].status, TaskStatus::Queued);
    assert_eq!(cart.tasks[1].attempts, 0);
    assert_eq!(cart.status, ModuleStatus::NeedsWork);

    // The next module is unaffected.
    assert_eq!(project.modules[1].status, ModuleStatus::Complete);
    assert_eq!(summary.needs_work, vec!["cart"]);
    assert_eq!(h.generator.generate_calls().len(), 4);
}

#[tokio::test]
async fn test_preview_port_never_opens_is_bundler_without_verdict() {
    let generator = ScriptedGenerator::new().with_responses(vec![home_files()]);
    let preview = ScriptedPreview::new().always_fail();
    let h = Harness::new(generator, preview.clone()).max_attempts(1);
    let mut project = Project::new("shop", vec![module("home", 1)]);

    h.orchestrator().run(&mut project).await.unwrap();

    let task = &project.modules[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_errors[0].category, ErrorCategory::Bundler);
    assert!(task.last_errors[0].message.starts_with("Preview failed to start"));
    assert!(h.generator.judge_calls().is_empty());
    // One restart plus the cold-start retry.
    assert_eq!(preview.starts(), 2);
}

#[tokio::test]
async fn test_missing_marker_consumes_an_attempt() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec!["Sure, here is the home page.".into(), home_files()])
        .with_verdicts(vec![WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1)]);

    h.orchestrator().run(&mut project).await.unwrap();

    let task = &project.modules[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Working);
    assert_eq!(task.attempts, 2);
    assert_eq!(h.generator.judge_calls().len(), 1);
    let second = &h.generator.generate_calls()[1];
    assert!(second.prompt.contains("wrote no files"));
    assert!(second.prompt.contains("completion marker"));
}

#[tokio::test]
async fn test_write_failure_fails_after_single_attempt() {
    let generator = ScriptedGenerator::new().with_responses(vec![home_files(), home_files()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    // A file where the `src` directory must go.
    std::fs::write(h.dir.path().join("src"), "not a directory").unwrap();
    let mut project = Project::new("shop", vec![module("home", 1)]);

    h.orchestrator().run(&mut project).await.unwrap();

    let task = &project.modules[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 1);
    assert!(matches!(task.failure, Some(TaskFailure::Resource { .. })));
    assert_eq!(h.generator.generate_calls().len(), 1);
    assert!(h.generator.judge_calls().is_empty());
    assert_eq!(project.modules[0].status, ModuleStatus::NeedsWork);
}

#[tokio::test]
async fn test_cancel_before_start_makes_no_generation_call() {
    let h = Harness::new(ScriptedGenerator::new(), ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1), module("about", 1)]);

    let mut orchestrator = h.orchestrator();
    orchestrator.cancellation_token().cancel();
    let summary = orchestrator.run(&mut project).await.unwrap();

    assert!(summary.cancelled);
    assert!(h.generator.generate_calls().is_empty());
    let task = &project.modules[0].tasks[0];
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.failure, Some(TaskFailure::Cancelled));
    assert_eq!(project.modules[0].status, ModuleStatus::NeedsWork);
    assert_eq!(project.modules[1].status, ModuleStatus::Draft);
}

#[tokio::test]
async fn test_cancel_mid_build_stops_at_next_boundary() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files()])
        .with_verdicts(vec![WORKING.into()]);
    let preview = ScriptedPreview::new();
    let h = Harness::new(generator, preview.clone());
    let mut project = Project::new("shop", vec![module("catalog", 2)]);

    let mut orchestrator = h.orchestrator();
    h.generator.cancel_on_generate(orchestrator.cancellation_token());
    let summary = orchestrator.run(&mut project).await.unwrap();

    let tasks = &project.modules[0].tasks;
    // The abort lands while generating, so nothing past it runs.
    assert_eq!(tasks[0].status, TaskStatus::Queued);
    assert_eq!(tasks[0].failure, Some(TaskFailure::Cancelled));
    assert_eq!(tasks[0].attempts, 1);
    assert!(tasks[0].files.is_empty());
    assert_eq!(tasks[1].status, TaskStatus::Queued);
    assert_eq!(tasks[1].attempts, 0);
    assert_eq!(project.modules[0].status, ModuleStatus::NeedsWork);
    assert!(summary.cancelled);

    assert_eq!(h.generator.generate_calls().len(), 1);
    assert!(h.generator.judge_calls().is_empty());
    assert_eq!(preview.starts(), 0);
    assert!(!h.dir.path().join("src/pages/Home.tsx").exists());
}

#[tokio::test]
async fn test_cancel_during_last_task_reports_cancelled() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files()])
        .with_verdicts(vec![WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1)]);

    let mut orchestrator = h.orchestrator();
    h.generator.cancel_on_generate(orchestrator.cancellation_token());
    let summary = orchestrator.run(&mut project).await.unwrap();

    assert!(summary.cancelled);
    assert!(summary.complete.is_empty());
    assert_ne!(project.modules[0].status, ModuleStatus::Complete);
    assert_eq!(project.modules[0].tasks[0].failure, Some(TaskFailure::Cancelled));
}

/// Paths and outcomes of every `writing` step, in order.
fn written_files(events: Vec<BuildEvent>) -> Vec<Vec<(String, FileChange)>> {
    events
        .into_iter()
        .filter_map(|e| match e {
            BuildEvent::FilesWritten { files, .. } => Some(files),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_same_task_is_idempotent_on_unchanged_tree() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files(), home_files()])
        .with_verdicts(vec![WORKING.into(), WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let template = Project::new("shop", vec![module("home", 1)]);
    let config = h.config();

    let mut first = template.clone();
    let mut orchestrator = h.orchestrator();
    let mut rx = orchestrator.events().subscribe();
    orchestrator.run(&mut first).await.unwrap();
    let first_writes = written_files(drain(&mut rx));
    let first_saved = Project::load(&config.project_file).unwrap();

    let mut second = template.clone();
    let mut orchestrator = h.orchestrator();
    let mut rx = orchestrator.events().subscribe();
    orchestrator.run(&mut second).await.unwrap();
    let second_writes = written_files(drain(&mut rx));
    let second_saved = Project::load(&config.project_file).unwrap();

    assert_eq!(first_writes.len(), 1);
    assert_eq!(second_writes.len(), 1);
    let paths = |writes: &[(String, FileChange)]| {
        writes.iter().map(|(p, _)| p.clone()).collect::<Vec<_>>()
    };
    assert_eq!(paths(&first_writes[0]), paths(&second_writes[0]));
    assert!(first_writes[0].iter().all(|(_, c)| *c == FileChange::Created));
    assert!(second_writes[0].iter().all(|(_, c)| *c == FileChange::Unchanged));

    assert_eq!(first.modules[0].tasks[0].status, TaskStatus::Working);
    assert_eq!(first.modules[0].tasks, second.modules[0].tasks);
    assert_eq!(first_saved.modules[0].tasks, second_saved.modules[0].tasks);
    assert_eq!(second_saved.modules[0].tasks, second.modules[0].tasks);
}

#[tokio::test]
async fn test_rerun_does_not_regenerate_working_tasks() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files()])
        .with_verdicts(vec![WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1)]);

    let first = h.orchestrator().run(&mut project).await.unwrap();
    let second = h.orchestrator().run(&mut project).await.unwrap();

    assert_eq!(h.generator.generate_calls().len(), 1);
    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.version, first.version);
    assert_eq!(project.modules[0].status, ModuleStatus::Complete);
}

#[tokio::test]
async fn test_rerun_stops_at_failed_task_until_skipped() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files(), home_files()])
        .with_verdicts(vec![BROKEN.into(), WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new()).max_attempts(1);
    let mut project = Project::new("shop", vec![module("cart", 2)]);

    h.orchestrator().run(&mut project).await.unwrap();
    assert_eq!(project.modules[0].tasks[0].status, TaskStatus::Failed);

    h.orchestrator().run(&mut project).await.unwrap();
    assert_eq!(h.generator.generate_calls().len(), 1);

    project.modules[0].skip_failed().unwrap();
    h.orchestrator().run(&mut project).await.unwrap();
    assert_eq!(h.generator.generate_calls().len(), 2);
    assert_eq!(project.modules[0].tasks[1].status, TaskStatus::Working);
    // A skipped failure still leaves the module needing work.
    assert_eq!(project.modules[0].status, ModuleStatus::NeedsWork);
}

#[tokio::test]
async fn test_transitions_are_persisted_in_order() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files()])
        .with_verdicts(vec![WORKING.into()]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1)]);

    let mut orchestrator = h.orchestrator();
    let mut rx = orchestrator.events().subscribe();
    orchestrator.run(&mut project).await.unwrap();

    let statuses: Vec<TaskStatus> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BuildEvent::TaskTransition { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Generating,
            TaskStatus::Writing,
            TaskStatus::Verifying,
            TaskStatus::Working
        ]
    );

    let config = h.config();
    let logged: Vec<String> = StateManager::new(config.state_file.clone())
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(logged, vec!["generating", "writing", "verifying", "working"]);

    let saved = Project::load(&config.project_file).unwrap();
    assert_eq!(saved, project);
    assert!(config.log_dir.join("home-attempt-1-prompt.md").exists());
    assert!(config.log_dir.join("home-attempt-1-response.md").exists());
}

#[tokio::test]
async fn test_working_task_feeds_learners() {
    let generator = ScriptedGenerator::new()
        .with_responses(vec![home_files(), home_files()])
        .with_verdicts(vec![
            r#"{"verdict":"WORKING","notes":"Add an empty state"}"#.into(),
            WORKING.into(),
        ]);
    let h = Harness::new(generator, ScriptedPreview::new());
    let mut project = Project::new("shop", vec![module("home", 1), module("about", 1)]);

    h.orchestrator().run(&mut project).await.unwrap();

    let suggestions = &project.modules[0].suggestions;
    assert!(suggestions.iter().any(|s| s.kind == SuggestionKind::Pattern));
    assert!(
        suggestions
            .iter()
            .any(|s| s.kind == SuggestionKind::Improvement && s.description == "Add an empty state")
    );
    assert!(h.patterns.get("shop").unwrap().observations >= 2);
    assert!(h.timers.save_count() >= 2);

    // Facts learned from the first module reach the second module's prompt.
    let second = &h.generator.generate_calls()[1];
    assert!(second.patterns.iter().any(|p| p.contains("`@/`")));
}

#[tokio::test]
async fn test_second_build_is_refused_while_locked() {
    let h = Harness::new(ScriptedGenerator::new(), ScriptedPreview::new());
    let config = h.config();
    std::fs::create_dir_all(config.lock_file.parent().unwrap()).unwrap();
    let held = std::fs::File::create(&config.lock_file).unwrap();
    held.try_lock_exclusive().unwrap();

    let mut project = Project::new("shop", vec![module("home", 1)]);
    let err = h.orchestrator().run(&mut project).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::BuildLocked { .. }));
    assert!(h.generator.generate_calls().is_empty());
}
