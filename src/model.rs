//! Project, module and task model for the kiln orchestrator.
//!
//! This module provides:
//! - `Project`: the persisted root (`.kiln/project.json`) owning all modules
//! - `Module`: a unit of the product spec with its ordered tasks
//! - `Task`: one generation-verify-fix cycle producing a bounded set of files
//! - `Suggestion`: advisory output from the learner, verifier and classifier

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::classify::ErrorRecord;

/// Kind of generation step. Drives prompt framing and timer estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Shared types for the data model
    Contracts,
    /// Application shell: layout, routing, navigation
    Shell,
    /// Shared UI components
    Shared,
    /// A feature module
    Module,
    /// Wiring feature modules into the shell
    Integration,
    /// Cleanup pass over the generated code
    Simplify,
}

impl StepType {
    pub const ALL: [StepType; 6] = [
        StepType::Contracts,
        StepType::Shell,
        StepType::Shared,
        StepType::Module,
        StepType::Integration,
        StepType::Simplify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Contracts => "contracts",
            StepType::Shell => "shell",
            StepType::Shared => "shared",
            StepType::Module => "module",
            StepType::Integration => "integration",
            StepType::Simplify => "simplify",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Generating,
    Writing,
    Verifying,
    Fixing,
    Working,
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state for the current module run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Working | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Generating => "generating",
            TaskStatus::Writing => "writing",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Fixing => "fixing",
            TaskStatus::Working => "working",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Module build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleStatus {
    #[default]
    Draft,
    Building,
    Complete,
    NeedsWork,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Draft => "draft",
            ModuleStatus::Building => "building",
            ModuleStatus::Complete => "complete",
            ModuleStatus::NeedsWork => "needs-work",
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment stage of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMode {
    #[default]
    Dev,
    Test,
    Prod,
}

impl ProjectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectMode::Dev => "dev",
            ProjectMode::Test => "test",
            ProjectMode::Prod => "prod",
        }
    }

    /// The stage a project is promoted into from this one.
    pub fn next(&self) -> Option<ProjectMode> {
        match self {
            ProjectMode::Dev => Some(ProjectMode::Test),
            ProjectMode::Test => Some(ProjectMode::Prod),
            ProjectMode::Prod => None,
        }
    }
}

impl std::fmt::Display for ProjectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProjectMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(ProjectMode::Dev),
            "test" => Ok(ProjectMode::Test),
            "prod" => Ok(ProjectMode::Prod),
            _ => bail!("Invalid mode '{}'. Valid values: dev, test, prod", s),
        }
    }
}

/// Why a task ended up failed (or was interrupted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// Every attempt within the retry ceiling came back broken.
    RetriesExhausted,
    /// A filesystem fault while materializing files. Never retried automatically.
    Resource { message: String },
    /// The build was aborted at a transition boundary.
    Cancelled,
}

impl TaskFailure {
    pub fn describe(&self) -> String {
        match self {
            TaskFailure::RetriesExhausted => "retry ceiling reached".to_string(),
            TaskFailure::Resource { message } => format!("resource error: {}", message),
            TaskFailure::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Classification of an advisory suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Pattern,
    Improvement,
    Warning,
}

/// Advisory output. Never blocks the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    #[serde(rename = "classification")]
    pub kind: SuggestionKind,
    pub description: String,
    /// Component that produced the suggestion (e.g. "pattern-learner")
    pub source: String,
    #[serde(default)]
    pub applied: bool,
}

impl Suggestion {
    pub fn new(kind: SuggestionKind, description: impl Into<String>, source: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            description: description.into(),
            source: source.to_string(),
            applied: false,
        }
    }
}

/// One generation-verify-fix cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub step_type: StepType,
    #[serde(default)]
    pub status: TaskStatus,
    /// Generation attempts made so far. Never exceeds the retry ceiling.
    #[serde(default)]
    pub attempts: u32,
    /// Position within a decomposed module, if this is a sub-task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_task: Option<usize>,
    /// Component names this task is responsible for producing.
    #[serde(default)]
    pub components: Vec<String>,
    /// Files written by the winning attempt.
    #[serde(default)]
    pub files: Vec<String>,
    /// Errors from the last broken verification, kept only while failed.
    #[serde(default)]
    pub last_errors: Vec<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    /// Set by the user's "skip" action on a failed task.
    #[serde(default)]
    pub skipped: bool,
}

impl Task {
    pub fn new(id: &str, description: &str, step_type: StepType) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            step_type,
            status: TaskStatus::Queued,
            attempts: 0,
            sub_task: None,
            components: Vec::new(),
            files: Vec::new(),
            last_errors: Vec::new(),
            failure: None,
            skipped: false,
        }
    }

    pub fn with_components(mut self, components: Vec<String>) -> Self {
        self.components = components;
        self
    }

    pub fn with_sub_task(mut self, index: usize) -> Self {
        self.sub_task = Some(index);
        self
    }

    /// True when a module run should pass over this task.
    pub fn is_settled(&self) -> bool {
        self.status == TaskStatus::Working || (self.status == TaskStatus::Failed && self.skipped)
    }

    /// Consume one unit of the retry budget. Returns false once the ceiling is reached.
    pub fn begin_attempt(&mut self, max_attempts: u32) -> bool {
        if self.attempts >= max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Return the task to its initial state (manual "retry").
    pub fn reset(&mut self) {
        self.status = TaskStatus::Queued;
        self.attempts = 0;
        self.last_errors.clear();
        self.failure = None;
        self.skipped = false;
    }
}

/// A unit of the product spec mapped to one or more tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub step_type: StepType,
    #[serde(default)]
    pub status: ModuleStatus,
    #[serde(default)]
    pub version: u32,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub touched_files: Vec<String>,
    /// Modules whose touched files form this module's generation context
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// What the verifier checks the preview against
    #[serde(default)]
    pub acceptance: String,
}

impl Module {
    pub fn new(id: &str, name: &str, step_type: StepType, tasks: Vec<Task>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            step_type,
            status: ModuleStatus::Draft,
            version: 0,
            tasks,
            suggestions: Vec::new(),
            touched_files: Vec::new(),
            depends_on: Vec::new(),
            acceptance: String::new(),
        }
    }

    pub fn is_decomposed(&self) -> bool {
        self.tasks.iter().any(|t| t.sub_task.is_some())
    }

    /// First task that ended failed, if any.
    pub fn failed_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Failed)
    }

    /// Record files written by a task, keeping first-seen order.
    pub fn touch_files(&mut self, paths: &[String]) {
        for path in paths {
            if !self.touched_files.contains(path) {
                self.touched_files.push(path.clone());
            }
        }
    }

    pub fn add_suggestion(&mut self, suggestion: Suggestion) {
        if !self
            .suggestions
            .iter()
            .any(|s| s.kind == suggestion.kind && s.description == suggestion.description)
        {
            self.suggestions.push(suggestion);
        }
    }

    /// Derive the post-run status from task states.
    ///
    /// `needs-work` iff some task failed; `complete` iff every task is working.
    /// A run that stopped with unfinished tasks and no failure (an abort) is
    /// also `needs-work` so it can be resumed.
    pub fn settle_status(&mut self) -> ModuleStatus {
        self.status = if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            ModuleStatus::NeedsWork
        } else if self.tasks.iter().all(|t| t.status == TaskStatus::Working) {
            ModuleStatus::Complete
        } else {
            ModuleStatus::NeedsWork
        };
        self.status
    }

    /// Manual "retry": reset the failed task so the next build re-attempts it.
    pub fn retry_failed(&mut self) -> Result<String> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Failed)
            .with_context(|| format!("Module {} has no failed task", self.id))?;
        task.reset();
        let id = task.id.clone();
        self.status = ModuleStatus::Draft;
        Ok(id)
    }

    /// Manual "skip": leave the failed task failed but let the next build continue past it.
    pub fn skip_failed(&mut self) -> Result<String> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Failed && !t.skipped)
            .with_context(|| format!("Module {} has no failed task to skip", self.id))?;
        task.skipped = true;
        Ok(task.id.clone())
    }
}

/// An entry in a project's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u32,
    pub mode: ProjectMode,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// The persisted root of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mode: ProjectMode,
    pub modules: Vec<Module>,
    #[serde(default)]
    pub version: u32,
    /// Deploy URL per mode, recorded on promotion
    #[serde(default)]
    pub deploy_urls: BTreeMap<ProjectMode, String>,
    #[serde(default)]
    pub history: Vec<VersionEntry>,
    /// Hash of the spec the modules were planned from
    #[serde(default)]
    pub spec_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str, modules: Vec<Module>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            mode: ProjectMode::Dev,
            modules,
            version: 0,
            deploy_urls: BTreeMap::new(),
            history: Vec::new(),
            spec_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn module_mut(&mut self, id: &str) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.id == id)
    }

    /// Modules blocking promotion.
    pub fn blocking_modules(&self) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| m.status != ModuleStatus::Complete)
            .collect()
    }

    /// Bump the version counter and append a history entry.
    pub fn bump_version(&mut self, summary: impl Into<String>) {
        self.version += 1;
        self.history.push(VersionEntry {
            version: self.version,
            mode: self.mode,
            timestamp: Utc::now(),
            summary: summary.into(),
        });
    }

    /// Advance to `target`. Refused while any module is not complete.
    pub fn promote(&mut self, target: ProjectMode, deploy_url: Option<String>) -> Result<()> {
        if self.mode.next() != Some(target) {
            bail!(
                "Cannot promote from {} to {} (next stage is {})",
                self.mode,
                target,
                self.mode.next().map(|m| m.to_string()).unwrap_or_else(|| "none".into())
            );
        }
        let blocking = self.blocking_modules();
        if !blocking.is_empty() {
            let ids: Vec<String> = blocking
                .iter()
                .map(|m| format!("{} ({})", m.id, m.status))
                .collect();
            bail!("Promotion blocked by modules: {}", ids.join(", "));
        }
        self.mode = target;
        if let Some(url) = deploy_url {
            self.deploy_urls.insert(target, url);
        }
        self.bump_version(format!("promoted to {}", target));
        Ok(())
    }

    /// Load a project from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse project JSON: {}", path.display()))
    }

    /// Save the project atomically (temp file in the same directory + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize project to JSON")?;
        crate::util::write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write project file: {}", path.display()))
    }
}
