//! Learned per-step durations for progress rendering.
//!
//! Each step type starts from a fixed seed that counts as one sample. Up to
//! `window` samples the estimate is the cumulative mean. After that it moves
//! as an exponential average with alpha = 1/window. Estimates are read-only
//! input to the UI and never gate execution.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::model::{Project, StepType};

/// Samples before the estimate switches to an exponential average.
pub const DEFAULT_WINDOW: u32 = 50;

/// Observations are clamped to this many seconds.
pub const MAX_OBSERVATION_SECS: f64 = 3600.0;

pub const TIMERS_FILE_NAME: &str = "timers.json";

/// Seed duration for a step type, in seconds.
pub fn seed_secs(step: StepType) -> f64 {
    match step {
        StepType::Contracts => 15.0,
        StepType::Shell => 20.0,
        StepType::Shared => 25.0,
        StepType::Module => 30.0,
        StepType::Integration => 10.0,
        StepType::Simplify => 15.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub estimate_secs: f64,
    /// Includes the seed
    pub samples: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StepTiming {
    fn seeded(step: StepType) -> Self {
        Self {
            estimate_secs: seed_secs(step),
            samples: 1,
            updated_at: None,
        }
    }
}

/// Persisted form of the estimator, shared by every project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerHistory {
    #[serde(default)]
    pub steps: BTreeMap<StepType, StepTiming>,
}

/// Persistence port for timer history.
#[async_trait]
pub trait TimerStore: Send + Sync {
    async fn load(&self) -> Result<Option<TimerHistory>>;
    async fn save(&self, history: &TimerHistory) -> Result<()>;
}

/// `~/.kiln/timers.json`
pub struct JsonTimerStore {
    path: PathBuf,
}

impl JsonTimerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the global kiln directory.
    pub fn global() -> Result<Self> {
        Ok(Self::new(crate::config::global_dir()?.join(TIMERS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TimerStore for JsonTimerStore {
    async fn load(&self) -> Result<Option<TimerHistory>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read timers file: {}", self.path.display()))?;
        let history = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse timers JSON: {}", self.path.display()))?;
        Ok(Some(history))
    }

    async fn save(&self, history: &TimerHistory) -> Result<()> {
        let content =
            serde_json::to_string_pretty(history).context("Failed to serialize timers")?;
        crate::util::write_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write timers file: {}", self.path.display()))
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryTimerStore {
    history: Mutex<Option<TimerHistory>>,
    saves: Mutex<usize>,
}

impl MemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: TimerHistory) -> Self {
        Self {
            history: Mutex::new(Some(history)),
            saves: Mutex::new(0),
        }
    }

    pub fn saved(&self) -> Option<TimerHistory> {
        self.history.lock().ok().and_then(|h| h.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl TimerStore for MemoryTimerStore {
    async fn load(&self) -> Result<Option<TimerHistory>> {
        Ok(self.saved())
    }

    async fn save(&self, history: &TimerHistory) -> Result<()> {
        if let Ok(mut slot) = self.history.lock() {
            *slot = Some(history.clone());
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

pub struct TimerEstimator {
    history: TimerHistory,
    store: Arc<dyn TimerStore>,
    window: u32,
}

impl TimerEstimator {
    /// Load history from `store`. An unreadable store starts from the seeds.
    pub async fn load(store: Arc<dyn TimerStore>) -> Self {
        let history = match store.load().await {
            Ok(Some(history)) => history,
            Ok(None) => TimerHistory::default(),
            Err(e) => {
                tracing::warn!(error = %e, "timer history unreadable, starting from seeds");
                TimerHistory::default()
            }
        };
        Self {
            history,
            store,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window.max(1);
        self
    }

    /// Learned duration for `step`, in seconds.
    pub fn estimate(&self, step: StepType) -> f64 {
        self.history
            .steps
            .get(&step)
            .map(|t| t.estimate_secs)
            .unwrap_or_else(|| seed_secs(step))
    }

    pub fn samples(&self, step: StepType) -> u32 {
        self.history.steps.get(&step).map(|t| t.samples).unwrap_or(1)
    }

    /// Fold one observed duration into the estimate and return the new value.
    pub fn observe(&mut self, step: StepType, secs: f64) -> f64 {
        if !secs.is_finite() {
            tracing::debug!(step = %step, "ignoring non-finite duration");
            return self.estimate(step);
        }
        let secs = secs.clamp(0.0, MAX_OBSERVATION_SECS);
        let window = self.window;
        let timing = self
            .history
            .steps
            .entry(step)
            .or_insert_with(|| StepTiming::seeded(step));

        if timing.samples < window {
            let n = timing.samples as f64;
            timing.estimate_secs = (timing.estimate_secs * n + secs) / (n + 1.0);
        } else {
            timing.estimate_secs += (secs - timing.estimate_secs) / window as f64;
        }
        timing.samples = timing.samples.saturating_add(1);
        timing.updated_at = Some(Utc::now());
        tracing::debug!(
            step = %step,
            observed_secs = secs,
            estimate_secs = timing.estimate_secs,
            "timer updated"
        );
        timing.estimate_secs
    }

    /// Sum of estimates for every task in `project` not yet settled.
    pub fn estimate_remaining(&self, project: &Project) -> f64 {
        project
            .modules
            .iter()
            .flat_map(|m| m.tasks.iter())
            .filter(|t| !t.is_settled())
            .map(|t| self.estimate(t.step_type))
            .sum()
    }

    /// (step, estimate, samples) for every step type.
    pub fn snapshot(&self) -> Vec<(StepType, f64, u32)> {
        StepType::ALL
            .iter()
            .map(|&step| (step, self.estimate(step), self.samples(step)))
            .collect()
    }

    pub async fn persist(&self) -> Result<()> {
        self.store.save(&self.history).await
    }
}
