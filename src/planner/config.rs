//! Configuration for the module planner.

use serde::{Deserialize, Serialize};

/// Component estimate at or above which a feature is split into sub-tasks.
pub const DEFAULT_DECOMPOSE_THRESHOLD: usize = 4;

/// Upper bound on sub-tasks per feature module.
pub const DEFAULT_MAX_SUB_TASKS: usize = 4;

/// Lower bound on sub-tasks once a feature is split.
pub const MIN_SUB_TASKS: usize = 2;

/// Target number of components a single sub-task produces.
pub const COMPONENTS_PER_SUB_TASK: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub decompose_threshold: usize,
    pub max_sub_tasks: usize,
    /// Whether to append a cleanup module after integration.
    pub simplify_step: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            decompose_threshold: DEFAULT_DECOMPOSE_THRESHOLD,
            max_sub_tasks: DEFAULT_MAX_SUB_TASKS,
            simplify_step: false,
        }
    }
}

impl PlannerConfig {
    pub fn set_decompose_threshold(mut self, threshold: usize) -> Self {
        self.decompose_threshold = threshold;
        self
    }

    pub fn set_max_sub_tasks(mut self, max: usize) -> Self {
        self.max_sub_tasks = max;
        self
    }

    pub fn set_simplify_step(mut self, enabled: bool) -> Self {
        self.simplify_step = enabled;
        self
    }

    /// Effective sub-task ceiling (never below the split minimum).
    pub fn sub_task_ceiling(&self) -> usize {
        self.max_sub_tasks.max(MIN_SUB_TASKS)
    }
}
