//! Cross-task pattern learning.
//!
//! | Submodule  | What it owns                                           |
//! |------------|--------------------------------------------------------|
//! | `learning` | `extract_facts()`, `top_tailwind_classes()`            |
//! | `store`    | `PatternStore` port, JSON file and in-memory stores    |
//!
//! After a task reaches `working`, its files are scanned for conventions.
//! Facts accumulate in a bounded per-project [`PatternRecord`] and are
//! injected verbatim into later generation prompts.

pub mod learning;
pub mod store;

pub use learning::{ObservedFact, TOP_TAILWIND_CLASSES, extract_facts, top_tailwind_classes};
pub use store::{JsonPatternStore, MemoryPatternStore, PatternStore};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::codegen::GeneratedFile;

/// Default bound on stored facts per project.
pub const DEFAULT_MAX_FACTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactKind {
    ComponentShape,
    ExportStyle,
    FileNaming,
    TailwindClass,
    Hook,
    ImportAlias,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::ComponentShape => "component-shape",
            FactKind::ExportStyle => "export-style",
            FactKind::FileNaming => "file-naming",
            FactKind::TailwindClass => "tailwind-class",
            FactKind::Hook => "hook",
            FactKind::ImportAlias => "import-alias",
        }
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A learned convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFact {
    pub kind: FactKind,
    pub value: String,
    pub text: String,
    /// Times the fact was observed
    pub count: u32,
    /// Observation sequence numbers, for ordering without clock ties
    pub first_seen: u64,
    pub last_seen: u64,
    pub updated_at: DateTime<Utc>,
}

/// The per-project accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub project: String,
    #[serde(default)]
    pub facts: Vec<PatternFact>,
    /// Number of observations folded in so far
    #[serde(default)]
    pub observations: u64,
}

impl PatternRecord {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            facts: Vec::new(),
            observations: 0,
        }
    }

    /// Fold one task's facts in. Returns texts of facts learned for the first time
    /// that survived eviction.
    pub fn observe(&mut self, observed: &[ObservedFact], max_facts: usize) -> Vec<String> {
        self.observations += 1;
        let seq = self.observations;
        let now = Utc::now();
        let mut learned = Vec::new();

        for fact in observed {
            match self
                .facts
                .iter_mut()
                .find(|f| f.kind == fact.kind && f.value == fact.value)
            {
                Some(existing) => {
                    existing.count += 1;
                    existing.last_seen = seq;
                    existing.updated_at = now;
                }
                None => {
                    self.facts.push(PatternFact {
                        kind: fact.kind,
                        value: fact.value.clone(),
                        text: fact.text.clone(),
                        count: 1,
                        first_seen: seq,
                        last_seen: seq,
                        updated_at: now,
                    });
                    learned.push((fact.kind, fact.value.clone()));
                }
            }
        }

        self.evict(max_facts);

        learned
            .into_iter()
            .filter_map(|(kind, value)| {
                self.facts
                    .iter()
                    .find(|f| f.kind == kind && f.value == value)
                    .map(|f| f.text.clone())
            })
            .collect()
    }

    /// Drop least-reinforced facts first, oldest first on ties.
    fn evict(&mut self, max_facts: usize) {
        while self.facts.len() > max_facts {
            let Some(idx) = self
                .facts
                .iter()
                .enumerate()
                .min_by_key(|(_, f)| (f.count, f.last_seen, f.first_seen))
                .map(|(i, _)| i)
            else {
                break;
            };
            let dropped = self.facts.remove(idx);
            tracing::debug!(kind = %dropped.kind, value = %dropped.value, "pattern fact evicted");
        }
    }

    /// Facts for the prompt, most reinforced first.
    pub fn prompt_facts(&self) -> Vec<String> {
        let mut facts: Vec<&PatternFact> = self.facts.iter().collect();
        facts.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));
        facts.into_iter().map(|f| f.text.clone()).collect()
    }
}

/// Owns a project's record and its store.
pub struct PatternLearner {
    record: PatternRecord,
    store: Arc<dyn PatternStore>,
    max_facts: usize,
}

impl PatternLearner {
    /// Load the record for `project`. An unreadable store starts empty.
    pub async fn load(store: Arc<dyn PatternStore>, project: &str, max_facts: usize) -> Self {
        let record = match store.load(project).await {
            Ok(Some(record)) => record,
            Ok(None) => PatternRecord::new(project),
            Err(e) => {
                tracing::warn!(error = %e, "pattern record unreadable, starting empty");
                PatternRecord::new(project)
            }
        };
        Self {
            record,
            store,
            max_facts: max_facts.max(1),
        }
    }

    /// Learn from a working task's files. Returns newly learned fact texts.
    pub fn learn(&mut self, files: &[GeneratedFile]) -> Vec<String> {
        let observed = extract_facts(files);
        self.record.observe(&observed, self.max_facts)
    }

    pub fn prompt_facts(&self) -> Vec<String> {
        self.record.prompt_facts()
    }

    pub fn record(&self) -> &PatternRecord {
        &self.record
    }

    pub async fn persist(&self) -> Result<()> {
        self.store.save(&self.record).await
    }
}
