//! Persistence ports for learned pattern records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::PatternRecord;

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn load(&self, project: &str) -> Result<Option<PatternRecord>>;
    async fn save(&self, record: &PatternRecord) -> Result<()>;
}

/// `.kiln/patterns.json`. One file per project tree.
pub struct JsonPatternStore {
    path: PathBuf,
}

impl JsonPatternStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PatternStore for JsonPatternStore {
    async fn load(&self, project: &str) -> Result<Option<PatternRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read patterns file: {}", self.path.display()))?;
        let record: PatternRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse patterns JSON: {}", self.path.display()))?;
        if record.project != project {
            tracing::debug!(
                stored = %record.project,
                requested = %project,
                "patterns file belongs to another project"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &PatternRecord) -> Result<()> {
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize patterns")?;
        crate::util::write_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write patterns file: {}", self.path.display()))
    }
}

/// In-memory store keyed by project, for tests.
#[derive(Default)]
pub struct MemoryPatternStore {
    records: Mutex<HashMap<String, PatternRecord>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project: &str) -> Option<PatternRecord> {
        self.records.lock().ok().and_then(|r| r.get(project).cloned())
    }
}

#[async_trait]
impl PatternStore for MemoryPatternStore {
    async fn load(&self, project: &str) -> Result<Option<PatternRecord>> {
        Ok(self.get(project))
    }

    async fn save(&self, record: &PatternRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.project.clone(), record.clone());
        }
        Ok(())
    }
}
