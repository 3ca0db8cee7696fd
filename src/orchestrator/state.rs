//! Append-only task transition log (`.kiln/state`).
//!
//! One line per transition: `module|task|attempt|status|rfc3339`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::model::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub module: String,
    pub task: String,
    pub attempt: u32,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl StateEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(5, '|');
        let (Some(module), Some(task), Some(attempt), Some(status), Some(stamp)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return None;
        };
        Some(StateEntry {
            module: module.to_string(),
            task: task.to_string(),
            attempt: attempt.parse().ok()?,
            status: status.to_string(),
            timestamp: DateTime::parse_from_rfc3339(stamp.trim()).ok()?.to_utc(),
        })
    }
}

impl fmt::Display for StateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.module,
            self.task,
            self.attempt,
            self.status,
            self.timestamp.to_rfc3339()
        )
    }
}

pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a transition.
    pub fn record(&self, module: &str, task: &str, attempt: u32, status: TaskStatus) -> Result<()> {
        let entry = StateEntry {
            module: module.to_string(),
            task: task.to_string(),
            attempt,
            status: status.as_str().to_string(),
            timestamp: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(log, "{}", entry).context("Failed to append state entry")?;
        Ok(())
    }

    /// All entries, skipping malformed lines.
    pub fn entries(&self) -> Result<Vec<StateEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        Ok(content.lines().filter_map(StateEntry::parse).collect())
    }

    pub fn module_entries(&self, module: &str) -> Result<Vec<StateEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.module == module)
            .collect())
    }

    /// Most recent entry for a task.
    pub fn last_entry(&self, module: &str, task: &str) -> Result<Option<StateEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rfind(|e| e.module == module && e.task == task))
    }

    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
            _ => Ok(()),
        }
    }
}
