//! File materializer: applies generated files to the project tree and
//! builds the bounded file context for prompts.
//!
//! Every write goes to a temp file in the destination directory and is then
//! renamed over the target, so a crash mid-write leaves the previous
//! content intact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::codegen::GeneratedFile;
use crate::errors::OrchestratorError;
use crate::kiln_config::ContextSection;
use crate::model::{Module, Project};

/// Directories never listed or offered as context.
const SKIPPED_DIRS: [&str; 5] = ["node_modules", ".kiln", ".git", "dist", "build"];

/// Smallest remaining budget worth spending on a truncated file.
const MIN_TRUNCATED_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of applying one generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: String,
    pub change: FileChange,
    /// Content before the write, when the file existed
    pub previous: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub files: Vec<WrittenFile>,
}

impl MaterializeReport {
    /// All paths the attempt produced, including unchanged ones.
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn changed(&self) -> impl Iterator<Item = &WrittenFile> {
        self.files.iter().filter(|f| f.change != FileChange::Unchanged)
    }
}

/// A write that failed part-way: earlier files are already on disk.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ApplyError {
    /// Files written before the failure
    pub written: MaterializeReport,
    pub source: OrchestratorError,
}

/// A file offered to the generator as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
    /// Content was cut to fit the byte budget
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_files: usize,
    pub max_bytes: usize,
}

impl From<&ContextSection> for ContextLimits {
    fn from(section: &ContextSection) -> Self {
        Self {
            max_files: section.max_files,
            max_bytes: section.max_bytes,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        (&ContextSection::default()).into()
    }
}

pub struct FileMaterializer {
    root: PathBuf,
}

impl FileMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a project-relative file. Missing files are `None`.
    pub fn read(&self, relative: &str) -> Result<Option<String>> {
        let path = self.root.join(relative);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Write one file atomically. Unchanged content is not rewritten.
    pub fn write_file(&self, file: &GeneratedFile) -> Result<WrittenFile, OrchestratorError> {
        let target = self.root.join(&file.path);
        let previous = std::fs::read_to_string(&target).ok();

        if previous.as_deref() == Some(file.content.as_str()) {
            return Ok(WrittenFile {
                path: file.path.clone(),
                change: FileChange::Unchanged,
                previous,
                content: file.content.clone(),
            });
        }

        let fail = |source: std::io::Error| OrchestratorError::ResourceWriteFailed {
            path: target.clone(),
            source,
        };

        let dir = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir).map_err(fail)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
        tmp.write_all(file.content.as_bytes()).map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        tmp.persist(&target).map_err(|e| fail(e.error))?;

        Ok(WrittenFile {
            path: file.path.clone(),
            change: if previous.is_some() {
                FileChange::Updated
            } else {
                FileChange::Created
            },
            previous,
            content: file.content.clone(),
        })
    }

    /// Apply every file in order. Stops at the first failing write; files
    /// already written stay written and are returned with the error.
    pub fn apply(&self, files: &[GeneratedFile]) -> Result<MaterializeReport, ApplyError> {
        let mut report = MaterializeReport::default();
        for file in files {
            let written = match self.write_file(file) {
                Ok(written) => written,
                Err(source) => {
                    return Err(ApplyError {
                        written: report,
                        source,
                    });
                }
            };
            tracing::debug!(path = %written.path, change = ?written.change, "materialized file");
            report.files.push(written);
        }
        Ok(report)
    }

    /// List project files (relative, `/`-separated), skipping build and state directories.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .map(|name| SKIPPED_DIRS.contains(&name))
                    .unwrap_or(false)
        });
        for entry in walker {
            let entry = entry.context("Failed to walk project directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Select the minimal file context for the task at `task_index` of `module`.
///
/// Candidates, nearest first: `prior` (the task's own previous attempt),
/// files from earlier tasks of the same module, then files touched by each
/// `depends_on` module in declared order. Bounded by file count and total
/// bytes; the file that crosses the byte budget is truncated and marked.
pub fn select_context(
    materializer: &FileMaterializer,
    project: &Project,
    module: &Module,
    task_index: usize,
    prior: &[String],
    limits: ContextLimits,
) -> Vec<ContextFile> {
    let mut candidates: Vec<&str> = prior.iter().map(String::as_str).collect();
    for task in module.tasks.iter().take(task_index) {
        candidates.extend(task.files.iter().map(String::as_str));
    }
    for dep in &module.depends_on {
        if let Some(dep_module) = project.module(dep) {
            candidates.extend(dep_module.touched_files.iter().map(String::as_str));
        }
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    let mut remaining = limits.max_bytes;

    for path in candidates {
        if selected.len() >= limits.max_files || remaining == 0 {
            break;
        }
        if !seen.insert(path) {
            continue;
        }
        let content = match materializer.read(path) {
            Ok(Some(content)) => content,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(path, error = %e, "skipping unreadable context file");
                continue;
            }
        };

        if content.len() <= remaining {
            remaining -= content.len();
            selected.push(ContextFile {
                path: path.to_string(),
                content,
                truncated: false,
            });
        } else {
            if remaining >= MIN_TRUNCATED_BYTES {
                let cut = floor_char_boundary(&content, remaining);
                selected.push(ContextFile {
                    path: path.to_string(),
                    content: content[..cut].to_string(),
                    truncated: true,
                });
            }
            break;
        }
    }
    selected
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut idx = max.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
