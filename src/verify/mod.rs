//! Verification loop: restart the preview, capture it, ask for a verdict.
//!
//! The verdict is authoritative. When the preview never comes up, the call to
//! the generation service is skipped and the outcome is BROKEN with a
//! `bundler` or `runtime` record.

mod screenshot;

pub use screenshot::{CommandScreenshot, NoScreenshot, ScreenshotCapturer};

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::classify::{ErrorCategory, ErrorClassifier, ErrorRecord};
use crate::codegen::prompt::{JUDGE_SYSTEM_PROMPT, render_judge_prompt};
use crate::codegen::{CodeGenerator, JudgeRequest};
use crate::errors::PreviewError;
use crate::model::{Module, Task};
use crate::preview::{PreviewController, preview_url};
use crate::stream::snippet;
use crate::util::extract_json_object;

static KEYWORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(WORKING|BROKEN)\b").unwrap());

/// Console lines kept on a start-failure record.
const START_FAILURE_TAIL_LINES: usize = 40;

/// Result of verifying one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Working {
        notes: Option<String>,
    },
    Broken {
        errors: Vec<ErrorRecord>,
        /// False when the verdict call was skipped (preview never started)
        judged: bool,
    },
}

impl VerifyOutcome {
    pub fn is_working(&self) -> bool {
        matches!(self, VerifyOutcome::Working { .. })
    }
}

/// A parsed judge reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub working: bool,
    pub diagnosis: String,
    pub notes: String,
}

#[derive(Debug, Deserialize)]
struct VerdictJson {
    verdict: String,
    #[serde(default)]
    diagnosis: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Parse a judge reply: a JSON object first, then a bare keyword.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    if let Some(json) = extract_json_object(text)
        && let Ok(parsed) = serde_json::from_str::<VerdictJson>(json)
    {
        let working = match parsed.verdict.trim().to_uppercase().as_str() {
            "WORKING" => true,
            "BROKEN" => false,
            _ => return None,
        };
        return Some(Verdict {
            working,
            diagnosis: parsed.diagnosis.unwrap_or_default().trim().to_string(),
            notes: parsed.notes.unwrap_or_default().trim().to_string(),
        });
    }

    let mut found = KEYWORD_REGEX.find_iter(text).map(|m| m.as_str()).collect::<Vec<_>>();
    found.dedup();
    match found.as_slice() {
        [keyword] => {
            let working = *keyword == "WORKING";
            let rest = text
                .split_once(keyword)
                .map(|(_, after)| after.trim_start_matches([':', '-', ' ', '.']).trim())
                .unwrap_or_default();
            Some(Verdict {
                working,
                diagnosis: if working { String::new() } else { rest.to_string() },
                notes: if working { rest.to_string() } else { String::new() },
            })
        }
        // Both keywords, or neither.
        _ => None,
    }
}

pub struct Verifier {
    generator: Arc<dyn CodeGenerator>,
    screenshots: Arc<dyn ScreenshotCapturer>,
    classifier: ErrorClassifier,
    settle: Duration,
}

impl Verifier {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        screenshots: Arc<dyn ScreenshotCapturer>,
        settle: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            generator,
            screenshots,
            classifier: ErrorClassifier::new(verbose),
            settle,
        }
    }

    /// Verify `task` against the tree in `project_dir`.
    ///
    /// The preview is restarted first so it observes exactly this attempt's files.
    pub async fn verify(
        &self,
        preview: &mut dyn PreviewController,
        project_dir: &Path,
        module: &Module,
        task: &Task,
    ) -> VerifyOutcome {
        let port = match self.start_preview(preview, project_dir).await {
            Ok(port) => port,
            Err(e) => return self.start_failure(&e, &preview.console_snapshot()),
        };

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let console = preview.console_snapshot();
        let url = preview_url(port);
        let screenshot = match self.screenshots.capture(&url).await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "screenshot capture failed");
                None
            }
        };

        let request = JudgeRequest {
            task_id: task.id.clone(),
            attempt: task.attempts,
            system: JUDGE_SYSTEM_PROMPT.to_string(),
            prompt: render_judge_prompt(module, task, &console, screenshot.is_some()),
            screenshot,
        };
        let reply = match self.generator.judge(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "verdict call failed");
                return VerifyOutcome::Broken {
                    errors: vec![ErrorRecord::unknown(format!("Verdict call failed: {}", e))],
                    judged: true,
                };
            }
        };

        match parse_verdict(&reply) {
            Some(verdict) if verdict.working => {
                tracing::debug!(task = %task.id, "verdict: working");
                VerifyOutcome::Working {
                    notes: Some(verdict.notes).filter(|n| !n.is_empty()),
                }
            }
            Some(verdict) => {
                tracing::debug!(task = %task.id, diagnosis = %verdict.diagnosis, "verdict: broken");
                let text = format!("{}\n{}", console, verdict.diagnosis);
                VerifyOutcome::Broken {
                    errors: self.classifier.classify_or_unknown(&text, &verdict.diagnosis),
                    judged: true,
                }
            }
            None => VerifyOutcome::Broken {
                errors: vec![
                    ErrorRecord::unknown(format!("Unparseable verdict: {}", snippet(&reply, 120)))
                        .with_raw(reply),
                ],
                judged: true,
            },
        }
    }

    /// Restart the preview, retrying once for cold starts.
    async fn start_preview(
        &self,
        preview: &mut dyn PreviewController,
        project_dir: &Path,
    ) -> Result<u16, PreviewError> {
        match preview.restart(project_dir).await {
            Ok(port) => Ok(port),
            Err(first) => {
                tracing::info!(error = %first, "preview start failed, retrying once");
                preview.start(project_dir).await
            }
        }
    }

    fn start_failure(&self, error: &PreviewError, console: &str) -> VerifyOutcome {
        let classified: Vec<ErrorRecord> = self
            .classifier
            .classify(console)
            .into_iter()
            .filter(|r| r.category != ErrorCategory::Unknown)
            .collect();
        let category = if classified.iter().any(|r| r.category == ErrorCategory::Runtime) {
            ErrorCategory::Runtime
        } else {
            ErrorCategory::Bundler
        };

        let lines: Vec<&str> = console.lines().collect();
        let tail = lines[lines.len().saturating_sub(START_FAILURE_TAIL_LINES)..].join("\n");
        let lead = ErrorRecord::new(category, format!("Preview failed to start: {}", error))
            .with_raw(tail);

        let mut errors = vec![lead];
        errors.extend(classified);
        tracing::warn!(category = %category, error = %error, "verification short-circuited");
        VerifyOutcome::Broken {
            errors,
            judged: false,
        }
    }
}
