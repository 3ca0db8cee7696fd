//! Deterministic test doubles for the orchestrator ports.
//!
//! Each double records the calls it receives and replays a script, so
//! scenario tests can drive the executor without a network, a dev server,
//! or a browser.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::codegen::{CodeGenerator, GenerationRequest, JudgeRequest};
use crate::errors::{GenerationError, PreviewError};
use crate::preview::PreviewController;
use crate::verify::ScreenshotCapturer;

/// Port reported by [`ScriptedPreview`].
pub const SCRIPTED_PORT: u16 = 5173;

/// Render a successful protocol response writing `files`.
pub fn file_response(files: &[(&str, &str)]) -> String {
    let mut out = String::from("Here are the files.\n");
    for (path, content) in files {
        out.push_str(&format!("<kiln-file path=\"{}\">\n{}\n</kiln-file>\n", path, content));
    }
    out.push_str("<kiln-done status=\"success\"/>\n");
    out
}

/// Render a response that gives up with `reason`.
pub fn failure_response(reason: &str) -> String {
    format!("<kiln-done status=\"failure\">{}</kiln-done>\n", reason)
}

/// Replays queued generation and verdict replies.
///
/// An exhausted queue answers with a transport error.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    verdicts: Mutex<VecDeque<Result<String, GenerationError>>>,
    generate_calls: Mutex<Vec<GenerationRequest>>,
    judge_calls: Mutex<Vec<JudgeRequest>>,
    cancel_on_generate: Mutex<Option<CancellationToken>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(self, responses: Vec<String>) -> Self {
        lock(&self.responses).extend(responses.into_iter().map(Ok));
        self
    }

    pub fn with_verdicts(self, verdicts: Vec<String>) -> Self {
        lock(&self.verdicts).extend(verdicts.into_iter().map(Ok));
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.responses).push_back(Ok(response.into()));
    }

    pub fn push_generate_error(&self, error: GenerationError) {
        lock(&self.responses).push_back(Err(error));
    }

    pub fn push_verdict(&self, verdict: impl Into<String>) {
        lock(&self.verdicts).push_back(Ok(verdict.into()));
    }

    /// Cancel `token` as soon as the next generation call arrives.
    pub fn cancel_on_generate(&self, token: CancellationToken) {
        *lock(&self.cancel_on_generate) = Some(token);
    }

    pub fn generate_calls(&self) -> Vec<GenerationRequest> {
        lock(&self.generate_calls).clone()
    }

    pub fn judge_calls(&self) -> Vec<JudgeRequest> {
        lock(&self.judge_calls).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn exhausted(kind: &str) -> GenerationError {
    GenerationError::Transport(format!("scripted {} queue exhausted", kind))
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        lock(&self.generate_calls).push(request.clone());
        if let Some(token) = lock(&self.cancel_on_generate).take() {
            token.cancel();
        }
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("response")))
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<String, GenerationError> {
        lock(&self.judge_calls).push(request.clone());
        lock(&self.verdicts)
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("verdict")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Default)]
struct PreviewState {
    running: bool,
    starts: usize,
    stops: usize,
    fail_remaining: usize,
    always_fail: bool,
    console: String,
    /// Console output appended on each successive start
    per_start: VecDeque<String>,
}

/// In-process preview with scripted start failures and console output.
///
/// Clones share state, so a test can keep a handle after moving the
/// preview into the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPreview {
    state: Arc<Mutex<PreviewState>>,
}

impl ScriptedPreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` starts with a port timeout.
    pub fn fail_starts(self, n: usize) -> Self {
        lock(&self.state).fail_remaining = n;
        self
    }

    /// Never open the port.
    pub fn always_fail(self) -> Self {
        lock(&self.state).always_fail = true;
        self
    }

    /// Console output for successive starts, one entry per start.
    pub fn with_console_per_start(self, outputs: Vec<String>) -> Self {
        lock(&self.state).per_start.extend(outputs);
        self
    }

    pub fn push_console(&self, text: &str) {
        let mut state = lock(&self.state);
        state.console.push_str(text);
        state.console.push('\n');
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }
}

#[async_trait]
impl PreviewController for ScriptedPreview {
    async fn start(&mut self, _project_path: &Path) -> Result<u16, PreviewError> {
        let mut state = lock(&self.state);
        state.starts += 1;
        if let Some(output) = state.per_start.pop_front() {
            state.console.push_str(&output);
            state.console.push('\n');
        }
        if state.always_fail || state.fail_remaining > 0 {
            state.fail_remaining = state.fail_remaining.saturating_sub(1);
            return Err(PreviewError::PortTimeout {
                port: SCRIPTED_PORT,
                secs: 1,
            });
        }
        state.running = true;
        Ok(SCRIPTED_PORT)
    }

    async fn stop(&mut self) -> Result<(), PreviewError> {
        let mut state = lock(&self.state);
        if state.running {
            state.running = false;
            state.stops += 1;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn port(&self) -> Option<u16> {
        lock(&self.state).running.then_some(SCRIPTED_PORT)
    }

    fn console_snapshot(&mut self) -> String {
        std::mem::take(&mut lock(&self.state).console)
    }
}

/// Returns fixed screenshot bytes and counts captures.
#[derive(Debug, Default)]
pub struct StaticScreenshot {
    bytes: Option<Vec<u8>>,
    captures: Mutex<usize>,
}

impl StaticScreenshot {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            captures: Mutex::new(0),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn captures(&self) -> usize {
        *lock(&self.captures)
    }
}

#[async_trait]
impl ScreenshotCapturer for StaticScreenshot {
    async fn capture(&self, _url: &str) -> anyhow::Result<Option<Vec<u8>>> {
        *lock(&self.captures) += 1;
        Ok(self.bytes.clone())
    }
}
