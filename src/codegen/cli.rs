//! Claude CLI backend: prompt via stdin, `stream-json` events on stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{CodeGenerator, GenerationRequest, JudgeRequest};
use crate::errors::GenerationError;
use crate::stream::{StreamCollector, snippet};

pub struct CliGenerator {
    cmd: String,
    model: String,
    working_dir: PathBuf,
    timeout_secs: u64,
}

impl CliGenerator {
    pub fn new(cmd: String, model: String, working_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            cmd,
            model,
            working_dir,
            timeout_secs,
        }
    }

    fn flags(&self, allow_read: bool) -> Vec<String> {
        let mut flags = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            self.model.clone(),
        ];
        // Files come back through the response protocol, never through tools.
        flags.push("--allowedTools".to_string());
        flags.push(if allow_read { "Read".to_string() } else { String::new() });
        flags
    }

    async fn run(&self, input: &str, allow_read: bool) -> Result<String, GenerationError> {
        let start = Instant::now();
        let flags = self.flags(allow_read);
        tracing::debug!(cmd = %self.cmd, flags = %flags.join(" "), "spawning generator");

        let mut child = Command::new(&self.cmd)
            .args(&flags)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(GenerationError::SpawnFailed)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| GenerationError::Transport(format!("Failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| GenerationError::Transport(format!("Failed to close stdin: {}", e)))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationError::Transport("Failed to capture stdout".to_string()))?;

        let collect = async {
            let mut reader = BufReader::new(stdout).lines();
            let mut collector = StreamCollector::new();
            while let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?
            {
                collector.push_line(&line);
            }
            let status = child
                .wait()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?;
            Ok::<_, GenerationError>((collector, status))
        };

        let (collector, status) =
            match tokio::time::timeout(Duration::from_secs(self.timeout_secs), collect).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(GenerationError::Timeout {
                        secs: self.timeout_secs,
                    });
                }
            };

        let is_error = collector.is_error();
        let output = collector.finish();
        tracing::debug!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            exit = status.code().unwrap_or(-1),
            first_line = %snippet(&output, 60),
            "generator finished"
        );

        if is_error || !status.success() {
            return Err(GenerationError::Transport(format!(
                "{} exited with code {}: {}",
                self.cmd,
                status.code().unwrap_or(-1),
                snippet(&output, 200)
            )));
        }
        if output.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(output)
    }
}

#[async_trait]
impl CodeGenerator for CliGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let input = format!("{}\n\n{}", request.system, request.prompt);
        self.run(&input, false).await
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<String, GenerationError> {
        // The CLI reads images from disk, so hand it a file path.
        let stage_err = |e: std::io::Error| {
            GenerationError::Transport(format!("Failed to stage screenshot: {}", e))
        };
        let mut input = format!("{}\n\n{}", request.system, request.prompt);
        let shot_file = match &request.screenshot {
            Some(png) => {
                let file = tempfile::Builder::new()
                    .prefix("kiln-shot-")
                    .suffix(".png")
                    .tempfile()
                    .map_err(stage_err)?;
                std::fs::write(file.path(), png).map_err(stage_err)?;
                input.push_str(&format!(
                    "\n\nThe screenshot is at {}. Read it before answering.",
                    file.path().display()
                ));
                Some(file)
            }
            None => None,
        };
        let result = self.run(&input, shot_file.is_some()).await;
        drop(shot_file);
        result
    }

    fn name(&self) -> &str {
        "cli"
    }
}
