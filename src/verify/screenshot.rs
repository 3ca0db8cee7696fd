//! Screenshot capture for the verification loop.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Maximum time a screenshot command may run.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(60);

/// Port to the screenshot service.
///
/// `Ok(None)` means "nothing to show yet" and is not an error.
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    async fn capture(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

/// Used when no screenshot command is configured. Verdicts fall back to console output.
pub struct NoScreenshot;

#[async_trait]
impl ScreenshotCapturer for NoScreenshot {
    async fn capture(&self, _url: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Runs a headless-browser command with `{url}` and `{output}` substituted.
///
/// Example: `npx playwright screenshot --full-page {url} {output}`
pub struct CommandScreenshot {
    template: String,
}

impl CommandScreenshot {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    fn render(&self, url: &str, output: &str) -> String {
        self.template.replace("{url}", url).replace("{output}", output)
    }
}

#[async_trait]
impl ScreenshotCapturer for CommandScreenshot {
    async fn capture(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let dir = tempfile::tempdir().context("Failed to create screenshot directory")?;
        let output = dir.path().join("preview.png");
        let command = self.render(url, &output.to_string_lossy());
        tracing::debug!(%command, "capturing screenshot");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn screenshot command: {}", command))?;

        let result = match timeout(CAPTURE_TIMEOUT, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for screenshot command")?,
            Err(_) => bail!(
                "Screenshot command timed out after {}s",
                CAPTURE_TIMEOUT.as_secs()
            ),
        };
        if !result.status.success() {
            bail!(
                "Screenshot command exited with code {}: {}",
                result.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        match std::fs::read(&output) {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            _ => Ok(None),
        }
    }
}
