//! Preview controller: one live dev server per project.
//!
//! The server is spawned through `sh -c` in its own process group so a stop
//! tears down the whole tree (npm, vite, esbuild). Console output from both
//! streams goes into a bounded ring buffer that verification drains.

use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::errors::PreviewError;
use crate::kiln_config::PreviewSection;

static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

const PORT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Port to the dev server process.
/// Real implementation: `DevServer`. Test double: `testing::ScriptedPreview`.
#[async_trait]
pub trait PreviewController: Send {
    /// Start the server for `project_path`, resolving once its port accepts connections.
    async fn start(&mut self, project_path: &Path) -> Result<u16, PreviewError>;

    /// Stop the server, waiting for the process to exit.
    async fn stop(&mut self) -> Result<(), PreviewError>;

    /// Fully stop, then start again.
    async fn restart(&mut self, project_path: &Path) -> Result<u16, PreviewError> {
        self.stop().await?;
        self.start(project_path).await
    }

    fn is_running(&self) -> bool;

    fn port(&self) -> Option<u16>;

    /// Drain buffered console output.
    fn console_snapshot(&mut self) -> String;
}

/// Bounded buffer of console lines.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(ANSI_REGEX.replace_all(line, "").to_string());
    }

    /// Take all buffered lines, noting how many were dropped.
    pub fn drain(&mut self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(&format!("[... {} earlier lines dropped]\n", self.dropped));
        }
        for line in self.lines.drain(..) {
            out.push_str(&line);
            out.push('\n');
        }
        self.dropped = 0;
        out
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The real dev server process.
pub struct DevServer {
    settings: PreviewSection,
    child: Option<Child>,
    port: Option<u16>,
    logs: Arc<Mutex<LogBuffer>>,
}

impl DevServer {
    pub fn new(settings: PreviewSection) -> Self {
        let logs = Arc::new(Mutex::new(LogBuffer::new(settings.log_buffer_lines)));
        Self {
            settings,
            child: None,
            port: None,
            logs,
        }
    }

    fn choose_port(&self) -> Result<u16, PreviewError> {
        if let Some(port) = self.settings.port {
            return Ok(port);
        }
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").map_err(PreviewError::NoFreePort)?;
        let port = listener
            .local_addr()
            .map_err(PreviewError::NoFreePort)?
            .port();
        Ok(port)
    }

    fn spawn_reader<R>(&self, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logs = Arc::clone(&self.logs);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(mut buffer) = logs.lock() {
                    buffer.push(&line);
                }
            }
        });
    }

    async fn wait_for_port(&mut self, port: u16) -> Result<(), PreviewError> {
        let timeout = Duration::from_secs(self.settings.start_timeout_secs);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(child) = self.child.as_mut()
                && let Ok(Some(status)) = child.try_wait()
            {
                self.child = None;
                return Err(PreviewError::ExitedEarly {
                    code: status.code(),
                });
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
                || tokio::net::TcpStream::connect(("::1", port)).await.is_ok()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PreviewError::PortTimeout {
                    port,
                    secs: self.settings.start_timeout_secs,
                });
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        }
    }

    #[cfg(unix)]
    fn kill_group(pid: u32) {
        // Negative pid addresses the whole process group.
        let _ = std::process::Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", pid)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    #[cfg(not(unix))]
    fn kill_group(_pid: u32) {}
}

#[async_trait]
impl PreviewController for DevServer {
    async fn start(&mut self, project_path: &Path) -> Result<u16, PreviewError> {
        if self.child.is_some() {
            self.stop().await?;
        }
        if self.settings.command.trim().is_empty() {
            return Err(PreviewError::EmptyCommand);
        }

        let port = self.choose_port()?;
        let command = self.settings.command.replace("{port}", &port.to_string());
        tracing::info!(%command, port, "starting preview");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(project_path)
            .env("PORT", port.to_string())
            .env("BROWSER", "none")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| PreviewError::SpawnFailed {
            command: command.clone(),
            source,
        })?;
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr);
        }
        self.child = Some(child);

        match self.wait_for_port(port).await {
            Ok(()) => {
                self.port = Some(port);
                tracing::debug!(port, "preview is accepting connections");
                Ok(port)
            }
            Err(e) => {
                tracing::warn!(error = %e, "preview failed to start");
                self.stop().await?;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), PreviewError> {
        self.port = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(pid) = child.id() {
            Self::kill_group(pid);
        }
        // kill() sends SIGKILL and waits for exit.
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "preview process already exited");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.child.is_some() && self.port.is_some()
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    fn console_snapshot(&mut self) -> String {
        match self.logs.lock() {
            Ok(mut buffer) => buffer.drain(),
            Err(_) => String::new(),
        }
    }
}

/// URL of a preview on `port`.
pub fn preview_url(port: u16) -> String {
    format!("http://localhost:{}/", port)
}
