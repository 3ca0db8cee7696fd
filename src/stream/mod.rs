//! Claude CLI `stream-json` event parsing.

use serde::Deserialize;
use serde_json::Value;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Accumulates a stream-json session into its final text.
#[derive(Debug, Default)]
pub struct StreamCollector {
    text: String,
    result: Option<String>,
    is_error: bool,
    tool_uses: usize,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line. Non-JSON lines are kept as plain text.
    pub fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(StreamEvent::Assistant { message, .. }) => {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                        }
                        ContentBlock::ToolUse { name, .. } => {
                            self.tool_uses += 1;
                            tracing::debug!(tool = %name, "generator used a tool");
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            Ok(StreamEvent::Result {
                result, is_error, ..
            }) => {
                self.result = result;
                self.is_error = is_error;
            }
            Ok(StreamEvent::User {}) | Ok(StreamEvent::System { .. }) => {}
            Err(_) => {
                self.text.push_str(line);
                self.text.push('\n');
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn tool_uses(&self) -> usize {
        self.tool_uses
    }

    /// The final `result` payload when present, otherwise the accumulated text.
    pub fn finish(self) -> String {
        self.result.unwrap_or(self.text)
    }
}

/// First line of `text`, cut to `max_len` characters.
pub fn snippet(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text).trim();
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
