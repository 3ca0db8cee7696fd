//! Messages API backend.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CodeGenerator, GenerationRequest, JudgeRequest};
use crate::errors::GenerationError;
use crate::kiln_config::GenerationSection;

const API_VERSION: &str = "2023-06-01";

/// Verdict replies are short.
const JUDGE_MAX_TOKENS: u32 = 1024;

pub struct HttpGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl HttpGenerator {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            timeout_secs,
        })
    }

    /// Build from `[generation]`, reading the key from the configured env var.
    pub fn from_settings(settings: &GenerationSection) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::MissingApiKey {
                env_var: settings.api_key_env.clone(),
            })?;
        Self::new(
            settings.api_url.clone(),
            api_key,
            settings.model.clone(),
            settings.max_tokens,
            settings.timeout_secs,
        )
    }

    async fn send(&self, request: &MessagesRequest) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.api_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::ApiStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to parse response: {}", e)))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "generation stopped at max_tokens");
        }
        Ok(text)
    }

    fn map_transport(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl CodeGenerator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        tracing::debug!(
            task = %request.task_id,
            attempt = request.attempt,
            prompt_chars = request.prompt.len(),
            "sending generation request"
        );
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![ContentBlock::Text {
                    text: request.prompt.clone(),
                }],
            }],
        };
        self.send(&body).await
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<String, GenerationError> {
        let mut content = Vec::new();
        if let Some(png) = &request.screenshot {
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64".to_string(),
                    media_type: "image/png".to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(png),
                },
            });
        }
        content.push(ContentBlock::Text {
            text: request.prompt.clone(),
        });

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: JUDGE_MAX_TOKENS,
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        };
        self.send(&body).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
