//! Analysis client for OpenAI-compatible chat completion endpoints.
//!
//! Works against the hosted API as well as local servers that speak the same
//! protocol (Ollama, LM Studio, vLLM). Images travel as base64 data URLs in a
//! single user message, in batch order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::AnalysisClient;
use crate::error::{EngineError, Result};

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL, without the `/chat/completions` suffix
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound for one request, connect through body
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: AiConfig,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(config: AiConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }
}

fn image_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}

/// Encode one image as a `data:` URL.
pub fn data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::Analysis(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(format!(
        "data:{};base64,{}",
        image_mime(path),
        general_purpose::STANDARD.encode(bytes)
    ))
}

/// The prompt, an item count reminder, then every image in order.
fn build_content(images: &[PathBuf], prompt: &str) -> Result<Vec<ContentPart>> {
    let mut content = Vec::with_capacity(images.len() + 1);
    content.push(ContentPart::Text {
        text: format!("{}\n\nThere are {} images.", prompt, images.len()),
    });
    for path in images {
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url: data_url(path)? },
        });
    }
    Ok(content)
}

impl AnalysisClient for OpenAiClient {
    fn analyze(&self, images: &[PathBuf], prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: build_content(images, prompt)?,
            }],
            temperature: 0.2,
        };

        let mut builder = self.client.post(self.url()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(model = %self.config.model, images = images.len(), "sending analysis request");

        let response = builder
            .send()
            .map_err(|e| EngineError::Analysis(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::Analysis(format!("API error {}: {}", status, body.trim())));
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| EngineError::Analysis(format!("invalid response body: {}", e)))?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EngineError::Analysis("response had no content".to_string()))
    }
}
