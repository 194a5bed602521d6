//! Client for the OpenAI-compatible inference server (LocalAI).
//!
//! Provides the three model callbacks the retrieval engine needs:
//! text completion, image description and text embedding.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::error::LlmError;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    /// Sent to the text model only
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Answer from a vision call.
///
/// `degraded` is set when the vision model failed and the text model
/// answered from the prompt alone.
#[derive(Debug, Clone)]
pub struct VisionReply {
    pub text: String,
    pub degraded: bool,
}

/// Build a `data:` URL for raw image bytes, sniffing the MIME type.
pub fn image_data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg");
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// OpenAI-compatible API client
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    root_url: String,
    api_key: String,
    llm_model: String,
    vision_model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
    vision_max_tokens: u32,
    embedding_batch_size: usize,
}

impl OpenAiClient {
    pub fn new(config: &RagConfig) -> Result<Self, LlmError> {
        let base_url = config.localai_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LlmError::Connection {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            root_url: config.localai_root().to_string(),
            base_url,
            api_key: config.localai_api_key.clone(),
            llm_model: config.llm_model.clone(),
            vision_model: config.vision_model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            vision_max_tokens: config.vision_max_tokens,
            embedding_batch_size: config.embedding_batch_size.max(1),
        })
    }

    /// Single-turn completion with the text model.
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.chat(&self.text_request(prompt)).await
    }

    /// Describe one or more images with the vision model.
    ///
    /// Falls back to a text-only completion of the same prompt if the vision
    /// call fails.
    pub async fn describe_images(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Result<VisionReply, LlmError> {
        match self.chat(&self.vision_request(prompt, images)).await {
            Ok(text) => Ok(VisionReply {
                text,
                degraded: false,
            }),
            Err(e) => {
                warn!(
                    model = %self.vision_model,
                    error = %e,
                    "Vision model failed, falling back to text-only completion"
                );
                counter!("rag_vision_fallback_total").increment(1);
                let text = self.complete(prompt).await?;
                Ok(VisionReply {
                    text,
                    degraded: true,
                })
            }
        }
    }

    /// Embed texts, sending at most `EMBEDDING_BATCH_SIZE` per request.
    ///
    /// Results are returned in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.embedding_batch_size) {
            let url = format!("{}/embeddings", self.base_url);
            let request = EmbeddingRequest {
                model: &self.embedding_model,
                input: batch,
            };

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| LlmError::Connection {
                    url: url.clone(),
                    source: e,
                })?;
            let mut parsed: EmbeddingResponse = read_json(response).await?;

            if parsed.data.len() != batch.len() {
                return Err(LlmError::InvalidResponse {
                    message: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        parsed.data.len()
                    ),
                });
            }
            parsed.data.sort_by_key(|d| d.index);
            embeddings.extend(parsed.data.into_iter().map(|d| d.embedding));
        }

        debug!(count = embeddings.len(), "Embedded texts");
        Ok(embeddings)
    }

    /// Probe the server's readiness endpoint.
    pub async fn readiness(&self, timeout: std::time::Duration) -> Result<(), LlmError> {
        let url = format!("{}/readyz", self.root_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LlmError::Request {
                status: status.as_u16(),
                message: "readiness check failed".to_string(),
            })
        }
    }

    fn text_request(&self, prompt: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.llm_model,
            messages: vec![ChatMessage {
                role: "user",
                content: serde_json::Value::String(prompt.to_string()),
            }],
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
        }
    }

    fn vision_request(&self, prompt: &str, images: &[Vec<u8>]) -> ChatRequest<'_> {
        let mut parts = vec![serde_json::json!({ "type": "text", "text": prompt })];
        parts.extend(images.iter().map(|bytes| {
            serde_json::json!({
                "type": "image_url",
                "image_url": { "url": image_data_url(bytes) },
            })
        }));

        ChatRequest {
            model: &self.vision_model,
            messages: vec![ChatMessage {
                role: "user",
                content: serde_json::Value::Array(parts),
            }],
            temperature: None,
            max_tokens: self.vision_max_tokens,
        }
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                url: url.clone(),
                source: e,
            })?;
        let parsed: ChatResponse = read_json(response).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "completion contained no message content".to_string(),
            })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(LlmError::Request {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse {
            message: e.to_string(),
        })
}
