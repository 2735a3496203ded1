//! DashScope (Qwen) text-generation provider.
//!
//! Talks to `/api/v1/services/aigc/text-generation/generation` with
//! `result_format = "message"`. Streaming requests add the
//! `X-DashScope-SSE: enable` header and `incremental_output`, so every SSE
//! event carries only the new fragment.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use switchboard_core::llm::AiProvider;
use switchboard_types::config::ProviderSettings;
use switchboard_types::llm::{AiError, CompletionParams, Message, ProviderKind};

const PROVIDER_NAME: &str = "dashscope";
const GENERATION_PATH: &str = "/api/v1/services/aigc/text-generation/generation";

#[derive(Debug, Clone, Serialize)]
struct GenerationRequest {
    model: String,
    input: GenerationInput,
    parameters: GenerationParameters,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationInput {
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationParameters {
    max_tokens: u32,
    temperature: f32,
    result_format: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    incremental_output: bool,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    output: Option<GenerationOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    choices: Vec<GenerationChoice>,
}

#[derive(Debug, Deserialize)]
struct GenerationChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl GenerationResponse {
    /// Error bodies carry a non-empty `code`.
    fn into_content(self) -> Result<String, AiError> {
        if let Some(code) = self.code.filter(|c| !c.is_empty()) {
            return Err(AiError::Stream(format!(
                "{PROVIDER_NAME} error {code}: {}",
                self.message.unwrap_or_default()
            )));
        }
        Ok(self
            .output
            .and_then(|o| o.choices.into_iter().next())
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Outcome of one SSE `data:` payload.
#[derive(Debug, PartialEq)]
enum ChunkEvent {
    Text(String),
    Done,
    Skip,
    Failed(AiError),
}

fn parse_chunk(data: &str) -> ChunkEvent {
    let data = data.trim();
    if data.is_empty() {
        return ChunkEvent::Skip;
    }
    if data == "[DONE]" {
        return ChunkEvent::Done;
    }
    match serde_json::from_str::<GenerationResponse>(data) {
        Ok(chunk) => match chunk.into_content() {
            Ok(text) if text.is_empty() => ChunkEvent::Skip,
            Ok(text) => ChunkEvent::Text(text),
            Err(e) => ChunkEvent::Failed(e),
        },
        Err(e) => {
            tracing::warn!(provider = PROVIDER_NAME, error = %e, "Skipping malformed stream chunk");
            ChunkEvent::Skip
        }
    }
}

fn transport_error(err: impl std::fmt::Display) -> AiError {
    AiError::Transport {
        provider: PROVIDER_NAME.to_string(),
        message: err.to_string(),
    }
}

/// DashScope provider. The API key only leaves its `SecretString` when the
/// Authorization header is built.
pub struct DashScopeProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl DashScopeProvider {
    pub fn new(api_key: SecretString, settings: &ProviderSettings) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, GENERATION_PATH)
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        params: &CompletionParams,
        stream: bool,
    ) -> GenerationRequest {
        GenerationRequest {
            model: params.model.clone().unwrap_or_else(|| self.model.clone()),
            input: GenerationInput { messages },
            parameters: GenerationParameters {
                max_tokens: params.max_tokens.unwrap_or(self.max_tokens),
                temperature: params.temperature.unwrap_or(self.temperature),
                result_format: "message",
                incremental_output: stream,
            },
        }
    }
}

// No Debug: the client and key stay out of logs.

impl AiProvider for DashScopeProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::DashScope
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let body = self.build_request(messages.to_vec(), params, false);

        let response = self
            .client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::ProviderHttp {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| AiError::Deserialization(format!("{PROVIDER_NAME}: {e}")))?;

        parsed.into_content()
    }

    fn stream(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>> {
        let body = self.build_request(messages, &params, true);
        let request = self
            .client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .header("X-DashScope-SSE", "enable")
            .json(&body);

        Box::pin(async_stream::try_stream! {
            let mut es = EventSource::new(request)
                .map_err(|e| AiError::Stream(e.to_string()))?;

            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => match parse_chunk(&msg.data) {
                        ChunkEvent::Text(text) => yield text,
                        ChunkEvent::Skip => {}
                        ChunkEvent::Done => break,
                        ChunkEvent::Failed(e) => {
                            es.close();
                            Err(e)?;
                        }
                    },
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        es.close();
                        let body = response.text().await.unwrap_or_default();
                        Err(AiError::ProviderHttp {
                            provider: PROVIDER_NAME.to_string(),
                            status: status.as_u16(),
                            body,
                        })?;
                    }
                    Err(reqwest_eventsource::Error::Transport(e)) => {
                        es.close();
                        Err(transport_error(e))?;
                    }
                    Err(e) => {
                        es.close();
                        Err(AiError::Stream(e.to_string()))?;
                    }
                }
            }
            es.close();
        })
    }
}
