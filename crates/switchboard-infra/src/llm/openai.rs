//! OpenAI chat-completions provider built on `async-openai`.

use std::pin::Pin;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use switchboard_core::llm::AiProvider;
use switchboard_types::config::ProviderSettings;
use switchboard_types::llm::{AiError, CompletionParams, Message, MessageRole, ProviderKind};

const PROVIDER_NAME: &str = "openai";

/// Provider for the OpenAI chat-completions API, or any endpoint that
/// speaks it (set `base_url`).
///
/// Does NOT derive Debug: the async-openai client holds the API key.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString, settings: &ProviderSettings) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(settings.base_url.trim_end_matches('/'));

        Self {
            client: Client::with_config(config),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        messages: &[Message],
        params: &CompletionParams,
        stream: bool,
    ) -> CreateChatCompletionRequest {
        let messages = messages.iter().map(to_request_message).collect();

        let mut req = CreateChatCompletionRequest {
            model: params.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_completion_tokens: Some(params.max_tokens.unwrap_or(self.max_tokens)),
            temperature: Some(params.temperature.unwrap_or(self.temperature)),
            ..Default::default()
        };
        if stream {
            req.stream = Some(true);
        }
        req
    }
}

fn to_request_message(msg: &Message) -> ChatCompletionRequestMessage {
    match msg.role {
        MessageRole::System => {
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                name: None,
            })
        }
        MessageRole::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
            name: None,
        }),
        MessageRole::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    msg.content.clone(),
                )),
                refusal: None,
                name: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
    }
}

impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let request = self.build_request(messages, params, false);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn stream(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>> {
        let request = self.build_request(&messages, &params, true);
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            let mut inner = client
                .chat()
                .create_stream(request)
                .await
                .map_err(map_openai_error)?;

            while let Some(chunk) = inner.next().await {
                let chunk = chunk.map_err(map_openai_error)?;
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                }
            }
        })
    }
}

/// Fold an `OpenAIError` into the gateway's taxonomy.
///
/// API errors carry no status code, so well-known error codes are mapped
/// to the status the API would have sent. That keeps rate limits and
/// server faults retryable and auth failures terminal.
fn map_openai_error(err: OpenAIError) -> AiError {
    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            let status = if code == "invalid_api_key"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
            {
                401
            } else if code == "rate_limit_exceeded"
                || error_type == "rate_limit_error"
                || error_type == "insufficient_quota"
            {
                429
            } else if code == "server_error" || error_type == "server_error" {
                500
            } else {
                400
            };

            AiError::ProviderHttp {
                provider: PROVIDER_NAME.to_string(),
                status,
                body: api_err.message.clone(),
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) => AiError::ProviderHttp {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => AiError::Transport {
                provider: PROVIDER_NAME.to_string(),
                message: err.to_string(),
            },
        },
        OpenAIError::JSONDeserialize(_, content) => {
            AiError::Deserialization(format!("{PROVIDER_NAME}: failed to parse response: {content}"))
        }
        OpenAIError::StreamError(stream_err) => AiError::Stream(stream_err.to_string()),
        _ => AiError::Transport {
            provider: PROVIDER_NAME.to_string(),
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn provider() -> OpenAiProvider {
        let settings = ProviderSettings {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
        };
        OpenAiProvider::new(SecretString::from("sk-test".to_string()), &settings)
    }

    fn api_error(code: Option<&str>, kind: Option<&str>, message: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn identity() {
        let p = provider();
        assert_eq!(p.name(), "openai");
        assert_eq!(p.kind(), ProviderKind::OpenAi);
        assert_eq!(p.model(), "gpt-3.5-turbo");
    }

    #[test]
    fn request_maps_roles_and_defaults() {
        let p = provider();
        let req = p.build_request(
            &[
                Message::system("sys"),
                Message::user("q"),
                Message::assistant("a"),
            ],
            &CompletionParams::default(),
            false,
        );

        assert_eq!(req.model, "gpt-3.5-turbo");
        assert_eq!(req.max_completion_tokens, Some(2000));
        assert_eq!(req.temperature, Some(0.7));
        assert!(req.stream.is_none());
        assert_eq!(req.messages.len(), 3);
        assert!(matches!(req.messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(req.messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(req.messages[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn streaming_request_sets_flag_and_overrides() {
        let p = provider();
        let params = CompletionParams {
            model: Some("gpt-4o".to_string()),
            max_tokens: Some(10),
            temperature: Some(0.1),
        };
        let req = p.build_request(&[Message::user("q")], &params, true);

        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.max_completion_tokens, Some(10));
        assert_eq!(req.temperature, Some(0.1));
        assert_eq!(req.stream, Some(true));
    }

    #[test]
    fn auth_errors_are_terminal() {
        let err = map_openai_error(api_error(
            Some("invalid_api_key"),
            Some("invalid_request_error"),
            "Incorrect API key provided",
        ));
        assert!(matches!(err, AiError::ProviderHttp { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let limited = map_openai_error(api_error(Some("rate_limit_exceeded"), None, "slow down"));
        assert!(matches!(limited, AiError::ProviderHttp { status: 429, .. }));
        assert!(limited.is_transient());

        let server = map_openai_error(api_error(None, Some("server_error"), "oops"));
        assert!(server.is_transient());
    }

    #[test]
    fn unknown_api_error_keeps_message() {
        match map_openai_error(api_error(None, None, "bad param")) {
            AiError::ProviderHttp { status, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad param");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn invalid_argument_becomes_transport_error() {
        let err = map_openai_error(OpenAIError::InvalidArgument("nope".to_string()));
        assert!(matches!(err, AiError::Transport { .. }));
    }
}
