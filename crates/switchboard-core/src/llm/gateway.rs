//! Provider routing with retry and failover.
//!
//! A request goes to the selected provider (explicit or default) with up to
//! `retry_attempts` tries and linear backoff on transient errors. When that
//! provider is exhausted, the other configured provider gets one attempt.
//! Only total exhaustion surfaces as `AiError::AllProvidersFailed`.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};

use switchboard_types::config::AiConfig;
use switchboard_types::llm::{AiError, CompletionParams, Message, ProviderKind};

use super::box_provider::BoxAiProvider;

/// Lazily evaluated sequence of reply fragments.
pub type AiStream = Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>>;

const PING_MESSAGE: &str = "Hello";

/// Routing and retry knobs.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub default_provider: ProviderKind,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Bound on one completion attempt, and on the gap between two
    /// streamed fragments.
    pub timeout: Duration,
}

impl GatewayOptions {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            default_provider: config.default_provider,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&AiConfig::default())
    }
}

/// Uniform completion interface over the configured providers.
///
/// Providers without credentials are never registered, so they are simply
/// absent from routing.
pub struct AiGateway {
    providers: Vec<BoxAiProvider>,
    options: GatewayOptions,
}

impl AiGateway {
    pub fn new(providers: Vec<BoxAiProvider>, options: GatewayOptions) -> Self {
        if providers.is_empty() {
            tracing::warn!("No AI providers configured");
        }
        Self { providers, options }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Names of the registered providers, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.find(kind).is_some()
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    fn find(&self, kind: ProviderKind) -> Option<&BoxAiProvider> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    /// Pick the requested provider, else the default, else whatever exists.
    fn select(&self, requested: Option<ProviderKind>) -> Result<&BoxAiProvider, AiError> {
        let wanted = requested.unwrap_or(self.options.default_provider);
        if let Some(provider) = self.find(wanted) {
            return Ok(provider);
        }
        match self.providers.first() {
            Some(provider) => {
                tracing::debug!(
                    wanted = %wanted,
                    using = provider.name(),
                    "Requested AI provider not configured, routing elsewhere"
                );
                Ok(provider)
            }
            None => Err(AiError::ProviderUnavailable(
                "no AI provider is configured".to_string(),
            )),
        }
    }

    /// The failover target for `kind`, if another provider is configured.
    fn alternate(&self, kind: ProviderKind) -> Option<&BoxAiProvider> {
        self.providers.iter().find(|p| p.kind() != kind)
    }

    /// Send the conversation and return the full reply.
    pub async fn send_message(
        &self,
        messages: &[Message],
        provider: Option<ProviderKind>,
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let primary = self.select(provider)?;

        let error = match self.complete_with_retry(primary, messages, params).await {
            Ok(text) => return Ok(text),
            Err(error) => error,
        };

        let last_error = match self.alternate(primary.kind()) {
            Some(fallback) => {
                tracing::warn!(
                    failed = primary.name(),
                    fallback = fallback.name(),
                    error = %error,
                    "AI provider exhausted, failing over"
                );
                match self.attempt(fallback, messages, params).await {
                    Ok(text) => return Ok(text),
                    Err(fallback_error) => fallback_error,
                }
            }
            None => error,
        };

        tracing::error!(error = %last_error, "All AI providers failed");
        Err(AiError::AllProvidersFailed {
            last_error: last_error.to_string(),
        })
    }

    async fn complete_with_retry(
        &self,
        provider: &BoxAiProvider,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let attempts = self.options.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(provider, messages, params).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        provider = provider.name(),
                        attempt,
                        error = %error,
                        "AI request attempt failed, retrying"
                    );
                    tokio::time::sleep(self.options.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn attempt(
        &self,
        provider: &BoxAiProvider,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let started = std::time::Instant::now();
        let text = tokio::time::timeout(self.options.timeout, provider.complete(messages, params))
            .await
            .map_err(|_| AiError::Timeout {
                provider: provider.name().to_string(),
                secs: self.options.timeout.as_secs(),
            })??;

        if text.trim().is_empty() {
            return Err(AiError::ProviderResponseEmpty(provider.name().to_string()));
        }
        tracing::info!(
            provider = provider.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "AI response received"
        );
        Ok(text)
    }

    /// Stream the reply fragment by fragment.
    ///
    /// If the selected provider fails (before or during streaming), the
    /// alternate provider's stream is consumed from the beginning. Fragments
    /// already yielded are not retracted.
    pub fn stream_message(
        &self,
        messages: Vec<Message>,
        provider: Option<ProviderKind>,
        params: CompletionParams,
    ) -> AiStream {
        let primary = self.select(provider).cloned();
        let fallback = primary
            .as_ref()
            .ok()
            .and_then(|p| self.alternate(p.kind()))
            .cloned();
        let idle_timeout = self.options.timeout;

        Box::pin(async_stream::stream! {
            let primary = match primary {
                Ok(primary) => primary,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            let mut upstream = primary.stream(messages.clone(), params.clone());
            let error = loop {
                match next_fragment(&mut upstream, &primary, idle_timeout).await {
                    Some(Ok(fragment)) => yield Ok(fragment),
                    Some(Err(error)) => break Some(error),
                    None => break None,
                }
            };
            let Some(error) = error else { return };

            let Some(fallback) = fallback else {
                tracing::error!(provider = primary.name(), error = %error, "AI stream failed with no fallback");
                yield Err(AiError::AllProvidersFailed { last_error: error.to_string() });
                return;
            };

            tracing::warn!(
                failed = primary.name(),
                fallback = fallback.name(),
                error = %error,
                "AI stream failed, restarting on fallback provider"
            );
            let mut upstream = fallback.stream(messages, params);
            loop {
                match next_fragment(&mut upstream, &fallback, idle_timeout).await {
                    Some(Ok(fragment)) => yield Ok(fragment),
                    Some(Err(error)) => {
                        tracing::error!(provider = fallback.name(), error = %error, "Fallback AI stream failed");
                        yield Err(AiError::AllProvidersFailed { last_error: error.to_string() });
                        return;
                    }
                    None => return,
                }
            }
        })
    }

    /// Prepend the optional system prompt and history, then complete.
    pub async fn chat_completion(
        &self,
        user_message: &str,
        history: &[Message],
        system_prompt: Option<&str>,
        provider: Option<ProviderKind>,
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        let messages = assemble(user_message, history, system_prompt);
        self.send_message(&messages, provider, params).await
    }

    /// Streaming counterpart of [`Self::chat_completion`].
    pub fn stream_chat_completion(
        &self,
        user_message: &str,
        history: &[Message],
        system_prompt: Option<&str>,
        provider: Option<ProviderKind>,
        params: CompletionParams,
    ) -> AiStream {
        let messages = assemble(user_message, history, system_prompt);
        self.stream_message(messages, provider, params)
    }

    /// Ping every known provider with a tiny request.
    ///
    /// Providers without credentials report `false`.
    pub async fn check_availability(&self) -> HashMap<ProviderKind, bool> {
        let ping = [Message::user(PING_MESSAGE)];
        let params = CompletionParams::default();

        let mut availability = HashMap::new();
        for kind in ProviderKind::ALL {
            let available = match self.find(kind) {
                Some(provider) => match self.attempt(provider, &ping, &params).await {
                    Ok(_) => true,
                    Err(error) => {
                        tracing::warn!(provider = provider.name(), error = %error, "AI availability check failed");
                        false
                    }
                },
                None => false,
            };
            availability.insert(kind, available);
        }
        availability
    }
}

async fn next_fragment(
    upstream: &mut AiStream,
    provider: &BoxAiProvider,
    idle_timeout: Duration,
) -> Option<Result<String, AiError>> {
    match tokio::time::timeout(idle_timeout, upstream.next()).await {
        Ok(item) => item,
        Err(_) => Some(Err(AiError::Timeout {
            provider: provider.name().to_string(),
            secs: idle_timeout.as_secs(),
        })),
    }
}

fn assemble(user_message: &str, history: &[Message], system_prompt: Option<&str>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(prompt) = system_prompt {
        messages.push(Message::system(prompt));
    }
    messages.extend_from_slice(history);
    messages.push(Message::user(user_message));
    messages
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;
    use switchboard_types::llm::MessageRole;

    use super::*;
    use crate::llm::provider::AiProvider;

    #[derive(Clone)]
    enum Behavior {
        Reply(&'static str),
        Fail(AiError),
        Fragments(Vec<&'static str>),
        FragmentsThenFail(Vec<&'static str>),
    }

    struct MockProvider {
        kind: ProviderKind,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
        seen: Arc<std::sync::Mutex<Vec<Vec<Message>>>>,
    }

    impl MockProvider {
        fn new(kind: ProviderKind, behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    kind,
                    behavior,
                    calls: calls.clone(),
                    seen: Arc::new(std::sync::Mutex::new(Vec::new())),
                },
                calls,
            )
        }
    }

    fn server_error(provider: &str) -> AiError {
        AiError::ProviderHttp {
            provider: provider.to_string(),
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    impl AiProvider for MockProvider {
        fn name(&self) -> &str {
            match self.kind {
                ProviderKind::DashScope => "dashscope",
                ProviderKind::OpenAi => "openai",
            }
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn complete(
            &self,
            messages: &[Message],
            _params: &CompletionParams,
        ) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::Fail(error) => Err(error.clone()),
                Behavior::Fragments(parts) | Behavior::FragmentsThenFail(parts) => Ok(parts.concat()),
            }
        }

        fn stream(&self, _messages: Vec<Message>, _params: CompletionParams) -> AiStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items: Vec<Result<String, AiError>> = match &self.behavior {
                Behavior::Reply(text) => vec![Ok(text.to_string())],
                Behavior::Fail(error) => vec![Err(error.clone())],
                Behavior::Fragments(parts) => parts.iter().map(|p| Ok(p.to_string())).collect(),
                Behavior::FragmentsThenFail(parts) => parts
                    .iter()
                    .map(|p| Ok(p.to_string()))
                    .chain(std::iter::once(Err(AiError::Stream("connection reset".into()))))
                    .collect(),
            };
            Box::pin(stream::iter(items))
        }
    }

    fn options(attempts: u32) -> GatewayOptions {
        GatewayOptions {
            default_provider: ProviderKind::DashScope,
            retry_attempts: attempts,
            retry_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn prompt() -> Vec<Message> {
        vec![Message::user("hi")]
    }

    async fn collect(stream: AiStream) -> Vec<Result<String, AiError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn primary_success_needs_no_fallback() {
        let (primary, primary_calls) = MockProvider::new(ProviderKind::DashScope, Behavior::Reply("hello"));
        let (secondary, secondary_calls) = MockProvider::new(ProviderKind::OpenAi, Behavior::Reply("ok"));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary), BoxAiProvider::new(secondary)],
            options(3),
        );

        let reply = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_primary_is_retried_then_fails_over() {
        let (primary, primary_calls) =
            MockProvider::new(ProviderKind::DashScope, Behavior::Fail(server_error("dashscope")));
        let (secondary, secondary_calls) = MockProvider::new(ProviderKind::OpenAi, Behavior::Reply("ok"));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary), BoxAiProvider::new(secondary)],
            options(3),
        );

        let reply = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_transient_error_skips_retries_but_still_fails_over() {
        let unauthorized = AiError::ProviderHttp {
            provider: "dashscope".into(),
            status: 401,
            body: "bad key".into(),
        };
        let (primary, primary_calls) = MockProvider::new(ProviderKind::DashScope, Behavior::Fail(unauthorized));
        let (secondary, _) = MockProvider::new(ProviderKind::OpenAi, Behavior::Reply("ok"));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary), BoxAiProvider::new(secondary)],
            options(3),
        );

        let reply = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_failing_yields_all_providers_failed() {
        let (primary, _) = MockProvider::new(ProviderKind::DashScope, Behavior::Fail(server_error("dashscope")));
        let (secondary, secondary_calls) =
            MockProvider::new(ProviderKind::OpenAi, Behavior::Fail(server_error("openai")));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary), BoxAiProvider::new(secondary)],
            options(2),
        );

        let err = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::AllProvidersFailed { .. }));
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_treated_as_failure() {
        let (primary, primary_calls) = MockProvider::new(ProviderKind::OpenAi, Behavior::Reply("   "));
        let gateway = AiGateway::new(vec![BoxAiProvider::new(primary)], options(2));

        let err = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::AllProvidersFailed { .. }));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_providers_is_unavailable() {
        let gateway = AiGateway::new(Vec::new(), options(3));
        let err = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::ProviderUnavailable(_)));
        assert!(!gateway.has_providers());
    }

    #[tokio::test]
    async fn unconfigured_default_routes_to_configured_provider() {
        let (openai, calls) = MockProvider::new(ProviderKind::OpenAi, Behavior::Reply("from openai"));
        let gateway = AiGateway::new(vec![BoxAiProvider::new(openai)], options(1));

        let reply = gateway
            .send_message(&prompt(), Some(ProviderKind::DashScope), &CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "from openai");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_linearly() {
        let (primary, _) = MockProvider::new(ProviderKind::DashScope, Behavior::Fail(server_error("dashscope")));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary)],
            GatewayOptions {
                retry_delay: Duration::from_secs(1),
                ..options(3)
            },
        );

        let started = tokio::time::Instant::now();
        let _ = gateway
            .send_message(&prompt(), None, &CompletionParams::default())
            .await;
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn stream_yields_fragments_in_order() {
        let (primary, _) = MockProvider::new(ProviderKind::DashScope, Behavior::Fragments(vec!["Hel", "lo"]));
        let gateway = AiGateway::new(vec![BoxAiProvider::new(primary)], options(1));

        let items = collect(gateway.stream_message(prompt(), None, CompletionParams::default())).await;
        let fragments: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_failure_restarts_on_fallback_without_retracting() {
        let (primary, _) =
            MockProvider::new(ProviderKind::DashScope, Behavior::FragmentsThenFail(vec!["par"]));
        let (secondary, secondary_calls) =
            MockProvider::new(ProviderKind::OpenAi, Behavior::Fragments(vec!["full", " answer"]));
        let gateway = AiGateway::new(
            vec![BoxAiProvider::new(primary), BoxAiProvider::new(secondary)],
            options(1),
        );

        let items = collect(gateway.stream_message(prompt(), None, CompletionParams::default())).await;
        let fragments: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["par", "full", " answer"]);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_without_fallback_ends_in_all_failed() {
        let (primary, _) =
            MockProvider::new(ProviderKind::DashScope, Behavior::FragmentsThenFail(vec!["par"]));
        let gateway = AiGateway::new(vec![BoxAiProvider::new(primary)], options(1));

        let items = collect(gateway.stream_message(prompt(), None, CompletionParams::default())).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "par");
        assert!(matches!(items[1], Err(AiError::AllProvidersFailed { .. })));
    }

    #[tokio::test]
    async fn stream_with_no_providers_yields_unavailable() {
        let gateway = AiGateway::new(Vec::new(), options(1));
        let items = collect(gateway.stream_message(prompt(), None, CompletionParams::default())).await;
        assert!(matches!(items.as_slice(), [Err(AiError::ProviderUnavailable(_))]));
    }

    #[tokio::test]
    async fn chat_completion_orders_system_history_user() {
        let (primary, _) = MockProvider::new(ProviderKind::DashScope, Behavior::Reply("ok"));
        let seen = primary.seen.clone();
        let gateway = AiGateway::new(vec![BoxAiProvider::new(primary)], options(1));

        gateway
            .chat_completion(
                "question",
                &[Message::assistant("earlier")],
                Some("be nice"),
                None,
                &CompletionParams::default(),
            )
            .await
            .unwrap();

        let sent = seen.lock().unwrap()[0].clone();
        let roles: Vec<MessageRole> = sent.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::Assistant, MessageRole::User]
        );
        assert_eq!(sent[2].content, "question");
    }

    #[tokio::test]
    async fn availability_reports_every_known_provider() {
        let (primary, _) = MockProvider::new(ProviderKind::DashScope, Behavior::Reply("hi"));
        let gateway = AiGateway::new(vec![BoxAiProvider::new(primary)], options(1));

        let availability = gateway.check_availability().await;
        assert_eq!(availability.get(&ProviderKind::DashScope), Some(&true));
        assert_eq!(availability.get(&ProviderKind::OpenAi), Some(&false));
    }
}
