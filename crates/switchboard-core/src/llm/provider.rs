//! AiProvider trait definition.

use std::pin::Pin;

use futures_util::Stream;

use switchboard_types::llm::{AiError, CompletionParams, Message, ProviderKind};

/// Trait for AI completion backends.
///
/// `complete` uses native async fn in traits. `stream` returns a boxed
/// stream so the trait stays usable behind [`super::BoxAiProvider`].
///
/// Implementations live in switchboard-infra.
pub trait AiProvider: Send + Sync {
    /// Provider name used in logs and message metadata.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Send the conversation and receive the full reply text.
    fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> impl std::future::Future<Output = Result<String, AiError>> + Send;

    /// Stream the reply as incremental text fragments.
    ///
    /// The stream is finite and cannot be restarted.
    fn stream(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>>;
}
