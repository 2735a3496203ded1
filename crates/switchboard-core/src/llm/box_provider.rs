//! BoxAiProvider -- object-safe dynamic dispatch wrapper for AiProvider.
//!
//! 1. `AiProviderDyn` mirrors [`AiProvider`] with boxed futures
//! 2. Blanket impl of `AiProviderDyn` for every `T: AiProvider`
//! 3. `BoxAiProvider` holds an `Arc<dyn AiProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;

use switchboard_types::llm::{AiError, CompletionParams, Message, ProviderKind};

use super::provider::AiProvider;

/// Object-safe version of [`AiProvider`].
pub trait AiProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn complete_boxed<'a>(
        &'a self,
        messages: &'a [Message],
        params: &'a CompletionParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>>;

    fn stream_boxed(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>>;
}

impl<T: AiProvider> AiProviderDyn for T {
    fn name(&self) -> &str {
        AiProvider::name(self)
    }

    fn kind(&self) -> ProviderKind {
        AiProvider::kind(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        messages: &'a [Message],
        params: &'a CompletionParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>> {
        Box::pin(self.complete(messages, params))
    }

    fn stream_boxed(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>> {
        self.stream(messages, params)
    }
}

/// Type-erased AI provider.
///
/// Cheap to clone so a streaming generation can own its provider handle
/// independently of the gateway.
#[derive(Clone)]
pub struct BoxAiProvider {
    inner: Arc<dyn AiProviderDyn>,
}

impl BoxAiProvider {
    pub fn new<T: AiProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    pub async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<String, AiError> {
        self.inner.complete_boxed(messages, params).await
    }

    pub fn stream(
        &self,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send + 'static>> {
        self.inner.stream_boxed(messages, params)
    }
}

impl std::fmt::Debug for BoxAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAiProvider")
            .field("name", &self.name())
            .finish()
    }
}
