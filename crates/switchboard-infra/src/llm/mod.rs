//! AI provider implementations.
//!
//! Concrete [`AiProvider`](switchboard_core::llm::AiProvider) backends for
//! DashScope and OpenAI, plus the factory that turns [`AiConfig`] into a
//! ready [`AiGateway`].

pub mod dashscope;
pub mod openai;

use secrecy::SecretString;

use switchboard_core::llm::{AiGateway, BoxAiProvider, GatewayOptions};
use switchboard_types::config::{AiConfig, ProviderSettings};
use switchboard_types::llm::{AiError, ProviderKind};

use self::dashscope::DashScopeProvider;
use self::openai::OpenAiProvider;

/// Build one provider from its settings.
///
/// Returns `Ok(None)` when no API key is configured: such a provider is
/// left out of routing rather than failing at request time.
pub fn create_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<Option<BoxAiProvider>, AiError> {
    let Some(key) = settings
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
    else {
        return Ok(None);
    };
    let secret = SecretString::from(key.to_string());

    let provider = match kind {
        ProviderKind::DashScope => BoxAiProvider::new(DashScopeProvider::new(secret, settings)?),
        ProviderKind::OpenAi => BoxAiProvider::new(OpenAiProvider::new(secret, settings)),
    };
    Ok(Some(provider))
}

/// Register every provider that has credentials and wrap them in a gateway.
pub fn build_gateway(config: &AiConfig) -> Result<AiGateway, AiError> {
    let mut providers = Vec::new();
    for kind in ProviderKind::ALL {
        match create_provider(kind, config.provider(kind))? {
            Some(provider) => {
                tracing::info!(provider = %kind, model = %config.provider(kind).model, "AI provider registered");
                providers.push(provider);
            }
            None => tracing::debug!(provider = %kind, "No API key, provider skipped"),
        }
    }
    Ok(AiGateway::new(providers, GatewayOptions::from_config(config)))
}
