//! Application state wiring all services together.
//!
//! Services are generic over the store traits; AppState pins them to the
//! backend selected from `store.url`. Everything is constructed once here
//! and handed to handlers through axum state.

use std::sync::Arc;

use switchboard_core::llm::AiGateway;
use switchboard_core::orchestrator::{OrchestratorSettings, StreamingOrchestrator};
use switchboard_core::ratelimit::{RoutePolicy, SlidingWindowRateLimiter};
use switchboard_core::realtime::ConnectionRegistry;
use switchboard_core::session::SessionStore;
use switchboard_infra::auth::HashedTokenVerifier;
use switchboard_infra::llm::build_gateway;
use switchboard_infra::store::{AnyMessageStore, AnyStore, open_stores};
use switchboard_types::config::AppConfig;

pub type ConcreteSessionStore = SessionStore<AnyStore>;
pub type ConcreteOrchestrator = StreamingOrchestrator<AnyStore, AnyMessageStore>;
pub type ConcreteRateLimiter = SlidingWindowRateLimiter<AnyStore>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<AnyStore>,
    pub sessions: Arc<ConcreteSessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub gateway: Arc<AiGateway>,
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub rate_limiter: Arc<ConcreteRateLimiter>,
    pub verifier: Arc<HashedTokenVerifier>,
}

impl AppState {
    /// Open the stores, register AI providers and wire the services.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let (store, messages) = open_stores(&config.store.url).await?;
        let gateway = build_gateway(&config.ai)?;
        Ok(Self::from_parts(config, store, messages, gateway))
    }

    /// Wire already-built collaborators. Tests use this with in-memory
    /// stores and scripted providers.
    pub fn from_parts(
        config: AppConfig,
        store: AnyStore,
        messages: AnyMessageStore,
        gateway: AiGateway,
    ) -> Self {
        let store = Arc::new(store);
        let messages = Arc::new(messages);
        let gateway = Arc::new(gateway);

        let sessions = Arc::new(SessionStore::new(store.clone(), config.session.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let orchestrator = Arc::new(StreamingOrchestrator::new(
            sessions.clone(),
            registry.clone(),
            gateway.clone(),
            messages,
            OrchestratorSettings::from_config(&config.ai),
        ));
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
            store.clone(),
            RoutePolicy::from_config(&config.rate_limit),
        ));
        let verifier = Arc::new(HashedTokenVerifier::from_config(&config.auth));

        Self {
            config: Arc::new(config),
            store,
            sessions,
            registry,
            gateway,
            orchestrator,
            rate_limiter,
            verifier,
        }
    }
}
