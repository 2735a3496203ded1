//! GET /health - liveness plus a few live counters (no auth required).

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use switchboard_core::store::SharedStore;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.store.ping().await.is_ok();
    let active_sessions = match state.sessions.active_count().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not count sessions");
            None
        }
    };

    Json(json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": {
            "backend": state.store.backend(),
            "reachable": store_ok,
        },
        "connections": {
            "total": state.registry.connection_count(),
            "authenticated": state.registry.authenticated_count(),
        },
        "active_sessions": active_sessions,
        "ai_providers": state.gateway.provider_names(),
        "generations_in_flight": state.orchestrator.in_flight(),
    }))
}
