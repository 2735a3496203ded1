//! Sliding-window rate limiting for every HTTP route.
//!
//! Clients are keyed by verified user id when a valid bearer token is
//! present, otherwise by forwarded or peer IP. Admitted responses carry the
//! same `X-RateLimit-*` headers as rejections.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use switchboard_core::ratelimit::client_identity;
use switchboard_core::realtime::TokenVerifier;
use switchboard_types::rate_limit::RateLimitInfo;

use crate::http::error::AppError;
use crate::state::AppState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const WINDOW_HEADER: &str = "x-ratelimit-window";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(info.limit));
    headers.insert(WINDOW_HEADER, HeaderValue::from(info.window));
    headers.insert(REMAINING_HEADER, HeaderValue::from(info.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(info.reset_at));
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Owned copy of everything client resolution reads off a request.
#[derive(Debug, Default, PartialEq)]
struct ClientHints {
    bearer: Option<String>,
    forwarded_for: Option<String>,
    real_ip: Option<String>,
    peer: Option<IpAddr>,
}

impl ClientHints {
    fn from_request(request: &Request) -> Self {
        let headers = request.headers();
        Self {
            bearer: header_str(headers, "authorization")
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            forwarded_for: header_str(headers, "x-forwarded-for").map(str::to_string),
            real_ip: header_str(headers, "x-real-ip").map(str::to_string),
            peer: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        }
    }
}

async fn resolve_client(state: &AppState, hints: ClientHints) -> String {
    let user_id = match hints.bearer.as_deref() {
        Some(token) => state.verifier.verify(token).await.ok(),
        None => None,
    };

    client_identity(
        user_id.as_deref(),
        hints.forwarded_for.as_deref(),
        hints.real_ip.as_deref(),
        hints.peer,
    )
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let client = resolve_client(&state, ClientHints::from_request(&request)).await;
    let (allowed, info) = state.rate_limiter.check(&client, &path).await;

    if !allowed {
        tracing::info!(client = %client, path = %path, limit = info.limit, "Request rate limited");
        return Err(AppError::RateLimited(info));
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &info);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;

    use switchboard_core::llm::{AiGateway, GatewayOptions};
    use switchboard_core::orchestrator::InMemoryMessageStore;
    use switchboard_core::store::MemoryStore;
    use switchboard_infra::store::{AnyMessageStore, AnyStore};
    use switchboard_types::config::AppConfig;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/health");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn hints_copy_bearer_and_proxy_headers() {
        let mut req = request(&[
            ("authorization", "Bearer  alice-token "),
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let hints = ClientHints::from_request(&req);
        assert_eq!(hints.bearer.as_deref(), Some("alice-token"));
        assert_eq!(hints.forwarded_for.as_deref(), Some("203.0.113.7, 10.0.0.1"));
        assert_eq!(hints.real_ip.as_deref(), Some("198.51.100.2"));
        assert_eq!(hints.peer, Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let hints = ClientHints::from_request(&request(&[("authorization", "Basic abc")]));
        assert_eq!(hints, ClientHints::default());

        let hints = ClientHints::from_request(&request(&[("authorization", "Bearer   ")]));
        assert!(hints.bearer.is_none());
    }

    #[test]
    fn client_resolution_future_is_send() {
        let state = AppState::from_parts(
            AppConfig::default(),
            AnyStore::Memory(MemoryStore::new()),
            AnyMessageStore::Memory(InMemoryMessageStore::new()),
            AiGateway::new(Vec::new(), GatewayOptions::default()),
        );
        let req = request(&[("authorization", "Bearer alice-token")]);
        let future = resolve_client(&state, ClientHints::from_request(&req));
        assert_send(&future);
    }
}
