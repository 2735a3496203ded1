//! Route-to-rule resolution and client identification.

use std::collections::HashMap;
use std::net::IpAddr;

use switchboard_types::config::RateLimitConfig;
use switchboard_types::rate_limit::RateLimitRule;

/// Maps request paths to rate-limit rules.
///
/// Exact matches win, then the longest matching prefix, then the default.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    default: RateLimitRule,
    exact: HashMap<String, RateLimitRule>,
    /// Sorted longest first.
    prefixes: Vec<(String, RateLimitRule)>,
}

impl RoutePolicy {
    pub fn new(default: RateLimitRule) -> Self {
        Self {
            default,
            exact: HashMap::new(),
            prefixes: Vec::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        config
            .routes
            .iter()
            .fold(Self::new(config.default), |policy, route| {
                policy.with_route(&route.path, route.rule())
            })
    }

    /// Register an override. The path matches exactly and as a prefix.
    pub fn with_route(mut self, path: &str, rule: RateLimitRule) -> Self {
        self.exact.insert(path.to_string(), rule);
        self.prefixes.push((path.to_string(), rule));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn resolve(&self, path: &str) -> RateLimitRule {
        if let Some(rule) = self.exact.get(path) {
            return *rule;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, rule)| *rule)
            .unwrap_or(self.default)
    }
}

/// Identify the client behind a request.
///
/// Authenticated users are keyed by id; everyone else by the first
/// `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_identity(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> String {
    if let Some(user_id) = user_id.filter(|u| !u.is_empty()) {
        return format!("user:{user_id}");
    }

    let forwarded = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = real_ip.map(str::trim).filter(|v| !v.is_empty());

    match (forwarded, real_ip, peer) {
        (Some(ip), _, _) | (None, Some(ip), _) => format!("ip:{ip}"),
        (None, None, Some(peer)) => format!("ip:{peer}"),
        (None, None, None) => "ip:unknown".to_string(),
    }
}
