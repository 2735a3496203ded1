//! `switchboard providers`: ping each AI provider once and report.

use anyhow::Result;
use serde_json::json;

use switchboard_core::llm::AiGateway;
use switchboard_types::config::AiConfig;
use switchboard_types::llm::ProviderKind;

/// One row of the availability report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReport {
    pub kind: ProviderKind,
    pub configured: bool,
    pub available: bool,
    pub model: String,
    pub is_default: bool,
}

pub async fn collect(gateway: &AiGateway, config: &AiConfig) -> Vec<ProviderReport> {
    let availability = gateway.check_availability().await;

    ProviderKind::ALL
        .into_iter()
        .map(|kind| ProviderReport {
            kind,
            configured: gateway.has_provider(kind),
            available: availability.get(&kind).copied().unwrap_or(false),
            model: config.provider(kind).model.clone(),
            is_default: config.default_provider == kind,
        })
        .collect()
}

pub async fn provider_status(gateway: &AiGateway, config: &AiConfig, json: bool) -> Result<()> {
    let reports = collect(gateway, config).await;

    if json {
        let rows: Vec<_> = reports
            .iter()
            .map(|r| {
                json!({
                    "provider": r.kind,
                    "configured": r.configured,
                    "available": r.available,
                    "model": r.model,
                    "default": r.is_default,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!();
    for r in &reports {
        let status = match (r.configured, r.available) {
            (false, _) => "not configured",
            (true, true) => "available",
            (true, false) => "unreachable",
        };
        let marker = if r.is_default { " (default)" } else { "" };
        println!("  {:<10} {:<16} {}{marker}", r.kind.to_string(), status, r.model);
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::llm::GatewayOptions;

    #[tokio::test]
    async fn unconfigured_providers_are_reported_unavailable() {
        let gateway = AiGateway::new(Vec::new(), GatewayOptions::default());
        let config = AiConfig::default();

        let reports = collect(&gateway, &config).await;

        assert_eq!(reports.len(), ProviderKind::ALL.len());
        assert!(reports.iter().all(|r| !r.configured && !r.available));
        let default: Vec<_> = reports.iter().filter(|r| r.is_default).collect();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].kind, config.default_provider);
    }
}
