//! MCP Client Layer: registry-based discovery of remote model services,
//! with graceful degradation to `None` on any failure.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);
const REASONING_TIMEOUT: Duration = Duration::from_secs(20);
const SPECIALIST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const CONSCIOUSNESS_SERVICE_NAMES: &[&str] =
    &["mcp-consciousness-layer", "consciousness-layer", "consciousness"];
pub const MARKET_ANALYZER_SERVICE_NAMES: &[&str] =
    &["mcp-market-analyzer", "market-analyzer-service", "market-analyzer"];
pub const REASONING_SERVICE_NAMES: &[&str] =
    &["mcp-reasoning-orchestrator", "reasoning-service", "reasoning-engine"];
pub const STRATEGY_SPECIALIST_SERVICE_NAMES: &[&str] =
    &["mcp-specialist-service", "mcp-strategy-specialist", "strategy-specialist"];
pub const PORTFOLIO_OPTIMIZER_SERVICE_NAMES: &[&str] =
    &["mcp-portfolio-optimizer", "portfolio-optimizer-service", "portfolio-optimizer"];

/// Pure, unit-testable parse of a registry body against an ordered list of
/// candidate names. Candidates are tried in input order; within a
/// candidate, registry keys are matched case-insensitively.
pub fn select_url(body: &Value, candidates: &[&str]) -> Option<String> {
    let services = services_map(body)?;

    for candidate in candidates {
        for (name, info) in services {
            if !name.eq_ignore_ascii_case(candidate) {
                continue;
            }
            let Some(info) = info.as_object() else {
                warn!(registry_key = %name, "service entry is not an object");
                continue;
            };
            match info.get("url").and_then(Value::as_str) {
                Some(url) if !url.is_empty() => return Some(url.to_string()),
                Some(_) => warn!(registry_key = %name, "service url is empty"),
                None => warn!(registry_key = %name, "service url is null or missing"),
            }
        }
    }
    None
}

/// Extract the `services` map, falling back to treating the response root
/// itself as a flat service map when `services` is absent and the root
/// doesn't look like an error/message payload.
fn services_map(body: &Value) -> Option<&serde_json::Map<String, Value>> {
    if let Some(services) = body.get("services").and_then(Value::as_object) {
        return Some(services);
    }
    let root = body.as_object()?;
    if root.contains_key("services") || root.contains_key("error") || root.contains_key("message") {
        return None;
    }
    debug!("no 'services' key; treating registry root as a flat service map");
    Some(root)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest<'a> {
    pub prompt: &'a str,
    pub task_type: &'a str,
    pub complexity: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyRequest<'a> {
    pub token: &'a str,
    pub analysis: &'a Value,
    pub risk_profile: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioRequest<'a> {
    pub current_token: &'a str,
    pub risk_profile: &'a str,
    pub market_conditions: &'a Value,
}

/// Talks to the MCP registry and, transitively, the services it advertises.
/// Every public method returns `None` on any failure — network, timeout,
/// decode, or shape; callers fall back to local logic rather than
/// propagate.
pub struct McpClient {
    registry_url: String,
}

impl McpClient {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
        }
    }

    fn client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder with a pure-config client never fails")
    }

    async fn fetch_registry(&self, timeout: Duration) -> Option<Value> {
        let url = format!("{}/registry", self.registry_url.trim_end_matches('/'));
        let client = Self::client(timeout);
        let resp = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, %url, "registry request failed");
                return None;
            }
        };
        if let Err(e) = resp.error_for_status_ref() {
            warn!(error = %e, %url, "registry responded with an error status");
            return None;
        }
        match resp.json::<Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "registry body did not decode as JSON");
                None
            }
        }
    }

    /// GET the registry, then scan `candidates` in order.
    pub async fn lookup(&self, candidates: &[&str], context_tag: &str) -> Option<String> {
        info!(context = context_tag, ?candidates, "looking up MCP service");
        let body = self.fetch_registry(REGISTRY_TIMEOUT).await?;
        match select_url(&body, candidates) {
            Some(url) => {
                info!(context = context_tag, %url, "resolved MCP service url");
                Some(url)
            }
            None => {
                warn!(context = context_tag, "no candidate resolved to a usable url");
                None
            }
        }
    }

    pub async fn consciousness_state(&self) -> Option<Value> {
        let url = self.lookup(CONSCIOUSNESS_SERVICE_NAMES, "consciousness_state").await?;
        self.get_json(&format!("{}/state", url.trim_end_matches('/')), DEFAULT_TIMEOUT)
            .await
    }

    pub async fn market_emotions(&self) -> Option<Value> {
        let url = self.lookup(CONSCIOUSNESS_SERVICE_NAMES, "market_emotions").await?;
        self.get_json(&format!("{}/emotions", url.trim_end_matches('/')), DEFAULT_TIMEOUT)
            .await
    }

    pub async fn market_analysis(&self, token: &str) -> Option<Value> {
        let url = self.lookup(MARKET_ANALYZER_SERVICE_NAMES, "market_analysis").await?;
        self.get_json(
            &format!("{}/analysis/{}", url.trim_end_matches('/'), token),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    pub async fn reasoning(&self, prompt: &str, task_type: &str, complexity: u8) -> Option<Value> {
        let url = self.lookup(REASONING_SERVICE_NAMES, "reasoning").await?;
        let payload = ReasoningRequest {
            prompt,
            task_type,
            complexity,
        };
        self.post_json(
            &format!("{}/reason", url.trim_end_matches('/')),
            REASONING_TIMEOUT,
            &payload,
        )
        .await
    }

    pub async fn specialist_strategy(&self, token: &str, analysis: &Value, risk_profile: &str) -> Option<Value> {
        let url = self
            .lookup(STRATEGY_SPECIALIST_SERVICE_NAMES, "specialist_strategy")
            .await?;
        let payload = StrategyRequest {
            token,
            analysis,
            risk_profile,
        };
        self.post_json(
            &format!("{}/generate-strategy", url.trim_end_matches('/')),
            SPECIALIST_TIMEOUT,
            &payload,
        )
        .await
    }

    pub async fn portfolio_optimization(
        &self,
        current_token: &str,
        risk_profile: &str,
        market_conditions: &Value,
    ) -> Option<Value> {
        let url = self
            .lookup(PORTFOLIO_OPTIMIZER_SERVICE_NAMES, "portfolio_optimization")
            .await?;
        let payload = PortfolioRequest {
            current_token,
            risk_profile,
            market_conditions,
        };
        self.post_json(
            &format!("{}/optimize-portfolio", url.trim_end_matches('/')),
            SPECIALIST_TIMEOUT,
            &payload,
        )
        .await
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Option<Value> {
        let client = Self::client(timeout);
        match client.get(url).send().await {
            Ok(resp) => self.decode(resp, url).await,
            Err(e) => {
                warn!(error = %e, %url, "request failed");
                None
            }
        }
    }

    async fn post_json(&self, url: &str, timeout: Duration, payload: &impl Serialize) -> Option<Value> {
        let client = Self::client(timeout);
        match client.post(url).json(payload).send().await {
            Ok(resp) => self.decode(resp, url).await,
            Err(e) => {
                warn!(error = %e, %url, "request failed");
                None
            }
        }
    }

    async fn decode(&self, resp: reqwest::Response, url: &str) -> Option<Value> {
        if let Err(e) = resp.error_for_status_ref() {
            warn!(error = %e, %url, "non-success response status");
            return None;
        }
        match resp.json::<Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, %url, "response body did not decode as JSON");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_first_matching_candidate_case_insensitively() {
        let body = json!({
            "services": {
                "Consciousness-Layer": {"url": "http://a:9000"},
                "other": {"url": "http://b:9001"},
            }
        });
        let url = select_url(&body, CONSCIOUSNESS_SERVICE_NAMES);
        assert_eq!(url.as_deref(), Some("http://a:9000"));
    }

    #[test]
    fn rejects_null_or_empty_urls_and_tries_next_entry() {
        let body = json!({
            "services": {
                "consciousness": {"url": null},
                "consciousness-layer": {"url": ""},
            }
        });
        assert_eq!(select_url(&body, CONSCIOUSNESS_SERVICE_NAMES), None);
    }

    #[test]
    fn returns_none_on_shape_error() {
        let body = json!({ "services": ["a", "b"] });
        assert_eq!(select_url(&body, CONSCIOUSNESS_SERVICE_NAMES), None);
    }

    #[test]
    fn falls_back_to_flat_root_map() {
        let body = json!({
            "consciousness": {"url": "http://c:9002"},
        });
        assert_eq!(
            select_url(&body, CONSCIOUSNESS_SERVICE_NAMES).as_deref(),
            Some("http://c:9002")
        );
    }

    #[test]
    fn does_not_treat_error_payload_as_flat_map() {
        let body = json!({ "error": "registry unavailable" });
        assert_eq!(select_url(&body, CONSCIOUSNESS_SERVICE_NAMES), None);
    }

    #[test]
    fn empty_services_map_yields_none() {
        let body = json!({ "services": {} });
        assert_eq!(select_url(&body, CONSCIOUSNESS_SERVICE_NAMES), None);
    }
}
