//! Runtime configuration: compiled-in defaults, overlaid by `config.toml`
//! if present, overlaid by environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub mcp_registry_url: String,
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    pub rebalance_interval_seconds: u64,
    pub opportunity_poll_interval_seconds: u64,
    pub max_opportunities: usize,
    pub orchestrator_cycle_seconds: u64,
    pub reaper_interval_seconds: u64,
    pub reaper_idle_seconds: u64,
    pub reaper_max_errors: u32,
    pub preferences_dir: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            mcp_registry_url: "http://localhost:8500".to_string(),
            max_concurrent_tasks: 5,
            task_timeout_seconds: 600,
            rebalance_interval_seconds: 30,
            opportunity_poll_interval_seconds: 30,
            max_opportunities: 100,
            orchestrator_cycle_seconds: 30,
            reaper_interval_seconds: 60,
            reaper_idle_seconds: 300,
            reaper_max_errors: 3,
            preferences_dir: "data/user_preferences".to_string(),
        }
    }
}

impl CoreConfig {
    /// Layer defaults, then an optional `config.toml` on disk, then
    /// environment variables named in the external interfaces section.
    pub fn load(toml_path: Option<&str>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = toml_path {
            if let Ok(text) = std::fs::read_to_string(path) {
                let overlay: CoreConfig = toml::from_str(&text)
                    .map_err(|e| CoreError::config(format!("invalid config.toml: {e}")))?;
                cfg = overlay;
            }
        }

        cfg.apply_env_overlay();
        Ok(cfg)
    }

    fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("MCP_REGISTRY_URL") {
            self.mcp_registry_url = v;
        }
        if let Some(v) = env_parsed("MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = env_parsed("TASK_TIMEOUT_SECONDS") {
            self.task_timeout_seconds = v;
        }
        if let Some(v) = env_parsed("REBALANCE_INTERVAL_SECONDS") {
            self.rebalance_interval_seconds = v;
        }
        if let Some(v) = env_parsed("OPPORTUNITY_POLL_INTERVAL_SECONDS") {
            self.opportunity_poll_interval_seconds = v;
        }
        if let Some(v) = env_parsed("MAX_OPPORTUNITIES") {
            self.max_opportunities = v;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.max_concurrent_tasks, 5);
        assert_eq!(cfg.task_timeout_seconds, 600);
        assert_eq!(cfg.max_opportunities, 100);
    }

    #[test]
    fn env_overlay_overrides_defaults() {
        std::env::set_var("MAX_CONCURRENT_TASKS", "9");
        let cfg = CoreConfig::load(None).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 9);
        std::env::remove_var("MAX_CONCURRENT_TASKS");
    }
}
