//! Unified Facade: one place for callers to initialize and drive the
//! core. A single constructed `Core` value holds every subsystem by
//! reference instead of relying on module-global instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::hub::ConnectionHub;
use crate::mcp::McpClient;
use crate::orchestrator::{Orchestrator, OrchestratorSnapshot};
use crate::pipeline::{Pipeline, PipelineRecord};
use crate::preferences::PreferencesStore;
use crate::service::ArbitrageService;
use crate::supervisor::{BotAdapter, SubprocessAdapter};
use crate::types::{BotMode, Opportunity};

#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub opportunities_processed: u64,
    pub successful_executions: u64,
    pub overall_success_rate: f64,
    pub consciousness_score: f64,
    pub orchestrator: OrchestratorSnapshot,
}

#[derive(Default)]
struct Counters {
    opportunities_processed: AtomicU64,
    successful_executions: AtomicU64,
}

/// Wires every subsystem in leaves-first order (MCP → Supervisor →
/// Service → Pipeline → Orchestrator → Hub → Preferences) and exposes
/// the small surface callers actually drive.
pub struct Core {
    pub mcp: Arc<McpClient>,
    pub service: Arc<ArbitrageService>,
    pub pipeline: Arc<Pipeline>,
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<ConnectionHub>,
    pub preferences: Arc<PreferencesStore>,
    pub supervisor: Arc<dyn BotAdapter>,
    config: CoreConfig,
    counters: Counters,
    autonomous_loop: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Core {
    /// Constructs every subsystem and sets default bot modes:
    /// monitor-like bots go `autonomous`, executor-like bots go
    /// `supervised`, everything else starts `learning`.
    pub async fn initialize(config: CoreConfig) -> Result<Arc<Self>> {
        let mcp = Arc::new(McpClient::new(config.mcp_registry_url.clone()));
        let service = Arc::new(ArbitrageService::new(config.clone()));
        let pipeline = Arc::new(Pipeline::new(mcp.clone(), service.clone()));
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), pipeline.clone(), service.clone()));
        let hub = Arc::new(ConnectionHub::new(
            config.reaper_idle_seconds as i64,
            config.reaper_max_errors,
        ));
        let preferences = Arc::new(PreferencesStore::new(config.preferences_dir.clone()));
        let supervisor: Arc<dyn BotAdapter> = Arc::new(SubprocessAdapter::new());
        service.set_supervisor(supervisor.clone());

        let core = Arc::new(Self {
            mcp,
            service,
            pipeline,
            orchestrator,
            hub,
            preferences,
            supervisor,
            config,
            counters: Counters::default(),
            autonomous_loop: parking_lot::Mutex::new(None),
        });

        core.set_default_bot_modes();
        core.spawn_status_logging_loop();
        info!("core initialized");
        Ok(core)
    }

    fn set_default_bot_modes(&self) {
        for descriptor in self.service.all_bot_status() {
            let mode = if descriptor.name.to_lowercase().contains("monitor") {
                BotMode::Autonomous
            } else if descriptor.name.to_lowercase().contains("executor") {
                BotMode::Supervised
            } else {
                BotMode::Learning
            };
            self.orchestrator.set_bot_mode(descriptor.bot_id, mode);
        }
    }

    fn spawn_status_logging_loop(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                core.config.orchestrator_cycle_seconds.max(1) * 10,
            ));
            loop {
                ticker.tick().await;
                let status = core.status();
                info!(?status, "periodic status");
            }
        });
    }

    /// Delegates to the orchestrator's pipeline run, bumps the system
    /// counters, and returns the terminal record.
    pub async fn process_opportunity(self: &Arc<Self>, opportunity: Opportunity) -> PipelineRecord {
        self.counters.opportunities_processed.fetch_add(1, Ordering::Relaxed);
        let (record, _outcome) = self.orchestrator.process_with_rehoboam(opportunity).await;
        self.orchestrator.run_cycle().await;
        if record.success {
            self.counters.successful_executions.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    pub fn status(&self) -> CoreStatus {
        let processed = self.counters.opportunities_processed.load(Ordering::Relaxed);
        let successful = self.counters.successful_executions.load(Ordering::Relaxed);
        let overall_success_rate = if processed == 0 {
            0.0
        } else {
            successful as f64 / processed as f64
        };
        let pipeline_success_rate = self.pipeline.metrics().success_rate();
        let consciousness_score = if processed > 0 {
            (pipeline_success_rate + 0.2).min(1.0)
        } else {
            0.5
        };
        CoreStatus {
            opportunities_processed: processed,
            successful_executions: successful,
            overall_success_rate,
            consciousness_score,
            orchestrator: self.orchestrator.status(),
        }
    }

    pub fn detailed_metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status(),
            "pipeline": {
                "processed": self.pipeline.metrics().processed,
                "successful": self.pipeline.metrics().successful,
                "failed": self.pipeline.metrics().failed,
            },
            "hub": self.hub.metrics(),
        })
    }

    pub fn configure_bot_mode(&self, bot_id: &str, mode_name: &str) -> bool {
        match BotMode::parse(mode_name) {
            Some(mode) => {
                self.orchestrator.set_bot_mode(bot_id, mode);
                true
            }
            None => {
                warn!(bot_id, mode_name, "unknown bot mode");
                false
            }
        }
    }

    /// Sets every active bot to `autonomous` and spawns a discovery loop
    /// polling a fixed token set every `opportunity_poll_interval_seconds`.
    pub fn start_autonomous_mode(self: &Arc<Self>) {
        for descriptor in self.service.all_bot_status() {
            self.orchestrator.set_bot_mode(descriptor.bot_id, BotMode::Autonomous);
        }

        let core = self.clone();
        let interval = std::time::Duration::from_secs(self.config.opportunity_poll_interval_seconds);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            const TOKENS: &[&str] = &["ETH", "USDC", "WBTC", "MATIC", "ARB"];
            loop {
                ticker.tick().await;
                for token in TOKENS {
                    for opportunity in core.service.get_opportunities(token, 5) {
                        core.process_opportunity(opportunity).await;
                    }
                }
            }
        });
        *self.autonomous_loop.lock() = Some(handle);
        info!("autonomous mode started");
    }

    /// Stops all bots and downgrades every mode to `manual`.
    pub fn emergency_stop(self: &Arc<Self>) {
        if let Some(handle) = self.autonomous_loop.lock().take() {
            handle.abort();
        }
        self.service.shutdown();
        for descriptor in self.service.all_bot_status() {
            self.orchestrator.set_bot_mode(descriptor.bot_id, BotMode::Manual);
        }
        warn!("emergency stop engaged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_opportunity_updates_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CoreConfig::default();
        config.preferences_dir = dir.path().to_string_lossy().to_string();
        let core = Core::initialize(config).await.unwrap();

        let opportunity = Opportunity::new("op-1", "ETH/USDC", "a", "b", 0.01, 75.0, 8.0, 0.2);
        core.process_opportunity(opportunity).await;

        let status = core.status();
        assert_eq!(status.opportunities_processed, 1);
    }
}
