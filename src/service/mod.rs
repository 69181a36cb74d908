//! Arbitrage Service: owns the registry of `BotDescriptor`s, produces
//! opportunities, and performs the end-to-end `execute_arbitrage` call.

pub mod ai_engine;
pub mod events;

pub use ai_engine::{AiEngine, NoopAiEngine};
pub use events::EventBus;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::supervisor::{BotAdapter, PollOutcome};
use crate::types::{BotDescriptor, BotStatus, ExecutionResult, Opportunity, ServiceEvent, Strategy};

/// Token universe the monitoring loop scans. Mirrors the fixed set the
/// source's `start_monitoring` iterates.
const MONITORED_TOKENS: &[&str] = &["ETH", "USDC", "WBTC", "MATIC", "ARB"];

/// How often a spawned monitor task re-checks a running bot's liveness.
const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct ArbitrageService {
    bots: DashMap<String, BotDescriptor>,
    opportunities: RwLock<VecDeque<Opportunity>>,
    max_opportunities: usize,
    ai_engine: RwLock<Arc<dyn AiEngine>>,
    events: EventBus,
    monitoring: RwLock<Option<tokio::task::JoinHandle<()>>>,
    supervisor: RwLock<Option<Arc<dyn BotAdapter>>>,
}

impl ArbitrageService {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            bots: DashMap::new(),
            opportunities: RwLock::new(VecDeque::new()),
            max_opportunities: config.max_opportunities,
            ai_engine: RwLock::new(Arc::new(NoopAiEngine)),
            events: EventBus::new(),
            monitoring: RwLock::new(None),
            supervisor: RwLock::new(None),
        }
    }

    /// Installs the backend that `start_bot`/`stop_bot` drive bot
    /// lifecycles through.
    pub fn set_supervisor(&self, adapter: Arc<dyn BotAdapter>) {
        *self.supervisor.write() = Some(adapter);
    }

    pub fn set_ai_engine(&self, engine: Arc<dyn AiEngine>) {
        *self.ai_engine.write() = engine;
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Returns `false` without mutating state if `id` is already
    /// registered — idempotent registration, not a silent overwrite.
    pub fn register_bot(&self, id: impl Into<String>, name: impl Into<String>, launch_spec: impl Into<String>) -> bool {
        let id = id.into();
        if self.bots.contains_key(&id) {
            warn!(bot_id = %id, "register_bot called for an already-registered id");
            return false;
        }
        let descriptor = BotDescriptor::new(id.clone(), name, launch_spec);
        self.bots.insert(id, descriptor);
        true
    }

    pub fn bot_status(&self, id: &str) -> Option<BotDescriptor> {
        self.bots.get(id).map(|d| d.value().clone())
    }

    pub fn all_bot_status(&self) -> Vec<BotDescriptor> {
        self.bots.iter().map(|e| e.value().clone()).collect()
    }

    pub fn with_descriptor_mut<R>(&self, id: &str, f: impl FnOnce(&mut BotDescriptor) -> R) -> Option<R> {
        self.bots.get_mut(id).map(|mut d| f(&mut d))
    }

    /// Top-N opportunities by net profit, retained in a ring bounded to
    /// `max_opportunities`.
    pub fn get_opportunities(&self, token: &str, limit: usize) -> Vec<Opportunity> {
        let ring = self.opportunities.read();
        let mut matching: Vec<Opportunity> = ring
            .iter()
            .filter(|o| o.token_pair.contains(token))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.net_profit_usd.partial_cmp(&a.net_profit_usd).unwrap());
        matching.truncate(limit);
        matching
    }

    pub fn push_opportunity(&self, opportunity: Opportunity) {
        let mut ring = self.opportunities.write();
        ring.push_back(opportunity);
        while ring.len() > self.max_opportunities {
            ring.pop_front();
        }
    }

    /// Best current route per monitored token, each carrying its top-3
    /// candidate routes, sorted by estimated profit descending. Tokens
    /// with no opportunities in the ring are omitted.
    pub fn get_strategies(&self) -> Vec<Strategy> {
        let mut strategies: Vec<Strategy> = MONITORED_TOKENS
            .iter()
            .filter_map(|token| {
                let routes = self.get_opportunities(token, 3);
                let best = routes.first()?;
                Some(Strategy {
                    symbol: token.to_string(),
                    estimated_profit: best.net_profit_usd,
                    confidence: (1.0 - best.risk_score).clamp(0.0, 1.0),
                    execution_timing: execution_timing_for(best.net_profit_usd),
                    routes,
                })
            })
            .collect();
        strategies.sort_by(|a, b| b.estimated_profit.partial_cmp(&a.estimated_profit).unwrap());
        strategies
    }

    /// Drives a registered bot `stopped -> starting -> running` through the
    /// installed supervisor backend. Returns `Ok(true)` if the bot ends up
    /// running (including the idempotent case where it already was), and
    /// `Ok(false)` for an unregistered id or a start failure (the
    /// descriptor is left in `error` with `error_message` set, mirroring
    /// the caller-visible `false` return rather than a propagated error).
    pub async fn start_bot(self: &Arc<Self>, id: &str, config: Option<serde_json::Value>) -> Result<bool> {
        let Some(adapter) = self.supervisor.read().clone() else {
            return Err(CoreError::config("no supervisor backend configured"));
        };
        let Some(mut descriptor) = self.bot_status(id) else {
            warn!(bot_id = id, "start_bot called for an unregistered bot");
            return Ok(false);
        };
        if descriptor.status == BotStatus::Running {
            info!(bot_id = id, "start_bot called for an already-running bot");
            return Ok(true);
        }

        self.with_descriptor_mut(id, |d| {
            d.status = BotStatus::Starting;
            d.error_message = None;
        });

        match adapter.start(&mut descriptor, config).await {
            Ok(()) => {
                self.with_descriptor_mut(id, |d| *d = descriptor.clone());
                info!(bot_id = id, "bot started");
                self.events.publish(ServiceEvent {
                    event_type: "bot_started".to_string(),
                    data: json!({"bot_id": id}),
                });
                self.spawn_monitor(adapter, id.to_string());
                Ok(true)
            }
            Err(e) => {
                self.with_descriptor_mut(id, |d| {
                    d.status = BotStatus::Error;
                    d.error_message = Some(e.to_string());
                });
                warn!(bot_id = id, error = %e, "failed to start bot");
                self.events.publish(ServiceEvent {
                    event_type: "bot_error".to_string(),
                    data: json!({"bot_id": id, "error": e.to_string()}),
                });
                Ok(false)
            }
        }
    }

    /// Requests a running bot stop through the installed supervisor
    /// backend. A bot that isn't running is a no-op success, matching
    /// `start_bot`'s idempotence.
    pub async fn stop_bot(&self, id: &str) -> Result<bool> {
        let Some(adapter) = self.supervisor.read().clone() else {
            return Err(CoreError::config("no supervisor backend configured"));
        };
        let Some(mut descriptor) = self.bot_status(id) else {
            warn!(bot_id = id, "stop_bot called for an unregistered bot");
            return Ok(false);
        };
        if descriptor.status != BotStatus::Running {
            info!(bot_id = id, "stop_bot called for a bot that is not running");
            return Ok(true);
        }

        self.with_descriptor_mut(id, |d| d.status = BotStatus::Stopping);
        adapter.stop(&mut descriptor).await?;
        self.with_descriptor_mut(id, |d| {
            d.status = descriptor.status;
            d.pid = descriptor.pid;
        });
        info!(bot_id = id, "bot stopped");
        self.events.publish(ServiceEvent {
            event_type: "bot_stopped".to_string(),
            data: json!({"bot_id": id}),
        });
        Ok(true)
    }

    /// Polls the adapter on a fixed cadence until the bot exits, then
    /// moves the canonical descriptor to `stopped` or `error` — the only
    /// path besides `stop_bot` that can take a `running` bot out of that
    /// state, enforcing the invariant that a running descriptor is never
    /// left pointing at a dead backend for more than one tick.
    fn spawn_monitor(self: &Arc<Self>, adapter: Arc<dyn BotAdapter>, bot_id: String) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(descriptor) = service.bot_status(&bot_id) else { break };
                if descriptor.status != BotStatus::Running {
                    break;
                }
                match adapter.poll(&descriptor).await {
                    Ok(PollOutcome::Alive) => {
                        service.with_descriptor_mut(&bot_id, |d| d.last_activity = chrono::Utc::now());
                    }
                    Ok(PollOutcome::ExitedClean) => {
                        service.with_descriptor_mut(&bot_id, |d| {
                            d.status = BotStatus::Stopped;
                            d.pid = None;
                        });
                        info!(bot_id = %bot_id, "bot exited normally");
                        service.events.publish(ServiceEvent {
                            event_type: "bot_stopped".to_string(),
                            data: json!({"bot_id": bot_id}),
                        });
                        break;
                    }
                    Ok(PollOutcome::ExitedWithError(detail)) => {
                        service.with_descriptor_mut(&bot_id, |d| {
                            d.status = BotStatus::Error;
                            d.pid = None;
                            d.error_message = Some(detail.clone());
                        });
                        warn!(bot_id = %bot_id, error = %detail, "bot exited with error");
                        service.events.publish(ServiceEvent {
                            event_type: "bot_error".to_string(),
                            data: json!({"bot_id": bot_id, "error": detail}),
                        });
                        break;
                    }
                    Err(e) => {
                        warn!(bot_id = %bot_id, error = %e, "monitor poll failed");
                        break;
                    }
                }
            }
        });
    }

    /// Executes one opportunity end-to-end. If an AI engine is wired in,
    /// delegate to it and report the outcome back for learning;
    /// otherwise fall through to `NoopAiEngine`'s direct path (the same
    /// call either way — the difference is which engine is installed).
    pub async fn execute_arbitrage(&self, opportunity: Opportunity, amount: Option<f64>) -> Result<ExecutionResult> {
        let engine = self.ai_engine.read().clone();
        let result = engine.execute(&opportunity, amount).await?;
        engine.learn_from_outcome(&opportunity, &result).await;

        for mut bot in self.bots.iter_mut() {
            if bot.status == crate::types::BotStatus::Running {
                bot.opportunities_found += 1;
                bot.total_profit += result.profit_realized_usd;
                bot.last_activity = chrono::Utc::now();
            }
        }

        self.events.publish(ServiceEvent {
            event_type: "arbitrage_executed".to_string(),
            data: json!({
                "token_pair": opportunity.token_pair,
                "success": result.success,
                "profit_realized_usd": result.profit_realized_usd,
            }),
        });

        Ok(result)
    }

    /// Scans `MONITORED_TOKENS` every `interval` and emits
    /// `opportunities_found` events. Runs until `stop_monitoring` aborts
    /// the returned handle.
    pub fn start_monitoring(self: &Arc<Self>, interval: std::time::Duration) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for token in MONITORED_TOKENS {
                    let found = service.get_opportunities(token, 5);
                    if !found.is_empty() {
                        service.events.publish(ServiceEvent {
                            event_type: "opportunities_found".to_string(),
                            data: json!({"token": token, "count": found.len()}),
                        });
                    }
                }
            }
        });
        *self.monitoring.write() = Some(handle);
        info!("arbitrage service monitoring loop started");
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.monitoring.write().take() {
            handle.abort();
            info!("arbitrage service monitoring loop stopped");
        }
    }

    /// Stops monitoring, requests every running bot stop (callers are
    /// expected to drive the supervisor separately; this only marks
    /// intent on the descriptors), and clears the event bus subscriber
    /// state by dropping this service's sender side along with `self`.
    pub fn shutdown(&self) {
        self.stop_monitoring();
        for mut bot in self.bots.iter_mut() {
            if bot.status == crate::types::BotStatus::Running {
                bot.status = crate::types::BotStatus::Stopping;
            }
        }
        info!("arbitrage service shutdown complete");
    }
}

/// Coarse timing bucket for a strategy's best route, standing in for the
/// bridge-latency classification the token analyzer doesn't model here.
fn execution_timing_for(net_profit_usd: f64) -> String {
    if net_profit_usd > 50.0 {
        "immediate"
    } else if net_profit_usd > 10.0 {
        "standard"
    } else {
        "delayed"
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<ArbitrageService> {
        Arc::new(ArbitrageService::new(CoreConfig::default()))
    }

    struct MockAdapter {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl BotAdapter for MockAdapter {
        async fn start(&self, descriptor: &mut BotDescriptor, _config: Option<serde_json::Value>) -> Result<()> {
            if self.fail {
                return Err(CoreError::transient("mock", "boom"));
            }
            descriptor.status = BotStatus::Running;
            descriptor.pid = Some(1234);
            Ok(())
        }

        async fn stop(&self, descriptor: &mut BotDescriptor) -> Result<()> {
            descriptor.status = BotStatus::Stopped;
            descriptor.pid = None;
            Ok(())
        }

        async fn poll(&self, _descriptor: &BotDescriptor) -> Result<PollOutcome> {
            Ok(PollOutcome::Alive)
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let service = service();
        assert!(service.register_bot("b1", "Bot One", "bot_one.py"));
        assert!(!service.register_bot("b1", "Bot One Again", "other.py"));
    }

    #[test]
    fn opportunity_ring_is_bounded() {
        let service = service();
        for i in 0..150 {
            service.push_opportunity(Opportunity::new(
                format!("op-{i}"),
                "ETH/USDC",
                "a",
                "b",
                0.01,
                10.0,
                1.0,
                0.1,
            ));
        }
        assert_eq!(service.opportunities.read().len(), 100);
    }

    #[tokio::test]
    async fn execute_arbitrage_accrues_stats_on_running_bots() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.with_descriptor_mut("b1", |d| d.status = crate::types::BotStatus::Running);

        let opportunity = Opportunity::new("op-1", "ETH/USDC", "a", "b", 0.01, 50.0, 5.0, 0.1);
        let result = service
            .execute_arbitrage(opportunity, Some(100.0))
            .await
            .unwrap();
        assert!(result.success);

        let descriptor = service.bot_status("b1").unwrap();
        assert_eq!(descriptor.opportunities_found, 1);
    }

    #[tokio::test]
    async fn start_bot_transitions_to_running_via_the_adapter() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.set_supervisor(Arc::new(MockAdapter { fail: false }));

        assert!(service.start_bot("b1", None).await.unwrap());
        assert_eq!(service.bot_status("b1").unwrap().status, BotStatus::Running);
    }

    #[tokio::test]
    async fn start_bot_is_idempotent_on_an_already_running_bot() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.set_supervisor(Arc::new(MockAdapter { fail: false }));
        service.start_bot("b1", None).await.unwrap();

        assert!(service.start_bot("b1", None).await.unwrap());
    }

    #[tokio::test]
    async fn start_bot_records_error_status_on_adapter_failure() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.set_supervisor(Arc::new(MockAdapter { fail: true }));

        assert!(!service.start_bot("b1", None).await.unwrap());
        let descriptor = service.bot_status("b1").unwrap();
        assert_eq!(descriptor.status, BotStatus::Error);
        assert!(descriptor.error_message.is_some());
    }

    #[tokio::test]
    async fn start_bot_on_an_unregistered_id_returns_false() {
        let service = service();
        service.set_supervisor(Arc::new(MockAdapter { fail: false }));
        assert!(!service.start_bot("ghost", None).await.unwrap());
    }

    #[tokio::test]
    async fn stop_bot_transitions_running_to_stopped() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.set_supervisor(Arc::new(MockAdapter { fail: false }));
        service.start_bot("b1", None).await.unwrap();

        assert!(service.stop_bot("b1").await.unwrap());
        assert_eq!(service.bot_status("b1").unwrap().status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_bot_on_a_stopped_bot_is_a_no_op_success() {
        let service = service();
        service.register_bot("b1", "Bot One", "bot_one.py");
        service.set_supervisor(Arc::new(MockAdapter { fail: false }));

        assert!(service.stop_bot("b1").await.unwrap());
        assert_eq!(service.bot_status("b1").unwrap().status, BotStatus::Stopped);
    }

    #[test]
    fn get_strategies_returns_one_entry_per_matching_token() {
        let service = service();
        service.push_opportunity(Opportunity::new("op-1", "ETH/USDC", "a", "b", 0.01, 80.0, 5.0, 0.2));

        let strategies = service.get_strategies();
        let symbols: Vec<&str> = strategies.iter().map(|s| s.symbol.as_str()).collect();
        assert!(symbols.contains(&"ETH"));
        assert!(symbols.contains(&"USDC"));
        for strategy in &strategies {
            assert_eq!(strategy.routes.len(), 1);
            assert_eq!(strategy.estimated_profit, 75.0);
            assert_eq!(strategy.execution_timing, "immediate");
        }
    }

    #[test]
    fn get_strategies_omits_tokens_with_no_opportunities() {
        let service = service();
        assert!(service.get_strategies().is_empty());
    }
}
