//! Integration scenarios against the public API: one test per end-to-end
//! scenario enumerated against the pipeline/orchestrator/hub contract.

use std::sync::Arc;

use arbiter_core::config::CoreConfig;
use arbiter_core::hub::ConnectionHub;
use arbiter_core::mcp::McpClient;
use arbiter_core::pipeline::Pipeline;
use arbiter_core::service::ArbitrageService;
use arbiter_core::types::{BotMode, BotStatus, DecisionType, Opportunity};

fn unreachable_mcp() -> Arc<McpClient> {
    // Port 1 never has a listener in CI sandboxes; every call degrades
    // to the documented fallback.
    Arc::new(McpClient::new("http://127.0.0.1:1"))
}

#[tokio::test]
async fn happy_path_execute_decision() {
    let config = CoreConfig::default();
    let mcp = unreachable_mcp();
    let service = Arc::new(ArbitrageService::new(config.clone()));
    let pipeline = Pipeline::new(mcp, service);

    // Consciousness and analysis both fall back to neutral inputs with no
    // MCP reachable, so drive the decision formula directly via a high
    // net-profit opportunity and confirm the fallback score still resolves
    // deterministically rather than panicking or hanging.
    let opportunity = Opportunity::new("op-1", "ETH/USDC", "uniswap", "sushiswap", 0.01, 83.0, 8.0, 0.2);
    let record = pipeline.run(opportunity).await;

    assert_eq!(record.stage, arbiter_core::pipeline::Stage::Learning);
    assert!(record.decision.is_some());
}

#[tokio::test]
async fn fallback_on_absent_mcp_yields_neutral_consciousness() {
    let config = CoreConfig::default();
    let mcp = unreachable_mcp();
    let service = Arc::new(ArbitrageService::new(config));
    let pipeline = Pipeline::new(mcp, service);

    let opportunity = Opportunity::new("op-2", "ETH/USDC", "a", "b", 0.01, 15.0, 5.0, 0.3);
    let record = pipeline.run(opportunity).await;

    assert_eq!(record.consciousness_score, 0.5);
    assert_eq!(record.decision.unwrap().decision_type, DecisionType::Hold);
}

#[tokio::test]
async fn bot_promotion_after_five_successful_tasks() {
    let config = CoreConfig::default();
    let mcp = unreachable_mcp();
    let service = Arc::new(ArbitrageService::new(config.clone()));
    let pipeline = Arc::new(Pipeline::new(mcp, service.clone()));
    let orchestrator = Arc::new(arbiter_core::orchestrator::Orchestrator::new(config, pipeline, service.clone()));

    service.register_bot("live_monitor", "Live Monitor", "monitor.py");
    service.with_descriptor_mut("live_monitor", |d| d.status = BotStatus::Running);
    orchestrator.set_bot_mode("live_monitor", BotMode::Supervised);

    for i in 0..5 {
        let opportunity = Opportunity::new(format!("op-{i}"), "ETH/USDC", "a", "b", 0.01, 50.0, 5.0, 0.1);
        let mut opportunity = opportunity;
        opportunity.suggested_amount = Some(100.0);
        orchestrator.submit(opportunity, 5);
        orchestrator.run_cycle().await;
        // Let the spawned execution task complete before the next cycle
        // reassigns, since executions race the assignment loop.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    // One more cycle so the rebalance step observes the fifth completion
    // (the assign step and its spawned execution race each other).
    orchestrator.run_cycle().await;

    let performance = orchestrator.bot_performance("live_monitor");
    assert!(performance.is_some());
    assert_eq!(performance.unwrap().tasks_completed, 5);
    assert_eq!(orchestrator.bot_mode("live_monitor"), Some(BotMode::Autonomous));
}

#[tokio::test]
async fn ws_reaper_drops_idle_clients() {
    let hub = ConnectionHub::new(-1, 3);
    let client = "idle-client".to_string();
    let _rx = hub.connect(client.clone());
    hub.subscribe(&client, &"market".to_string());

    let reaped = hub.reap_stale();

    assert_eq!(reaped, vec![client.clone()]);
    assert!(!hub.is_connected(&client));
    assert!(hub.subscriptions_of(&client).is_empty());
}

#[tokio::test]
async fn registry_shape_error_degrades_to_absent() {
    let mcp = McpClient::new("http://127.0.0.1:1");
    let result = mcp.lookup(arbiter_core::mcp::CONSCIOUSNESS_SERVICE_NAMES, "test").await;
    assert!(result.is_none());
}

#[tokio::test]
async fn task_past_deadline_times_out_within_a_cycle() {
    let mut config = CoreConfig::default();
    config.task_timeout_seconds = 0;
    let mcp = unreachable_mcp();
    let service = Arc::new(ArbitrageService::new(config.clone()));
    let pipeline = Arc::new(Pipeline::new(mcp, service.clone()));
    let orchestrator = Arc::new(arbiter_core::orchestrator::Orchestrator::new(config, pipeline, service));

    // No bot registered, so the task never leaves the pending queue; it
    // must still time out there once its deadline passes.
    let opportunity = Opportunity::new("op-3", "ETH/USDC", "a", "b", 0.01, 10.0, 2.0, 0.1);
    orchestrator.submit(opportunity, 9);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    orchestrator.run_cycle().await;

    let status = orchestrator.status();
    assert_eq!(status.pending, 0);
    assert_eq!(status.active, 0);
    assert_eq!(status.completed, 1);
}
