//! Shared domain types: `Opportunity`, bot/task lifecycle enums, and the
//! small value types passed between components.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A candidate arbitrage trade. Immutable once accepted into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub id: String,
    pub token_pair: String,
    pub source_venue: String,
    pub target_venue: String,
    pub price_differential: f64,
    pub gross_profit_usd: f64,
    pub gas_cost_usd: f64,
    pub net_profit_usd: f64,
    /// Clamped to [0, 1] by `Opportunity::new`.
    pub risk_score: f64,
    pub suggested_amount: Option<f64>,
}

impl Opportunity {
    pub fn new(
        id: impl Into<String>,
        token_pair: impl Into<String>,
        source_venue: impl Into<String>,
        target_venue: impl Into<String>,
        price_differential: f64,
        gross_profit_usd: f64,
        gas_cost_usd: f64,
        risk_score: f64,
    ) -> Self {
        let net_profit_usd = gross_profit_usd - gas_cost_usd;
        Self {
            id: id.into(),
            token_pair: token_pair.into(),
            source_venue: source_venue.into(),
            target_venue: target_venue.into(),
            price_differential,
            gross_profit_usd,
            gas_cost_usd,
            net_profit_usd,
            risk_score: risk_score.clamp(0.0, 1.0),
            suggested_amount: None,
        }
    }
}

/// Operational posture controlling whether a bot is eligible for automatic
/// assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Autonomous,
    Supervised,
    Manual,
    Learning,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Autonomous => "autonomous",
            BotMode::Supervised => "supervised",
            BotMode::Manual => "manual",
            BotMode::Learning => "learning",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "autonomous" => Some(BotMode::Autonomous),
            "supervised" => Some(BotMode::Supervised),
            "manual" => Some(BotMode::Manual),
            "learning" => Some(BotMode::Learning),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// `status=running` invariant lives with the supervisor; this struct is the
/// at-rest shape consumed everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDescriptor {
    pub bot_id: String,
    pub name: String,
    pub launch_spec: String,
    pub status: BotStatus,
    pub mode: BotMode,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub opportunities_found: u64,
    pub total_profit: f64,
    pub error_message: Option<String>,
}

impl BotDescriptor {
    pub fn new(bot_id: impl Into<String>, name: impl Into<String>, launch_spec: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            name: name.into(),
            launch_spec: launch_spec.into(),
            status: BotStatus::Stopped,
            mode: BotMode::Learning,
            pid: None,
            started_at: None,
            last_activity: Utc::now(),
            opportunities_found: 0,
            total_profit: 0.0,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Executing,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub profit_realized_usd: f64,
    pub gas_cost_usd: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub bot_id: Option<String>,
    pub opportunity: Opportunity,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    /// Monotonic submission counter used to break priority ties FIFO.
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotPerformance {
    pub tasks_completed: u64,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub mode_changes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Execute,
    Optimize,
    ScaleUp,
    ScaleDown,
    Hold,
    Abort,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Execute => "execute",
            DecisionType::Optimize => "optimize",
            DecisionType::ScaleUp => "scale_up",
            DecisionType::ScaleDown => "scale_down",
            DecisionType::Hold => "hold",
            DecisionType::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub score: f64,
    pub reasoning: String,
    pub parameters: DecisionParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionParameters {
    pub position_size: f64,
    pub slippage_tolerance: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub market_sentiment: String,
    pub risk_assessment: f64,
    pub confidence_score: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
}

/// Result of `ArbitrageService::execute_arbitrage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub profit_realized_usd: f64,
    pub gas_cost_usd: f64,
    pub networks: (String, String),
    pub ai_decision: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ai_reasoning: Option<String>,
    pub consciousness_score: Option<f64>,
    pub error: Option<String>,
}

/// Extra annotation `process_with_pipeline` adds once a decision routes
/// through the orchestrator. Named for the task outcome, not the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestrationOutcome {
    SubmittedForExecution { task_id: String },
    Action { decision_type: String },
}

/// A generic event published on the service's event bus, e.g.
/// `opportunities_found`, `bot_started`, `bot_stopped`, `bot_error`,
/// `arbitrage_executed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub event_type: String,
    pub data: Value,
}

/// Free-form key/value bag used for pipeline metadata and stage timings.
pub type MetaMap = HashMap<String, Value>;

/// One token's best current route plus its runners-up, as returned by
/// `ArbitrageService::get_strategies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub symbol: String,
    pub routes: Vec<Opportunity>,
    pub estimated_profit: f64,
    pub confidence: f64,
    pub execution_timing: String,
}
