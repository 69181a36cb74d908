//! Pipeline: walks an `Opportunity` through fixed ordered stages —
//! consciousness, analysis, decision, execution, learning — running
//! middleware after each stage and collecting per-stage metrics.
//!
//! Flow: Opportunity → Consciousness → Analysis → Decision → Execution → Learning

pub mod record;
pub mod stages;

pub use record::{PipelineRecord, Stage};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::info;

use crate::mcp::McpClient;
use crate::service::ArbitrageService;
use crate::types::Opportunity;

/// Post-stage observer. Runs after every stage, in registration order.
/// Failures in one middleware never prevent another from running.
pub trait Middleware: Send + Sync {
    fn on_stage_complete(&self, record: &mut PipelineRecord);
}

/// Logs a one-line progress event after each stage.
pub struct StageLoggingMiddleware;

impl Middleware for StageLoggingMiddleware {
    fn on_stage_complete(&self, record: &mut PipelineRecord) {
        info!(
            opportunity_id = %record.opportunity.id,
            stage = %record.stage.as_str(),
            "pipeline stage complete"
        );
    }
}

/// Records each stage's wall-clock duration into `record.metadata`.
pub struct TimingMiddleware;

impl Middleware for TimingMiddleware {
    fn on_stage_complete(&self, record: &mut PipelineRecord) {
        if let Some(elapsed) = record.take_last_stage_elapsed() {
            record.metadata.insert(
                format!("stage_timing_{}", record.stage.as_str()),
                serde_json::json!(elapsed.as_secs_f64()),
            );
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_processing_time_secs: f64,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PipelineMetrics {
    fn record_run(&mut self, success: bool, elapsed_secs: f64) {
        let n = self.processed as f64 + 1.0;
        self.avg_processing_time_secs = ((self.avg_processing_time_secs * (n - 1.0)) + elapsed_secs) / n;
        self.processed += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.last_run_at = Some(chrono::Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.successful as f64 / self.processed as f64
        }
    }
}

pub struct Pipeline {
    mcp: Arc<McpClient>,
    service: Arc<ArbitrageService>,
    middleware: Vec<Box<dyn Middleware>>,
    metrics: RwLock<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(mcp: Arc<McpClient>, service: Arc<ArbitrageService>) -> Self {
        Self {
            mcp,
            service,
            middleware: vec![Box::new(StageLoggingMiddleware), Box::new(TimingMiddleware)],
            metrics: RwLock::new(PipelineMetrics::default()),
        }
    }

    pub fn register_middleware(&mut self, middleware: Box<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.read().clone()
    }

    /// Runs the full stage sequence. Never panics or propagates an error
    /// past this call — every stage's failure mode degrades to a
    /// documented fallback and is recorded on `record.metadata`.
    pub async fn run(&self, opportunity: Opportunity) -> PipelineRecord {
        let start = Instant::now();
        let mut record = PipelineRecord::new(opportunity);

        record.stage = Stage::Consciousness;
        let t = Instant::now();
        stages::consciousness_stage(&self.mcp, &mut record).await;
        self.after_stage(&mut record, t);

        record.stage = Stage::Analysis;
        let t = Instant::now();
        stages::analysis_stage(&self.mcp, &mut record).await;
        self.after_stage(&mut record, t);

        record.stage = Stage::Decision;
        let t = Instant::now();
        stages::decision_stage(&mut record);
        self.after_stage(&mut record, t);

        record.stage = Stage::Execution;
        let t = Instant::now();
        stages::execution_stage(&self.service, &mut record).await;
        self.after_stage(&mut record, t);

        record.stage = Stage::Learning;
        let t = Instant::now();
        stages::learning_stage(&mut record);
        self.after_stage(&mut record, t);

        let elapsed = start.elapsed();
        let success = record.error.is_none();
        self.metrics.write().record_run(success, elapsed.as_secs_f64());
        record
    }

    fn after_stage(&self, record: &mut PipelineRecord, stage_start: Instant) {
        record.mark_stage_elapsed(stage_start.elapsed());
        for mw in &self.middleware {
            mw.on_stage_complete(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    fn opportunity(net_profit_usd: f64, risk_score: f64) -> Opportunity {
        Opportunity::new(
            "op-1",
            "ETH/USDC",
            "uniswap",
            "sushiswap",
            0.01,
            net_profit_usd + 8.0,
            8.0,
            risk_score,
        )
    }

    fn pipeline() -> Pipeline {
        let mcp = Arc::new(McpClient::new("http://localhost:1"));
        let service = Arc::new(ArbitrageService::new(CoreConfig::default()));
        Pipeline::new(mcp, service)
    }

    #[tokio::test]
    async fn run_always_reaches_learning_or_sets_error() {
        let pipeline = pipeline();
        let record = pipeline.run(opportunity(75.0, 0.2)).await;
        assert!(record.stage == Stage::Learning || record.error.is_some());
    }

    #[tokio::test]
    async fn fallback_scoring_without_mcp_yields_neutral_inputs() {
        let pipeline = pipeline();
        // profit_factor=0.5, sentiment_factor=0.5 (no MCP reachable), 1-risk=0.5
        // averages to exactly 0.5.
        let record = pipeline.run(opportunity(25.0, 0.5)).await;
        assert_eq!(record.consciousness_score, 0.5);
        assert_eq!(record.ai_analysis.confidence_score, 0.5);
    }
}
