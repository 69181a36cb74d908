//! The five stage bodies and the scoring formulas that drive decisions.
//! Each function degrades to a documented fallback on any MCP failure and
//! never aborts the pipeline.

use tracing::warn;

use crate::mcp::McpClient;
use crate::service::ArbitrageService;
use crate::types::{
    AiAnalysis, Decision, DecisionParameters, DecisionType, ExecutionResult, Recommendation,
};

use super::record::PipelineRecord;

const FALLBACK_CONSCIOUSNESS_SCORE: f64 = 0.5;
const EXECUTE_THRESHOLD: f64 = 0.7;
const OPTIMIZE_THRESHOLD: f64 = 0.5;

pub async fn consciousness_stage(mcp: &McpClient, record: &mut PipelineRecord) {
    match mcp.consciousness_state().await {
        Some(state) => {
            let score = state
                .get("consciousness_level")
                .and_then(|v| v.as_f64())
                .unwrap_or(FALLBACK_CONSCIOUSNESS_SCORE)
                .clamp(0.0, 1.0);
            record.consciousness_score = score;
            record
                .metadata
                .insert("consciousness_reasoning".to_string(), serde_json::json!("mcp state"));
        }
        None => {
            warn!(
                opportunity_id = %record.opportunity.id,
                "consciousness service unavailable, using fallback score"
            );
            record.consciousness_score = FALLBACK_CONSCIOUSNESS_SCORE;
            record
                .metadata
                .insert("consciousness_reasoning".to_string(), serde_json::json!("fallback"));
        }
    }
}

pub async fn analysis_stage(mcp: &McpClient, record: &mut PipelineRecord) {
    let net_profit = record.opportunity.net_profit_usd;
    let risk_score = record.opportunity.risk_score;

    let sentiment_bullish = match mcp.market_analysis(&record.opportunity.token_pair).await {
        Some(analysis) => analysis
            .get("sentiment")
            .and_then(|v| v.as_str())
            .map(|s| s.eq_ignore_ascii_case("bullish"))
            .unwrap_or(false),
        None => false,
    };

    let profit_factor = (net_profit / 50.0).min(1.0).max(0.0);
    let sentiment_factor = if sentiment_bullish { 0.8 } else { 0.5 };
    let confidence = ((profit_factor + sentiment_factor + (1.0 - risk_score)) / 3.0).clamp(0.1, 0.95);

    let recommendation = if sentiment_bullish && confidence > 0.7 {
        Recommendation::StrongBuy
    } else if confidence > 0.6 {
        Recommendation::Buy
    } else if confidence > 0.3 {
        Recommendation::Hold
    } else {
        Recommendation::Avoid
    };

    record.ai_analysis = AiAnalysis {
        market_sentiment: if sentiment_bullish { "bullish" } else { "neutral" }.to_string(),
        risk_assessment: risk_score,
        confidence_score: confidence,
        recommendation,
    };
}

/// `decision.score = 0.3*consciousness + 0.4*analysis.confidence + 0.3*min(net_profit_usd/100, 1.0)`
pub fn decision_stage(record: &mut PipelineRecord) {
    let net_profit = record.opportunity.net_profit_usd;
    let score = 0.3 * record.consciousness_score
        + 0.4 * record.ai_analysis.confidence_score
        + 0.3 * (net_profit / 100.0).min(1.0).max(0.0);

    let decision_type = if score > EXECUTE_THRESHOLD {
        DecisionType::Execute
    } else if score > OPTIMIZE_THRESHOLD {
        DecisionType::Optimize
    } else {
        DecisionType::Hold
    };

    record.decision = Some(Decision {
        decision_type,
        score,
        reasoning: format!(
            "consciousness={:.2} confidence={:.2} net_profit_usd={:.2}",
            record.consciousness_score, record.ai_analysis.confidence_score, net_profit
        ),
        parameters: DecisionParameters {
            position_size: record.opportunity.suggested_amount.unwrap_or(0.0),
            slippage_tolerance: 0.01,
            timeout_secs: 30,
        },
    });
}

/// Only `execute` decisions touch the service here; the orchestrator is
/// the one that submits a `Task` when it sees an `execute` decision — this
/// stage's own execution result is for decisions resolved inline (not
/// routed through task assignment).
pub async fn execution_stage(service: &ArbitrageService, record: &mut PipelineRecord) {
    let Some(decision) = &record.decision else {
        record.fail("missing decision before execution stage");
        return;
    };

    if decision.decision_type != DecisionType::Execute {
        record.execution_result = None;
        return;
    }

    let amount = Some(decision.parameters.position_size).filter(|v| *v > 0.0);
    match service.execute_arbitrage(record.opportunity.clone(), amount).await {
        Ok(result) => {
            record.execution_result = Some(result);
        }
        Err(e) => {
            record.execution_result = Some(ExecutionResult {
                success: false,
                profit_realized_usd: 0.0,
                gas_cost_usd: record.opportunity.gas_cost_usd,
                networks: (
                    record.opportunity.source_venue.clone(),
                    record.opportunity.target_venue.clone(),
                ),
                ai_decision: None,
                ai_confidence: None,
                ai_reasoning: None,
                consciousness_score: Some(record.consciousness_score),
                error: Some(e.to_string()),
            });
        }
    }
}

pub fn learning_stage(record: &mut PipelineRecord) {
    let expected = record.opportunity.net_profit_usd;
    let actual = record
        .execution_result
        .as_ref()
        .map(|r| r.profit_realized_usd)
        .unwrap_or(0.0);

    let accuracy = if expected.abs() < f64::EPSILON {
        1.0
    } else {
        1.0 - ((expected - actual).abs() / expected.abs()).min(1.0)
    };

    let execution_success = record
        .execution_result
        .as_ref()
        .map(|r| r.success)
        .unwrap_or(false);

    record.metadata.insert(
        "learning".to_string(),
        serde_json::json!({
            "accuracy": accuracy,
            "consciousness_effectiveness": record.consciousness_score,
            "decision_quality": record.decision.as_ref().map(|d| d.score).unwrap_or(0.0),
            "execution_success": execution_success,
        }),
    );

    record.success = record.error.is_none();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Opportunity;

    fn record_with(net_profit: f64, consciousness: f64, confidence: f64) -> PipelineRecord {
        let opportunity = Opportunity::new("op", "ETH/USDC", "a", "b", 0.01, net_profit + 5.0, 5.0, 0.2);
        let mut record = PipelineRecord::new(opportunity);
        record.consciousness_score = consciousness;
        record.ai_analysis.confidence_score = confidence;
        record
    }

    #[test]
    fn happy_path_score_matches_spec_example() {
        let mut record = record_with(75.0, 0.8, 0.9);
        decision_stage(&mut record);
        let decision = record.decision.unwrap();
        assert!((decision.score - 0.825).abs() < 1e-9);
        assert_eq!(decision.decision_type, DecisionType::Execute);
    }

    #[test]
    fn score_of_exactly_0_7_resolves_to_optimize() {
        // 0.3*c + 0.4*a + 0.3*p = 0.7 exactly, using a nice combination.
        let mut record = record_with(0.0, 1.0, 1.0);
        record.consciousness_score = 1.0;
        record.ai_analysis.confidence_score = 1.0;
        // 0.3*1 + 0.4*1 + 0.3*min(net/100,1); need profit term = 0 => net_profit=0
        record.opportunity.net_profit_usd = 0.0;
        decision_stage(&mut record);
        let decision = record.decision.unwrap();
        assert!((decision.score - 0.7).abs() < 1e-9);
        assert_eq!(decision.decision_type, DecisionType::Optimize);
    }

    #[test]
    fn below_optimize_threshold_resolves_to_hold() {
        let mut record = record_with(0.0, 0.1, 0.1);
        decision_stage(&mut record);
        assert_eq!(record.decision.unwrap().decision_type, DecisionType::Hold);
    }
}
