//! `PipelineRecord`: the tagged record threaded through every stage.
//! Each stage writes its outcome onto the record rather than raising,
//! so the runner never has to reconstruct state from a caught error.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{AiAnalysis, Decision, ExecutionResult, MetaMap, Opportunity, Recommendation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Consciousness,
    Analysis,
    Decision,
    Execution,
    Learning,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Consciousness => "consciousness",
            Stage::Analysis => "analysis",
            Stage::Decision => "decision",
            Stage::Execution => "execution",
            Stage::Learning => "learning",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub opportunity: Opportunity,
    pub stage: Stage,
    pub consciousness_score: f64,
    pub ai_analysis: AiAnalysis,
    pub decision: Option<Decision>,
    pub execution_result: Option<ExecutionResult>,
    pub metadata: MetaMap,
    pub success: bool,
    pub error: Option<String>,

    #[serde(skip)]
    last_stage_elapsed: Option<Duration>,
}

impl PipelineRecord {
    pub fn new(opportunity: Opportunity) -> Self {
        Self {
            opportunity,
            stage: Stage::Consciousness,
            consciousness_score: 0.0,
            ai_analysis: AiAnalysis {
                market_sentiment: "neutral".to_string(),
                risk_assessment: 0.5,
                confidence_score: 0.5,
                recommendation: Recommendation::Hold,
            },
            decision: None,
            execution_result: None,
            metadata: MetaMap::new(),
            success: false,
            error: None,
            last_stage_elapsed: None,
        }
    }

    pub fn mark_stage_elapsed(&mut self, elapsed: Duration) {
        self.last_stage_elapsed = Some(elapsed);
    }

    pub fn take_last_stage_elapsed(&mut self) -> Option<Duration> {
        self.last_stage_elapsed.take()
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error = Some(message.into());
    }
}
