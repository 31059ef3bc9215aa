//! The enrichment stage contract.
//!
//! Stages are external collaborators: the coordinator invokes `run` when
//! gating says run and never inspects what a stage computes. Each stage is
//! an explicit unit with a fixed two-operation contract — `run` for fresh
//! analysis, `copy` for reusing a primary submission's result.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use ideamine_common::types::{EnrichmentRecord, Submission};

/// What a stage produces for one submission: a numeric score that feeds the
/// concept's running aggregate, plus the full structured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub score: f64,
    pub payload: Value,
}

#[async_trait]
pub trait EnrichmentStage: Send + Sync {
    /// Stable stage identifier. Must appear in the configured stage list.
    fn id(&self) -> &str;

    /// Fresh, potentially expensive analysis of one submission.
    async fn run(&self, submission: &Submission) -> Result<StageOutcome>;

    /// Reuse a primary submission's result. The default copies score and
    /// payload verbatim — structured sub-fields are never regenerated, so
    /// copies cannot drift from the primary's analysis.
    fn copy(&self, primary: &EnrichmentRecord) -> Result<StageOutcome> {
        Ok(StageOutcome {
            score: primary.score,
            payload: primary.payload.clone(),
        })
    }
}
