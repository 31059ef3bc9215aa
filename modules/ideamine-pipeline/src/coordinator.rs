//! Duplicate-aware enrichment gating.
//!
//! For each (submission, stage) pair the coordinator decides skip-and-copy
//! vs. run-fresh from the concept's stage flag, falls back to a fresh run
//! when a copy can't be completed, and folds every result into the
//! concept's running aggregate through the store's serialized update path.
//! No concept state is touched while a stage call is in flight — updates
//! happen after the call returns.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use ideamine_common::types::{
    BusinessConcept, Classification, EnrichmentRecord, RunSummary, Submission,
};

use crate::stages::{EnrichmentStage, StageOutcome};
use crate::traits::ConceptStore;

/// How one stage ended for one submission. An explicit variant per outcome —
/// failures are data, not control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum StageDisposition {
    /// Ran the stage fresh (concept unknown or stage not yet complete).
    Fresh,
    /// Reused the primary submission's result.
    Copied,
    /// Copy was attempted but fell back to a fresh run.
    CopyFellBack,
    /// The stage failed to produce a persisted result; flag untouched.
    Failed(String),
}

impl StageDisposition {
    pub fn absorb_into(&self, stage_id: &str, summary: &mut RunSummary) {
        let key = stage_id.to_string();
        match self {
            StageDisposition::Fresh => {
                *summary.per_stage_fresh_runs.entry(key).or_default() += 1;
            }
            StageDisposition::Copied => {
                *summary.per_stage_skip_counts.entry(key).or_default() += 1;
            }
            StageDisposition::CopyFellBack => {
                *summary.per_stage_copy_failures.entry(key.clone()).or_default() += 1;
                *summary.per_stage_fresh_runs.entry(key).or_default() += 1;
            }
            StageDisposition::Failed(_) => {
                *summary.per_stage_failures.entry(key).or_default() += 1;
            }
        }
    }
}

pub struct EnrichmentCoordinator {
    store: Arc<dyn ConceptStore>,
    stages: Vec<Arc<dyn EnrichmentStage>>,
}

impl EnrichmentCoordinator {
    pub fn new(store: Arc<dyn ConceptStore>, stages: Vec<Arc<dyn EnrichmentStage>>) -> Self {
        Self { store, stages }
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.id().to_string()).collect()
    }

    /// Run every registered stage for one classified submission. Stages are
    /// independent — no ordering between them — so they dispatch
    /// concurrently; results come back in registration order.
    pub async fn enrich(
        &self,
        submission: &Submission,
        classification: &Classification,
    ) -> Vec<(String, StageDisposition)> {
        // Unknown classifications carry no concept: all stages run fresh
        // and no concept aggregates are touched.
        let concept = match classification.concept_id() {
            Some(concept_id) => match self.store.get_concept(concept_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        concept_id = %concept_id,
                        error = %e,
                        "Concept read failed before enrichment, running all stages fresh"
                    );
                    None
                }
            },
            None => None,
        };

        join_all(self.stages.iter().map(|stage| {
            let concept = concept.as_ref();
            async move {
                let disposition = self
                    .run_stage(submission, concept, stage.as_ref())
                    .await;
                (stage.id().to_string(), disposition)
            }
        }))
        .await
    }

    async fn run_stage(
        &self,
        submission: &Submission,
        concept: Option<&BusinessConcept>,
        stage: &dyn EnrichmentStage,
    ) -> StageDisposition {
        if let Some(concept) = concept {
            if concept.stage_complete(stage.id()) {
                match self.try_copy(submission, concept, stage).await {
                    Ok(()) => return StageDisposition::Copied,
                    Err(e) => {
                        warn!(
                            submission_id = %submission.id,
                            concept_id = %concept.id,
                            stage = stage.id(),
                            error = %e,
                            "Copy failed, falling back to fresh run"
                        );
                        return match self.run_fresh(submission, Some(concept), stage).await {
                            Ok(()) => StageDisposition::CopyFellBack,
                            Err(e) => StageDisposition::Failed(e.to_string()),
                        };
                    }
                }
            }
        }

        match self.run_fresh(submission, concept, stage).await {
            Ok(()) => StageDisposition::Fresh,
            Err(e) => StageDisposition::Failed(e.to_string()),
        }
    }

    /// Skip path: copy the primary submission's result verbatim.
    async fn try_copy(
        &self,
        submission: &Submission,
        concept: &BusinessConcept,
        stage: &dyn EnrichmentStage,
    ) -> anyhow::Result<()> {
        let primary_record = self
            .store
            .enrichment_for(concept.primary_submission_id, stage.id())
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "primary submission {} has no {} record",
                    concept.primary_submission_id,
                    stage.id()
                )
            })?;

        let outcome = stage.copy(&primary_record)?;
        self.persist(
            submission,
            Some(concept.id),
            stage.id(),
            &outcome,
            true,
            &primary_record.source_reference,
        )
        .await?;
        self.store
            .update_stage_state(concept.id, stage.id(), outcome.score)
            .await?;

        info!(
            submission_id = %submission.id,
            concept_id = %concept.id,
            stage = stage.id(),
            primary = %concept.primary_submission_id,
            "Skipped fresh analysis, copied primary result"
        );
        Ok(())
    }

    /// Run path: execute the stage, persist, then update the concept's flag
    /// and aggregate through the serialized store path.
    async fn run_fresh(
        &self,
        submission: &Submission,
        concept: Option<&BusinessConcept>,
        stage: &dyn EnrichmentStage,
    ) -> anyhow::Result<()> {
        let outcome = stage.run(submission).await?;

        self.persist(
            submission,
            concept.map(|c| c.id),
            stage.id(),
            &outcome,
            false,
            &submission.source_reference,
        )
        .await?;
        if let Some(concept) = concept {
            self.store
                .update_stage_state(concept.id, stage.id(), outcome.score)
                .await?;
        }
        Ok(())
    }

    async fn persist(
        &self,
        submission: &Submission,
        concept_id: Option<uuid::Uuid>,
        stage_id: &str,
        outcome: &StageOutcome,
        copied_from_primary: bool,
        source_reference: &str,
    ) -> anyhow::Result<()> {
        let record = EnrichmentRecord {
            stage: stage_id.to_string(),
            submission_id: submission.id,
            concept_id,
            score: outcome.score,
            payload: outcome.payload.clone(),
            copied_from_primary,
            source_reference: source_reference.to_string(),
            recorded_at: Utc::now(),
        };
        self.store.record_enrichment(&record).await
    }
}
