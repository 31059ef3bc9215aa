//! Trait abstraction over the concept registry store.
//!
//! ConceptStore is the narrow surface the classifier and coordinator
//! consume. The production implementation is `ideamine_graph::ConceptWriter`;
//! tests run against `testing::MockConceptStore` — no database, no network.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use ideamine_common::types::{
    BusinessConcept, Classification, ConceptMatch, DuplicateLink, EnrichmentRecord, StageState,
    Submission,
};
use ideamine_graph::{ConceptWriter, CreateOutcome};

#[async_trait]
pub trait ConceptStore: Send + Sync {
    /// A prior classification for this submission, if one was recorded.
    async fn existing_classification(&self, submission_id: Uuid)
        -> Result<Option<Classification>>;

    /// Exact-duplicate lookup by fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Uuid>>;

    /// Semantic near-duplicate lookup. Hits are filtered to
    /// `similarity >= threshold`, similarity descending.
    async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
        max_results: usize,
    ) -> Result<Vec<ConceptMatch>>;

    /// Atomic creation. `CreateOutcome::Exists` carries the id of the
    /// concurrent winner when the fingerprint constraint rejects the insert.
    async fn create_concept(&self, concept: &BusinessConcept) -> Result<CreateOutcome>;

    async fn get_concept(&self, id: Uuid) -> Result<Option<BusinessConcept>>;

    /// Record a duplicate link and update the target concept's stats in one
    /// serialized step.
    async fn link_duplicate(&self, link: &DuplicateLink) -> Result<()>;

    async fn record_enrichment(&self, record: &EnrichmentRecord) -> Result<()>;

    async fn enrichment_for(
        &self,
        submission_id: Uuid,
        stage: &str,
    ) -> Result<Option<EnrichmentRecord>>;

    /// Fold a stage score into the concept's per-stage state through the
    /// store's serialized update path. Returns the updated state.
    async fn update_stage_state(
        &self,
        concept_id: Uuid,
        stage: &str,
        score: f64,
    ) -> Result<StageState>;

    /// Submissions with no concept assignment, ascending by insertion
    /// sequence, strictly after `after_sequence`.
    async fn unlinked_submissions(
        &self,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Submission>>;

    async fn mark_for_reprocessing(&self, submission_id: Uuid) -> Result<()>;
}

#[async_trait]
impl ConceptStore for ConceptWriter {
    async fn existing_classification(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Classification>> {
        ConceptWriter::existing_classification(self, submission_id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Uuid>> {
        ConceptWriter::find_by_fingerprint(self, fingerprint).await
    }

    async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
        max_results: usize,
    ) -> Result<Vec<ConceptMatch>> {
        ConceptWriter::find_similar(self, embedding, threshold, max_results).await
    }

    async fn create_concept(&self, concept: &BusinessConcept) -> Result<CreateOutcome> {
        ConceptWriter::create_concept(self, concept).await
    }

    async fn get_concept(&self, id: Uuid) -> Result<Option<BusinessConcept>> {
        ConceptWriter::get_concept(self, id).await
    }

    async fn link_duplicate(&self, link: &DuplicateLink) -> Result<()> {
        ConceptWriter::link_duplicate(self, link).await
    }

    async fn record_enrichment(&self, record: &EnrichmentRecord) -> Result<()> {
        ConceptWriter::record_enrichment(self, record).await
    }

    async fn enrichment_for(
        &self,
        submission_id: Uuid,
        stage: &str,
    ) -> Result<Option<EnrichmentRecord>> {
        ConceptWriter::enrichment_for(self, submission_id, stage).await
    }

    async fn update_stage_state(
        &self,
        concept_id: Uuid,
        stage: &str,
        score: f64,
    ) -> Result<StageState> {
        ConceptWriter::update_stage_state(self, concept_id, stage, score).await
    }

    async fn unlinked_submissions(
        &self,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Submission>> {
        ConceptWriter::unlinked_submissions(self, after_sequence, limit).await
    }

    async fn mark_for_reprocessing(&self, submission_id: Uuid) -> Result<()> {
        ConceptWriter::mark_for_reprocessing(self, submission_id).await
    }
}
