//! Test mocks for the dedup/enrichment pipeline.
//!
//! Three mocks matching the three trait boundaries:
//! - MockConceptStore (ConceptStore) — stateful in-memory registry with the
//!   same uniqueness and serialization semantics as the graph store
//! - FixedEmbedder / FailingEmbedder (TextEmbedder) — deterministic vectors
//! - ScriptedStage (EnrichmentStage) — fixed outcome, call counting
//!
//! Plus helpers for constructing submissions and vectors at a chosen cosine
//! similarity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use ideamine_common::types::{
    BusinessConcept, Classification, ConceptMatch, DuplicateLink, EnrichmentRecord, StageState,
    Submission,
};
use ideamine_graph::CreateOutcome;

use crate::cache::cosine_similarity;
use crate::embedder::TextEmbedder;
use crate::stages::{EnrichmentStage, StageOutcome};
use crate::traits::ConceptStore;

/// Embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 4;

// ---------------------------------------------------------------------------
// MockConceptStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    concepts: HashMap<Uuid, BusinessConcept>,
    links: Vec<DuplicateLink>,
    records: Vec<EnrichmentRecord>,
    submissions: Vec<Submission>,
    reprocess: HashSet<Uuid>,
    /// While > 0, every lookup fails and decrements. Exercises the retry /
    /// unknown-classification paths.
    lookup_failures_remaining: u32,
}

/// Stateful in-memory concept store. Fingerprint uniqueness and serialized
/// concept mutation behave like the graph store, so classifier and
/// coordinator tests exercise the real contract.
#[derive(Default)]
pub struct MockConceptStore {
    state: Mutex<StoreState>,
}

impl MockConceptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submission(self, submission: Submission) -> Self {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .submissions
            .push(submission);
        self
    }

    /// Every lookup call fails until `n` failures have been consumed.
    pub fn fail_next_lookups(&self, n: u32) {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .lookup_failures_remaining = n;
    }

    // --- inspection helpers ---

    pub fn concept_count(&self) -> usize {
        self.state.lock().expect("mock store lock poisoned").concepts.len()
    }

    pub fn concept(&self, id: Uuid) -> Option<BusinessConcept> {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .concepts
            .get(&id)
            .cloned()
    }

    pub fn concept_by_fingerprint(&self, fingerprint: &str) -> Option<BusinessConcept> {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .concepts
            .values()
            .find(|c| c.fingerprint == fingerprint)
            .cloned()
    }

    pub fn link_count(&self, concept_id: Uuid) -> usize {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .links
            .iter()
            .filter(|l| l.concept_id == concept_id)
            .count()
    }

    pub fn records_for(&self, submission_id: Uuid) -> Vec<EnrichmentRecord> {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .records
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect()
    }

    pub fn reprocess_flagged(&self, submission_id: Uuid) -> bool {
        self.state
            .lock()
            .expect("mock store lock poisoned")
            .reprocess
            .contains(&submission_id)
    }

    fn check_lookup_failure(state: &mut StoreState, operation: &str) -> Result<()> {
        if state.lookup_failures_remaining > 0 {
            state.lookup_failures_remaining -= 1;
            return Err(anyhow!("MockConceptStore: injected {operation} failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ConceptStore for MockConceptStore {
    async fn existing_classification(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Classification>> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        Self::check_lookup_failure(&mut state, "existing_classification")?;
        if let Some(link) = state.links.iter().find(|l| l.submission_id == submission_id) {
            return Ok(Some(Classification::Linked {
                concept_id: link.concept_id,
                method: link.method,
                similarity: link.similarity,
            }));
        }
        if let Some(concept) = state
            .concepts
            .values()
            .find(|c| c.primary_submission_id == submission_id)
        {
            return Ok(Some(Classification::Created {
                concept_id: concept.id,
            }));
        }
        Ok(None)
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Uuid>> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        Self::check_lookup_failure(&mut state, "find_by_fingerprint")?;
        Ok(state
            .concepts
            .values()
            .find(|c| c.fingerprint == fingerprint)
            .map(|c| c.id))
    }

    async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
        max_results: usize,
    ) -> Result<Vec<ConceptMatch>> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        Self::check_lookup_failure(&mut state, "find_similar")?;
        let mut matches: Vec<ConceptMatch> = state
            .concepts
            .values()
            .filter_map(|c| {
                let concept_embedding = c.embedding.as_ref()?;
                let similarity = cosine_similarity(embedding, concept_embedding);
                (similarity >= threshold).then(|| ConceptMatch {
                    concept_id: c.id,
                    similarity,
                    first_seen_sequence: c.first_seen_sequence,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }

    async fn create_concept(&self, concept: &BusinessConcept) -> Result<CreateOutcome> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        if let Some(winner) = state
            .concepts
            .values()
            .find(|c| c.fingerprint == concept.fingerprint)
        {
            return Ok(CreateOutcome::Exists(winner.id));
        }
        state.concepts.insert(concept.id, concept.clone());
        Ok(CreateOutcome::Created)
    }

    async fn get_concept(&self, id: Uuid) -> Result<Option<BusinessConcept>> {
        let state = self.state.lock().expect("mock store lock poisoned");
        Ok(state.concepts.get(&id).cloned())
    }

    async fn link_duplicate(&self, link: &DuplicateLink) -> Result<()> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        let concept = state
            .concepts
            .get_mut(&link.concept_id)
            .ok_or_else(|| anyhow!("MockConceptStore: no concept {}", link.concept_id))?;
        concept.submission_count += 1;
        concept.last_updated_at = link.linked_at;
        concept.version += 1;
        state.links.push(link.clone());
        Ok(())
    }

    async fn record_enrichment(&self, record: &EnrichmentRecord) -> Result<()> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        state.records.push(record.clone());
        Ok(())
    }

    async fn enrichment_for(
        &self,
        submission_id: Uuid,
        stage: &str,
    ) -> Result<Option<EnrichmentRecord>> {
        let state = self.state.lock().expect("mock store lock poisoned");
        Ok(state
            .records
            .iter()
            .find(|r| r.submission_id == submission_id && r.stage == stage)
            .cloned())
    }

    async fn update_stage_state(
        &self,
        concept_id: Uuid,
        stage: &str,
        score: f64,
    ) -> Result<StageState> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        let concept = state
            .concepts
            .get_mut(&concept_id)
            .ok_or_else(|| anyhow!("MockConceptStore: no concept {concept_id}"))?;
        let entry = concept.stage_state.entry(stage.to_string()).or_default();
        entry.absorb(score);
        let updated = entry.clone();
        concept.last_updated_at = Utc::now();
        concept.version += 1;
        Ok(updated)
    }

    async fn unlinked_submissions(
        &self,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Submission>> {
        let state = self.state.lock().expect("mock store lock poisoned");
        let linked: HashSet<Uuid> = state.links.iter().map(|l| l.submission_id).collect();
        let primaries: HashSet<Uuid> = state
            .concepts
            .values()
            .map(|c| c.primary_submission_id)
            .collect();
        let mut out: Vec<Submission> = state
            .submissions
            .iter()
            .filter(|s| {
                s.insertion_sequence > after_sequence
                    && !linked.contains(&s.id)
                    && !primaries.contains(&s.id)
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.insertion_sequence);
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_for_reprocessing(&self, submission_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("mock store lock poisoned");
        state.reprocess.insert(submission_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Embedders
// ---------------------------------------------------------------------------

/// Deterministic embedder: registered texts return their registered vector,
/// anything else gets a stable pseudo-vector derived from the text bytes.
pub struct FixedEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
        }
    }

    /// Register the vector returned for `text`. The classifier embeds
    /// normalized text, so register against the normalized form.
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors
            .lock()
            .expect("embedder lock poisoned")
            .insert(text.to_string(), vector);
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self
            .vectors
            .lock()
            .expect("embedder lock poisoned")
            .get(text)
        {
            return v.clone();
        }
        // Stable fallback: spread the text bytes over the dimensions.
        let mut v = vec![0.0f32; TEST_EMBEDDING_DIM];
        for (i, b) in text.bytes().enumerate() {
            v[i % TEST_EMBEDDING_DIM] += b as f32;
        }
        crate::embedder::unit_normalize(v)
    }
}

impl Default for FixedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Embedder that always fails. Exercises degraded classification.
pub struct FailingEmbedder;

#[async_trait]
impl TextEmbedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("FailingEmbedder: embedding service unavailable"))
    }

    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("FailingEmbedder: embedding service unavailable"))
    }
}

// ---------------------------------------------------------------------------
// ScriptedStage
// ---------------------------------------------------------------------------

/// Enrichment stage with a fixed outcome and call counters.
pub struct ScriptedStage {
    id: String,
    score: f64,
    fail: bool,
    pub run_count: AtomicU32,
    pub copy_count: AtomicU32,
}

impl ScriptedStage {
    pub fn new(id: &str, score: f64) -> Self {
        Self {
            id: id.to_string(),
            score,
            fail: false,
            run_count: AtomicU32::new(0),
            copy_count: AtomicU32::new(0),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            score: 0.0,
            fail: true,
            run_count: AtomicU32::new(0),
            copy_count: AtomicU32::new(0),
        }
    }

    pub fn runs(&self) -> u32 {
        self.run_count.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> u32 {
        self.copy_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentStage for ScriptedStage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, submission: &Submission) -> Result<StageOutcome> {
        self.run_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("ScriptedStage {}: scripted failure", self.id));
        }
        Ok(StageOutcome {
            score: self.score,
            payload: json!({
                "stage": self.id,
                "submission": submission.id.to_string(),
                "score": self.score,
            }),
        })
    }

    fn copy(&self, primary: &EnrichmentRecord) -> Result<StageOutcome> {
        self.copy_count.fetch_add(1, Ordering::SeqCst);
        Ok(StageOutcome {
            score: primary.score,
            payload: primary.payload.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

pub fn submission(text: &str, sequence: i64) -> Submission {
    Submission {
        id: Uuid::new_v4(),
        concept_text: text.to_string(),
        source_reference: format!("record-{sequence}"),
        insertion_sequence: sequence,
    }
}

/// A unit vector along dimension `axis`.
pub fn axis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_EMBEDDING_DIM];
    v[axis % TEST_EMBEDDING_DIM] = 1.0;
    v
}

/// A unit vector whose cosine similarity to unit vector `base` is exactly
/// `cosine`, built in the plane spanned by `base` and an orthogonal axis.
pub fn vector_at_cosine(base: &[f32], cosine: f32) -> Vec<f32> {
    // Pick an axis not parallel to base, then Gram-Schmidt.
    let mut other = vec![0.0f32; base.len()];
    let dominant = base
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    other[(dominant + 1) % base.len()] = 1.0;

    let dot: f32 = base.iter().zip(&other).map(|(a, b)| a * b).sum();
    let mut ortho: Vec<f32> = base
        .iter()
        .zip(&other)
        .map(|(b, o)| o - dot * b)
        .collect();
    ortho = crate::embedder::unit_normalize(ortho);

    let sine = (1.0 - cosine * cosine).max(0.0).sqrt();
    base.iter()
        .zip(&ortho)
        .map(|(b, o)| cosine * b + sine * o)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_at_cosine_hits_requested_similarity() {
        let base = axis_vector(0);
        let v = vector_at_cosine(&base, 0.88);
        let sim = cosine_similarity(&base, &v);
        assert!((sim - 0.88).abs() < 1e-5, "got {sim}");
    }

    #[test]
    fn fallback_vectors_are_deterministic() {
        let embedder = FixedEmbedder::new();
        assert_eq!(embedder.vector_for("abc"), embedder.vector_for("abc"));
    }
}
