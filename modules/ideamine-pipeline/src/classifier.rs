//! Duplicate classification — the exact → semantic → create cascade.
//!
//! Each submission resolves to exactly one concept: an exact fingerprint
//! hit, the best semantic match at/above threshold, or a freshly created
//! concept with this submission as primary. Store lookups retry with
//! backoff; exhaustion yields `Classification::Unknown` rather than an
//! error, and embedding failures degrade to exact-only classification.
//! The pipeline is never aborted by a single submission.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use ideamine_common::normalize::{default_normalization_rules, fingerprint, normalize};
use ideamine_common::types::{
    BusinessConcept, Classification, ConceptMatch, DuplicateLink, MatchMethod, Submission,
};
use ideamine_graph::CreateOutcome;

use crate::cache::{best_match, EmbeddingCache, FingerprintCache};
use crate::embedder::TextEmbedder;
use crate::traits::ConceptStore;

const LOOKUP_MAX_ATTEMPTS: u32 = 3;
const LOOKUP_RETRY_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub similarity_threshold: f64,
    pub max_semantic_results: usize,
    /// Ordered substitution table applied during normalization.
    pub rules: Vec<(String, String)>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_semantic_results: 5,
            rules: default_normalization_rules(),
        }
    }
}

/// Terminal result of classifying one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSubmission {
    pub submission_id: Uuid,
    pub classification: Classification,
    /// Semantic search was unavailable; only the exact layer ran.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Verdict — pure decision function
// ---------------------------------------------------------------------------

/// The classification decision, separated from lookups so it can be tested
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    /// Fingerprint hit — similarity is 1.0 by definition.
    ExactDuplicate(Uuid),
    /// Best semantic match at/above threshold.
    SemanticDuplicate(ConceptMatch),
    NewConcept,
}

/// Decide a submission's fate from its lookup results. Exact matches win
/// outright. Semantic candidates are filtered to the threshold, then the
/// highest similarity wins with ties broken to the earliest first-seen
/// sequence.
pub(crate) fn classify_verdict(
    exact: Option<Uuid>,
    semantic: Vec<ConceptMatch>,
    threshold: f64,
) -> Verdict {
    if let Some(concept_id) = exact {
        return Verdict::ExactDuplicate(concept_id);
    }
    let above: Vec<ConceptMatch> = semantic
        .into_iter()
        .filter(|m| m.similarity >= threshold)
        .collect();
    match best_match(above) {
        Some(m) => Verdict::SemanticDuplicate(m),
        None => Verdict::NewConcept,
    }
}

// ---------------------------------------------------------------------------
// DuplicateClassifier
// ---------------------------------------------------------------------------

pub struct DuplicateClassifier {
    store: Arc<dyn ConceptStore>,
    embedder: Arc<dyn TextEmbedder>,
    config: ClassifierConfig,
    fingerprints: FingerprintCache,
    embeddings: EmbeddingCache,
}

impl DuplicateClassifier {
    pub fn new(
        store: Arc<dyn ConceptStore>,
        embedder: Arc<dyn TextEmbedder>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            fingerprints: FingerprintCache::new(),
            embeddings: EmbeddingCache::new(),
        }
    }

    /// Classify one submission. `Err` is reserved for store write failures;
    /// lookup and embedding problems resolve to `Unknown` / degraded
    /// outcomes per the recovery policy.
    pub async fn classify(&self, submission: &Submission) -> Result<ClassifiedSubmission> {
        // Re-classifying an already-linked submission returns its existing
        // concept unchanged.
        let existing = match retry_lookup("existing_classification", || {
            self.store.existing_classification(submission.id)
        })
        .await
        {
            Ok(v) => v,
            Err(e) => return Ok(self.unknown(submission, "classification lookup", &e).await),
        };
        if let Some(classification) = existing {
            return Ok(ClassifiedSubmission {
                submission_id: submission.id,
                classification,
                degraded: false,
            });
        }

        let normalized = normalize(&submission.concept_text, &self.config.rules);
        let fp = fingerprint(&normalized);

        // Exact layer: advisory in-run cache first, then the store.
        let exact = match self.fingerprints.get(&fp) {
            Some(concept_id) => Some(concept_id),
            None => match retry_lookup("find_by_fingerprint", || {
                self.store.find_by_fingerprint(&fp)
            })
            .await
            {
                Ok(hit) => hit,
                Err(e) => return Ok(self.unknown(submission, "fingerprint lookup", &e).await),
            },
        };

        // Semantic layer only runs on an exact miss.
        let mut degraded = false;
        let mut embedding: Option<Vec<f32>> = None;
        let mut semantic: Vec<ConceptMatch> = Vec::new();
        if exact.is_none() {
            match self.embedder.embed(&normalized).await {
                Ok(vector) => {
                    semantic = self
                        .embeddings
                        .search(&vector, self.config.similarity_threshold);
                    let store_hits = match retry_lookup("find_similar", || {
                        self.store.find_similar(
                            &vector,
                            self.config.similarity_threshold,
                            self.config.max_semantic_results,
                        )
                    })
                    .await
                    {
                        Ok(hits) => hits,
                        Err(e) => {
                            return Ok(self.unknown(submission, "semantic lookup", &e).await)
                        }
                    };
                    semantic.extend(store_hits);
                    embedding = Some(vector);
                }
                Err(e) => {
                    warn!(
                        submission_id = %submission.id,
                        error = %e,
                        "Embedding unavailable, degrading to exact-only classification"
                    );
                    degraded = true;
                }
            }
        }

        let classification = match classify_verdict(exact, semantic, self.config.similarity_threshold)
        {
            Verdict::ExactDuplicate(concept_id) => {
                let classification = self
                    .link(submission, concept_id, MatchMethod::Exact, 1.0)
                    .await?;
                self.fingerprints.insert(fp, concept_id);
                classification
            }
            Verdict::SemanticDuplicate(m) => {
                self.link(submission, m.concept_id, MatchMethod::Semantic, m.similarity)
                    .await?
            }
            Verdict::NewConcept => self.establish(submission, fp, embedding).await?,
        };

        Ok(ClassifiedSubmission {
            submission_id: submission.id,
            classification,
            degraded,
        })
    }

    /// Create a new concept with this submission as primary. A fingerprint
    /// conflict means a concurrent submission won the race — link against
    /// the winner instead.
    async fn establish(
        &self,
        submission: &Submission,
        fp: String,
        embedding: Option<Vec<f32>>,
    ) -> Result<Classification> {
        let concept = BusinessConcept::establish(submission, fp.clone(), embedding.clone());
        match self.store.create_concept(&concept).await? {
            CreateOutcome::Created => {
                info!(
                    concept_id = %concept.id,
                    submission_id = %submission.id,
                    sequence = submission.insertion_sequence,
                    "New concept established"
                );
                self.fingerprints.insert(fp, concept.id);
                if let Some(vector) = embedding {
                    self.embeddings
                        .add(vector, concept.id, concept.first_seen_sequence);
                }
                Ok(Classification::Created {
                    concept_id: concept.id,
                })
            }
            CreateOutcome::Exists(winner) => {
                info!(
                    winner = %winner,
                    submission_id = %submission.id,
                    "Lost concept creation race, linking as duplicate"
                );
                let classification = self
                    .link(submission, winner, MatchMethod::Exact, 1.0)
                    .await?;
                self.fingerprints.insert(fp, winner);
                Ok(classification)
            }
        }
    }

    async fn link(
        &self,
        submission: &Submission,
        concept_id: Uuid,
        method: MatchMethod,
        similarity: f64,
    ) -> Result<Classification> {
        let primary = self
            .store
            .get_concept(concept_id)
            .await?
            .ok_or_else(|| anyhow!("concept {concept_id} vanished during linking"))?
            .primary_submission_id;

        let link = DuplicateLink {
            submission_id: submission.id,
            concept_id,
            duplicate_of: primary,
            similarity,
            method,
            linked_at: Utc::now(),
        };
        self.store.link_duplicate(&link).await?;
        info!(
            submission_id = %submission.id,
            concept_id = %concept_id,
            method = %method,
            similarity,
            "Duplicate submission linked"
        );
        Ok(Classification::Linked {
            concept_id,
            method,
            similarity,
        })
    }

    /// Lookup retries exhausted: flag for reprocessing and classify as
    /// unknown so all stages run fresh downstream.
    async fn unknown(
        &self,
        submission: &Submission,
        operation: &str,
        error: &anyhow::Error,
    ) -> ClassifiedSubmission {
        warn!(
            submission_id = %submission.id,
            operation,
            error = %error,
            "Store lookups exhausted, classifying as unknown"
        );
        if let Err(e) = self.store.mark_for_reprocessing(submission.id).await {
            warn!(submission_id = %submission.id, error = %e, "Failed to flag for reprocessing");
        }
        ClassifiedSubmission {
            submission_id: submission.id,
            classification: Classification::Unknown {
                reason: format!("{operation}: {error}"),
            },
            degraded: false,
        }
    }
}

/// Bounded retry with exponential backoff and jitter for store lookups.
async fn retry_lookup<T, F, Fut>(operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = anyhow!("{operation}: no attempts made");
    for attempt in 0..LOOKUP_MAX_ATTEMPTS {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = e;
                if attempt + 1 < LOOKUP_MAX_ATTEMPTS {
                    let backoff = LOOKUP_RETRY_BASE * 2u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..50));
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %last_err,
                        "Store lookup failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
            }
        }
    }
    Err(last_err)
}
