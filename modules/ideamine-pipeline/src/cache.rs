//! In-memory advisory indexes for cross-submission dedup within a run.
//!
//! These catch duplicates among submissions classified in the current run
//! that the store's indexes may not surface yet. The store stays
//! authoritative: on any disagreement the store's answer wins, and the
//! uniqueness constraint resolves whatever both layers miss.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use ideamine_common::types::ConceptMatch;

/// Fingerprint → concept id for concepts touched this run.
pub(crate) struct FingerprintCache {
    entries: RwLock<HashMap<String, Uuid>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Uuid> {
        self.entries
            .read()
            .expect("fingerprint cache lock poisoned")
            .get(fingerprint)
            .copied()
    }

    pub fn insert(&self, fingerprint: String, concept_id: Uuid) {
        self.entries
            .write()
            .expect("fingerprint cache lock poisoned")
            .insert(fingerprint, concept_id);
    }
}

/// Brute-force cosine scan over embeddings of concepts created this run.
/// Conformance-equivalent to the store's vector index at in-run scale.
pub(crate) struct EmbeddingCache {
    entries: RwLock<Vec<CacheEntry>>,
}

struct CacheEntry {
    embedding: Vec<f32>,
    concept_id: Uuid,
    first_seen_sequence: i64,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// All matches at or above threshold, unranked — ranking happens once,
    /// in `best_match`, after merging with store hits.
    pub fn search(&self, embedding: &[f32], threshold: f64) -> Vec<ConceptMatch> {
        let entries = self.entries.read().expect("embed cache lock poisoned");
        entries
            .iter()
            .filter_map(|entry| {
                let sim = cosine_similarity(embedding, &entry.embedding);
                (sim >= threshold).then(|| ConceptMatch {
                    concept_id: entry.concept_id,
                    similarity: sim,
                    first_seen_sequence: entry.first_seen_sequence,
                })
            })
            .collect()
    }

    pub fn add(&self, embedding: Vec<f32>, concept_id: Uuid, first_seen_sequence: i64) {
        self.entries
            .write()
            .expect("embed cache lock poisoned")
            .push(CacheEntry {
                embedding,
                concept_id,
                first_seen_sequence,
            });
    }
}

/// Pick the winning semantic match: highest similarity first, exact ties
/// resolve to the earliest first-seen sequence. Duplicate concept ids
/// (cache and store both reporting a hit) collapse to one entry.
pub(crate) fn best_match(mut matches: Vec<ConceptMatch>) -> Option<ConceptMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then(a.first_seen_sequence.cmp(&b.first_seen_sequence))
    });
    matches.into_iter().next()
}

/// Cosine similarity for f32 embedding vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}
