//! Core domain types shared by the store and pipeline crates.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw concept description harvested from one source record.
/// Immutable once created; `insertion_sequence` is a monotonic counter
/// assigned at harvest time, not wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub concept_text: String,
    /// External identifier of the source record (e.g. a post permalink).
    pub source_reference: String,
    pub insertion_sequence: i64,
}

/// How a submission was matched to an existing concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Semantic,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Exact => write!(f, "exact"),
            MatchMethod::Semantic => write!(f, "semantic"),
        }
    }
}

impl MatchMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(MatchMethod::Exact),
            "semantic" => Some(MatchMethod::Semantic),
            _ => None,
        }
    }
}

/// Per-stage enrichment state carried on a concept.
///
/// `result_count` counts fresh and copied results alike; `running_avg`
/// folds every result's numeric score via the running-average formula.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub complete: bool,
    pub result_count: u32,
    pub running_avg: f64,
}

impl StageState {
    /// Fold a new score into the running aggregate and mark the stage
    /// complete. `n` is the post-increment count.
    pub fn absorb(&mut self, score: f64) {
        self.result_count += 1;
        let n = self.result_count as f64;
        self.running_avg = ((self.running_avg * (n - 1.0)) + score) / n;
        self.complete = true;
    }
}

/// Canonical representation of one distinct business concept, deduplicated
/// across many submissions. Append-only: mutated on every duplicate link and
/// enrichment run, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConcept {
    pub id: Uuid,
    pub canonical_name: String,
    pub fingerprint: String,
    pub embedding: Option<Vec<f32>>,
    pub first_seen_sequence: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Total submissions resolved to this concept, primary included.
    pub submission_count: u32,
    /// The submission that established this concept. Immutable.
    pub primary_submission_id: Uuid,
    /// Per-stage flags and running aggregates, keyed by stage id.
    pub stage_state: HashMap<String, StageState>,
    /// Optimistic-concurrency field: guards read-modify-write updates of
    /// `stage_state`; bumped on every successful mutation.
    pub version: u32,
}

impl BusinessConcept {
    /// A fresh concept established by `submission`.
    pub fn establish(
        submission: &Submission,
        fingerprint: String,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            canonical_name: submission.concept_text.trim().to_string(),
            fingerprint,
            embedding,
            first_seen_sequence: submission.insertion_sequence,
            created_at: now,
            last_updated_at: now,
            submission_count: 1,
            primary_submission_id: submission.id,
            stage_state: HashMap::new(),
            version: 0,
        }
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageState> {
        self.stage_state.get(stage_id)
    }

    pub fn stage_complete(&self, stage_id: &str) -> bool {
        self.stage(stage_id).map(|s| s.complete).unwrap_or(false)
    }
}

/// Link from a duplicate submission to its canonical concept.
/// Only duplicates carry links — the primary submission is represented by
/// the concept row itself, so `submission_count == links + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateLink {
    pub submission_id: Uuid,
    pub concept_id: Uuid,
    /// The concept's primary submission at link time.
    pub duplicate_of: Uuid,
    pub similarity: f64,
    pub method: MatchMethod,
    pub linked_at: DateTime<Utc>,
}

/// One enrichment result for one (submission, stage) pair. `concept_id` is
/// absent for submissions that classified as unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub stage: String,
    pub submission_id: Uuid,
    pub concept_id: Option<Uuid>,
    pub score: f64,
    /// Structured stage output. Copied verbatim on skip-and-copy, never
    /// regenerated.
    pub payload: serde_json::Value,
    pub copied_from_primary: bool,
    pub source_reference: String,
    pub recorded_at: DateTime<Utc>,
}

/// A semantic search hit: concept, cosine similarity, and the concept's
/// first-seen sequence for tie-breaking.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptMatch {
    pub concept_id: Uuid,
    pub similarity: f64,
    pub first_seen_sequence: i64,
}

/// Terminal classification of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Linked as a duplicate of an existing concept.
    Linked {
        concept_id: Uuid,
        method: MatchMethod,
        similarity: f64,
    },
    /// Established a new concept (this submission is its primary).
    Created { concept_id: Uuid },
    /// Store lookups exhausted their retries — no concept assignment.
    /// The submission is flagged for reprocessing and all stages run fresh.
    Unknown { reason: String },
}

impl Classification {
    pub fn concept_id(&self) -> Option<Uuid> {
        match self {
            Classification::Linked { concept_id, .. } => Some(*concept_id),
            Classification::Created { concept_id } => Some(*concept_id),
            Classification::Unknown { .. } => None,
        }
    }
}

/// End-of-run counters. The only place failures surface to the operator.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: u64,
    pub unique_concepts_created: u64,
    pub duplicates_linked: u64,
    pub degraded: u64,
    pub unknown: u64,
    pub errors: u64,
    pub per_stage_fresh_runs: HashMap<String, u64>,
    pub per_stage_skip_counts: HashMap<String, u64>,
    pub per_stage_copy_failures: HashMap<String, u64>,
    pub per_stage_failures: HashMap<String, u64>,
}

impl RunSummary {
    pub fn absorb_classification(&mut self, classification: &Classification, degraded: bool) {
        self.total += 1;
        if degraded {
            self.degraded += 1;
        }
        match classification {
            Classification::Created { .. } => self.unique_concepts_created += 1,
            Classification::Linked { .. } => self.duplicates_linked += 1,
            Classification::Unknown { .. } => self.unknown += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(text: &str, seq: i64) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            concept_text: text.to_string(),
            source_reference: format!("record-{seq}"),
            insertion_sequence: seq,
        }
    }

    #[test]
    fn absorb_first_score_is_the_average() {
        let mut state = StageState::default();
        state.absorb(72.0);
        assert!(state.complete);
        assert_eq!(state.result_count, 1);
        assert!((state.running_avg - 72.0).abs() < f64::EPSILON);
    }

    #[test]
    fn absorb_same_score_keeps_average_flat() {
        let mut state = StageState::default();
        state.absorb(72.0);
        state.absorb(72.0);
        assert_eq!(state.result_count, 2);
        assert!((state.running_avg - 72.0).abs() < 1e-9);
    }

    #[test]
    fn absorb_running_average_formula() {
        let mut state = StageState::default();
        state.absorb(60.0);
        state.absorb(80.0);
        state.absorb(70.0);
        assert_eq!(state.result_count, 3);
        assert!((state.running_avg - 70.0).abs() < 1e-9);
    }

    #[test]
    fn establish_sets_primary_and_count() {
        let sub = submission("  Fitness tracking app  ", 7);
        let concept = BusinessConcept::establish(&sub, "abc".to_string(), None);
        assert_eq!(concept.primary_submission_id, sub.id);
        assert_eq!(concept.submission_count, 1);
        assert_eq!(concept.first_seen_sequence, 7);
        assert_eq!(concept.canonical_name, "Fitness tracking app");
        assert_eq!(concept.version, 0);
    }

    #[test]
    fn stage_complete_false_for_unknown_stage() {
        let sub = submission("x", 1);
        let concept = BusinessConcept::establish(&sub, "fp".to_string(), None);
        assert!(!concept.stage_complete("monetization"));
    }

    #[test]
    fn summary_absorbs_each_variant() {
        let mut summary = RunSummary::default();
        summary.absorb_classification(&Classification::Created { concept_id: Uuid::new_v4() }, false);
        summary.absorb_classification(
            &Classification::Linked {
                concept_id: Uuid::new_v4(),
                method: MatchMethod::Exact,
                similarity: 1.0,
            },
            false,
        );
        summary.absorb_classification(
            &Classification::Unknown { reason: "store unreachable".to_string() },
            true,
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.unique_concepts_created, 1);
        assert_eq!(summary.duplicates_linked, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.degraded, 1);
    }
}
