//! Classifier tests — MOCK → FUNCTION → OUTPUT.
//!
//! Build a mock store and embedder, classify submissions, assert the
//! classification and the store's resulting state.

use std::sync::Arc;

use uuid::Uuid;

use ideamine_common::normalize::{default_normalization_rules, fingerprint, normalize};
use ideamine_common::types::{Classification, ConceptMatch, MatchMethod};

use crate::classifier::{classify_verdict, ClassifierConfig, DuplicateClassifier, Verdict};
use crate::embedder::TextEmbedder;
use crate::testing::*;
use crate::traits::ConceptStore;

fn classifier(
    store: &Arc<MockConceptStore>,
    embedder: Arc<dyn TextEmbedder>,
) -> DuplicateClassifier {
    DuplicateClassifier::new(
        store.clone() as Arc<dyn ConceptStore>,
        embedder,
        ClassifierConfig::default(),
    )
}

fn normalized(text: &str) -> String {
    normalize(text, &default_normalization_rules())
}

// ---------------------------------------------------------------------------
// classify_verdict — pure decision function
// ---------------------------------------------------------------------------

fn m(concept_id: Uuid, similarity: f64, seq: i64) -> ConceptMatch {
    ConceptMatch {
        concept_id,
        similarity,
        first_seen_sequence: seq,
    }
}

#[test]
fn verdict_exact_wins_outright() {
    let exact = Uuid::new_v4();
    let other = Uuid::new_v4();
    let v = classify_verdict(Some(exact), vec![m(other, 0.99, 1)], 0.85);
    assert_eq!(v, Verdict::ExactDuplicate(exact));
}

#[test]
fn verdict_best_semantic_above_threshold() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let v = classify_verdict(None, vec![m(a, 0.88, 3), m(b, 0.93, 9)], 0.85);
    match v {
        Verdict::SemanticDuplicate(best) => {
            assert_eq!(best.concept_id, b);
            assert!((best.similarity - 0.93).abs() < 1e-9);
        }
        other => panic!("expected semantic duplicate, got {other:?}"),
    }
}

#[test]
fn verdict_at_threshold_is_a_match() {
    let a = Uuid::new_v4();
    let v = classify_verdict(None, vec![m(a, 0.85, 1)], 0.85);
    assert!(matches!(v, Verdict::SemanticDuplicate(_)));
}

#[test]
fn verdict_below_threshold_creates() {
    let a = Uuid::new_v4();
    let v = classify_verdict(None, vec![m(a, 0.8499, 1)], 0.85);
    assert_eq!(v, Verdict::NewConcept);
}

#[test]
fn verdict_tie_breaks_to_earliest_sequence() {
    let early = Uuid::new_v4();
    let late = Uuid::new_v4();
    let v = classify_verdict(None, vec![m(late, 0.91, 10), m(early, 0.91, 2)], 0.85);
    match v {
        Verdict::SemanticDuplicate(best) => assert_eq!(best.concept_id, early),
        other => panic!("expected semantic duplicate, got {other:?}"),
    }
}

#[test]
fn verdict_no_candidates_creates() {
    let v = classify_verdict(None, Vec::new(), 0.85);
    assert_eq!(v, Verdict::NewConcept);
}

// ---------------------------------------------------------------------------
// Exact layer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn case_only_variants_link_as_exact_duplicates() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let a = submission("Fitness tracking app for runners", 1);
    let b = submission("fitness tracking app for runners", 2);

    let first = classifier.classify(&a).await.unwrap();
    let concept_id = match first.classification {
        Classification::Created { concept_id } => concept_id,
        other => panic!("expected creation, got {other:?}"),
    };

    let second = classifier.classify(&b).await.unwrap();
    match second.classification {
        Classification::Linked {
            concept_id: linked,
            method,
            similarity,
        } => {
            assert_eq!(linked, concept_id);
            assert_eq!(method, MatchMethod::Exact);
            assert!((similarity - 1.0).abs() < f64::EPSILON);
        }
        other => panic!("expected link, got {other:?}"),
    }

    let concept = store.concept(concept_id).unwrap();
    assert_eq!(concept.submission_count, 2);
    assert_eq!(concept.primary_submission_id, a.id);
}

#[tokio::test]
async fn identical_normalized_text_resolves_to_one_concept() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let a = submission("App idea: dog walking app", 1);
    let b = submission("  dog walking APP  ", 2);
    assert_eq!(normalized(&a.concept_text), normalized(&b.concept_text));

    let first = classifier.classify(&a).await.unwrap();
    let second = classifier.classify(&b).await.unwrap();
    assert_eq!(
        first.classification.concept_id(),
        second.classification.concept_id()
    );
    assert_eq!(store.concept_count(), 1);
}

#[tokio::test]
async fn classification_is_idempotent() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let a = submission("Meal planning app", 1);
    let first = classifier.classify(&a).await.unwrap();
    let second = classifier.classify(&a).await.unwrap();

    assert_eq!(
        first.classification.concept_id(),
        second.classification.concept_id()
    );
    // No duplicate link was recorded for the primary re-classification.
    let concept_id = first.classification.concept_id().unwrap();
    assert_eq!(store.link_count(concept_id), 0);
    assert_eq!(store.concept(concept_id).unwrap().submission_count, 1);
}

// ---------------------------------------------------------------------------
// Semantic layer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn semantic_match_links_with_reported_similarity() {
    let base = axis_vector(0);
    let near = vector_at_cosine(&base, 0.88);
    let embedder = FixedEmbedder::new()
        .with_vector("fitness tracking app", base)
        .with_vector("workout monitoring app", near);

    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(embedder));

    let a = submission("Fitness tracking app", 1);
    let b = submission("Workout monitoring application", 2);

    let first = classifier.classify(&a).await.unwrap();
    let concept_id = first.classification.concept_id().unwrap();

    let second = classifier.classify(&b).await.unwrap();
    match second.classification {
        Classification::Linked {
            concept_id: linked,
            method,
            similarity,
        } => {
            assert_eq!(linked, concept_id);
            assert_eq!(method, MatchMethod::Semantic);
            assert!((similarity - 0.88).abs() < 1e-4, "similarity {similarity}");
        }
        other => panic!("expected semantic link, got {other:?}"),
    }
    assert_eq!(store.concept_count(), 1);
}

#[tokio::test]
async fn dissimilar_text_creates_distinct_concept() {
    let base = axis_vector(0);
    let far = vector_at_cosine(&base, 0.10);
    let embedder = FixedEmbedder::new()
        .with_vector("fitness tracking app", base)
        .with_vector("tax filing assistant", far);

    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(embedder));

    let a = submission("Fitness tracking app", 1);
    let b = submission("Tax filing assistant", 2);

    classifier.classify(&a).await.unwrap();
    let second = classifier.classify(&b).await.unwrap();
    assert!(matches!(second.classification, Classification::Created { .. }));
    assert_eq!(store.concept_count(), 2);
}

#[tokio::test]
async fn semantic_match_found_in_store_without_warm_cache() {
    // A fresh classifier has empty in-run caches; the store's vector search
    // must carry the match alone.
    let base = axis_vector(0);
    let near = vector_at_cosine(&base, 0.90);
    let store = Arc::new(MockConceptStore::new());

    let warmup = classifier(
        &store,
        Arc::new(FixedEmbedder::new().with_vector("fitness tracking app", base)),
    );
    let a = submission("Fitness tracking app", 1);
    let concept_id = warmup
        .classify(&a)
        .await
        .unwrap()
        .classification
        .concept_id()
        .unwrap();

    let cold = classifier(
        &store,
        Arc::new(FixedEmbedder::new().with_vector("workout monitoring app", near)),
    );
    let b = submission("Workout monitoring application", 2);
    let second = cold.classify(&b).await.unwrap();
    assert_eq!(second.classification.concept_id(), Some(concept_id));
}

// ---------------------------------------------------------------------------
// Degraded mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn embedding_failure_degrades_to_exact_only() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FailingEmbedder));

    let a = submission("Fitness tracking app", 1);
    let outcome = classifier.classify(&a).await.unwrap();
    assert!(outcome.degraded);
    assert!(matches!(outcome.classification, Classification::Created { .. }));

    // Exact matching still works while degraded.
    let b = submission("fitness tracking app", 2);
    let second = classifier.classify(&b).await.unwrap();
    assert!(matches!(second.classification, Classification::Linked { .. }));

    // The degraded concept carries no embedding.
    let concept_id = outcome.classification.concept_id().unwrap();
    assert!(store.concept(concept_id).unwrap().embedding.is_none());
}

// ---------------------------------------------------------------------------
// Lookup failure → unknown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lookup_exhaustion_classifies_as_unknown_and_flags_reprocessing() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let a = submission("Fitness tracking app", 1);
    store.fail_next_lookups(3);

    let outcome = classifier.classify(&a).await.unwrap();
    assert!(matches!(outcome.classification, Classification::Unknown { .. }));
    assert!(store.reprocess_flagged(a.id));
    assert_eq!(store.concept_count(), 0);
}

#[tokio::test]
async fn transient_lookup_failure_recovers_within_retries() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let a = submission("Fitness tracking app", 1);
    store.fail_next_lookups(2);

    let outcome = classifier.classify(&a).await.unwrap();
    assert!(matches!(outcome.classification, Classification::Created { .. }));
}

// ---------------------------------------------------------------------------
// Concurrent creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_identical_submissions_create_exactly_one_concept() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = Arc::new(classifier(&store, Arc::new(FixedEmbedder::new())));

    let a = submission("Neighborhood tool lending app", 1);
    let b = submission("Neighborhood tool lending app", 2);

    let (ra, rb) = tokio::join!(classifier.classify(&a), classifier.classify(&b));
    let ra = ra.unwrap();
    let rb = rb.unwrap();

    assert_eq!(store.concept_count(), 1);
    let created = [&ra.classification, &rb.classification]
        .iter()
        .filter(|c| matches!(c, Classification::Created { .. }))
        .count();
    assert_eq!(created, 1, "exactly one submission establishes the concept");
    assert_eq!(
        ra.classification.concept_id(),
        rb.classification.concept_id()
    );

    let concept_id = ra.classification.concept_id().unwrap();
    let concept = store.concept(concept_id).unwrap();
    assert_eq!(concept.submission_count, 2);
    assert_eq!(store.link_count(concept_id), 1);
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn link_count_plus_one_equals_submission_count() {
    let store = Arc::new(MockConceptStore::new());
    let classifier = classifier(&store, Arc::new(FixedEmbedder::new()));

    let texts = [
        "Fitness tracking app",
        "fitness tracking APP",
        "  Fitness tracking app  ",
        "Fitness tracking app",
    ];
    let mut concept_id = None;
    for (i, text) in texts.iter().enumerate() {
        let outcome = classifier
            .classify(&submission(text, i as i64 + 1))
            .await
            .unwrap();
        concept_id = outcome.classification.concept_id().or(concept_id);

        // Invariant holds at every point, not just at the end.
        let id = concept_id.unwrap();
        let concept = store.concept(id).unwrap();
        assert_eq!(store.link_count(id) as u32 + 1, concept.submission_count);
    }

    let fp = fingerprint(&normalized("Fitness tracking app"));
    assert_eq!(
        store.concept_by_fingerprint(&fp).unwrap().submission_count,
        4
    );
}
