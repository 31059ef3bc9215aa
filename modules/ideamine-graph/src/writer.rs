//! Read/write surface for the concept registry.
//!
//! Every mutation is a single Cypher statement, so a submission interrupted
//! mid-classification leaves either no trace or a complete link. The
//! `version` property on Concept is the optimistic-concurrency field:
//! read-modify-write updates (the stage-state map) are compare-and-set
//! against it, while pure counter increments run server-side in one
//! statement and bump it unconditionally.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::warn;
use uuid::Uuid;

use ideamine_common::types::{
    BusinessConcept, Classification, ConceptMatch, DuplicateLink, EnrichmentRecord, MatchMethod,
    StageState, Submission,
};
use ideamine_common::IdeamineError;

use crate::GraphClient;

/// CAS attempts for stage-state updates before giving up.
const STAGE_CAS_MAX_ATTEMPTS: u32 = 5;

/// Outcome of an attempted concept creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The fingerprint uniqueness constraint rejected the insert — a
    /// concurrent writer established the concept first.
    Exists(Uuid),
}

pub struct ConceptWriter {
    client: GraphClient,
}

impl ConceptWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Insert a submission if it isn't already present. Submissions are
    /// immutable, so an existing node is left untouched.
    pub async fn upsert_submission(&self, submission: &Submission) -> Result<()> {
        let q = query(
            "MERGE (s:Submission {id: $id})
             ON CREATE SET
                s.concept_text = $concept_text,
                s.source_reference = $source_reference,
                s.insertion_sequence = $insertion_sequence",
        )
        .param("id", submission.id.to_string())
        .param("concept_text", submission.concept_text.as_str())
        .param("source_reference", submission.source_reference.as_str())
        .param("insertion_sequence", submission.insertion_sequence);

        self.client.graph.run(q).await?;
        Ok(())
    }

    /// Exact-duplicate lookup behind the fingerprint uniqueness constraint.
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Uuid>> {
        let q = query("MATCH (c:Concept {fingerprint: $fp}) RETURN c.id AS id")
            .param("fp", fingerprint);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let id_str: String = row.get("id").unwrap_or_default();
            if let Ok(id) = Uuid::parse_str(&id_str) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Nearest-neighbor search over the concept vector index. Returns hits
    /// at or above `threshold`, similarity descending; final tie-breaking is
    /// the caller's concern.
    pub async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
        max_results: usize,
    ) -> Result<Vec<ConceptMatch>> {
        let q = query(&format!(
            "CALL db.index.vector.queryNodes('concept_embedding', {max_results}, $embedding)
             YIELD node, score AS similarity
             WHERE similarity >= $threshold
             RETURN node.id AS id, node.first_seen_sequence AS seq, similarity
             ORDER BY similarity DESC"
        ))
        .param("embedding", embedding_to_f64(embedding))
        .param("threshold", threshold);

        let mut matches = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let id_str: String = row.get("id").unwrap_or_default();
            let similarity: f64 = row.get("similarity").unwrap_or(0.0);
            let seq: i64 = row.get("seq").unwrap_or(i64::MAX);
            match Uuid::parse_str(&id_str) {
                Ok(concept_id) => matches.push(ConceptMatch {
                    concept_id,
                    similarity,
                    first_seen_sequence: seq,
                }),
                Err(_) => warn!(id = id_str.as_str(), "Skipping concept with unparseable id"),
            }
        }
        Ok(matches)
    }

    /// Create a concept row. The fingerprint uniqueness constraint makes
    /// this atomic under concurrency: the losing writer gets
    /// `CreateOutcome::Exists` with the winner's id and links as a duplicate
    /// instead.
    pub async fn create_concept(&self, concept: &BusinessConcept) -> Result<CreateOutcome> {
        let stage_state = serde_json::to_string(&concept.stage_state)
            .context("serializing stage state")?;

        let mut cypher = String::from(
            "CREATE (c:Concept {
                id: $id,
                canonical_name: $canonical_name,
                fingerprint: $fingerprint,
                first_seen_sequence: $first_seen_sequence,
                created_at: $created_at,
                last_updated_at: $last_updated_at,
                submission_count: 1,
                primary_submission_id: $primary_submission_id,
                stage_state: $stage_state,
                version: 0",
        );
        if concept.embedding.is_some() {
            cypher.push_str(",\n                embedding: $embedding");
        }
        cypher.push_str("\n            })");

        let mut q = query(&cypher)
            .param("id", concept.id.to_string())
            .param("canonical_name", concept.canonical_name.as_str())
            .param("fingerprint", concept.fingerprint.as_str())
            .param("first_seen_sequence", concept.first_seen_sequence)
            .param("created_at", concept.created_at.to_rfc3339())
            .param("last_updated_at", concept.last_updated_at.to_rfc3339())
            .param("primary_submission_id", concept.primary_submission_id.to_string())
            .param("stage_state", stage_state);
        if let Some(ref embedding) = concept.embedding {
            q = q.param("embedding", embedding_to_f64(embedding));
        }

        match self.client.graph.run(q).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) => {
                // A constraint violation means a concurrent writer won the
                // race for this fingerprint. Re-read to find the winner.
                match self.find_by_fingerprint(&concept.fingerprint).await? {
                    Some(winner) => Ok(CreateOutcome::Exists(winner)),
                    None => Err(e.into()),
                }
            }
        }
    }

    pub async fn get_concept(&self, id: Uuid) -> Result<Option<BusinessConcept>> {
        let q = query(
            "MATCH (c:Concept {id: $id})
             RETURN c.id AS id,
                    c.canonical_name AS canonical_name,
                    c.fingerprint AS fingerprint,
                    c.embedding AS embedding,
                    c.first_seen_sequence AS first_seen_sequence,
                    c.created_at AS created_at,
                    c.last_updated_at AS last_updated_at,
                    c.submission_count AS submission_count,
                    c.primary_submission_id AS primary_submission_id,
                    c.stage_state AS stage_state,
                    c.version AS version",
        )
        .param("id", id.to_string());

        let mut stream = self.client.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(Some(concept_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Record a duplicate link and update the target concept's running
    /// stats in one atomic statement.
    pub async fn link_duplicate(&self, link: &DuplicateLink) -> Result<()> {
        let q = query(
            "MATCH (s:Submission {id: $submission_id}), (c:Concept {id: $concept_id})
             CREATE (s)-[:DUPLICATE_OF {
                duplicate_of: $duplicate_of,
                similarity: $similarity,
                method: $method,
                linked_at: $linked_at
             }]->(c)
             SET c.submission_count = c.submission_count + 1,
                 c.last_updated_at = $linked_at,
                 c.version = c.version + 1",
        )
        .param("submission_id", link.submission_id.to_string())
        .param("concept_id", link.concept_id.to_string())
        .param("duplicate_of", link.duplicate_of.to_string())
        .param("similarity", link.similarity)
        .param("method", link.method.to_string())
        .param("linked_at", link.linked_at.to_rfc3339());

        self.client.graph.run(q).await?;
        Ok(())
    }

    pub async fn record_enrichment(&self, record: &EnrichmentRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload).context("serializing payload")?;
        let q = query(
            "MATCH (s:Submission {id: $submission_id})
             CREATE (s)-[:ENRICHED_WITH]->(e:Enrichment {
                stage: $stage,
                concept_id: $concept_id,
                score: $score,
                payload: $payload,
                copied_from_primary: $copied_from_primary,
                source_reference: $source_reference,
                recorded_at: $recorded_at
             })",
        )
        .param("submission_id", record.submission_id.to_string())
        .param("stage", record.stage.as_str())
        .param(
            "concept_id",
            record
                .concept_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
        )
        .param("score", record.score)
        .param("payload", payload)
        .param("copied_from_primary", record.copied_from_primary)
        .param("source_reference", record.source_reference.as_str())
        .param("recorded_at", record.recorded_at.to_rfc3339());

        self.client.graph.run(q).await?;
        Ok(())
    }

    /// The stage result previously recorded for a submission, if any.
    pub async fn enrichment_for(
        &self,
        submission_id: Uuid,
        stage: &str,
    ) -> Result<Option<EnrichmentRecord>> {
        let q = query(
            "MATCH (s:Submission {id: $submission_id})-[:ENRICHED_WITH]->(e:Enrichment {stage: $stage})
             RETURN e.stage AS stage,
                    e.concept_id AS concept_id,
                    e.score AS score,
                    e.payload AS payload,
                    e.copied_from_primary AS copied_from_primary,
                    e.source_reference AS source_reference,
                    e.recorded_at AS recorded_at
             LIMIT 1",
        )
        .param("submission_id", submission_id.to_string())
        .param("stage", stage);

        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Ok(None);
        };

        let concept_id_str: String = row.get("concept_id").unwrap_or_default();
        let payload_str: String = row.get("payload").unwrap_or_default();
        Ok(Some(EnrichmentRecord {
            stage: row.get("stage").unwrap_or_default(),
            submission_id,
            concept_id: Uuid::parse_str(&concept_id_str).ok(),
            score: row.get("score").unwrap_or(0.0),
            payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
            copied_from_primary: row.get("copied_from_primary").unwrap_or(false),
            source_reference: row.get("source_reference").unwrap_or_default(),
            recorded_at: parse_rfc3339(&row.get::<String>("recorded_at").unwrap_or_default()),
        }))
    }

    /// Fold a stage score into the concept's stage state through the
    /// compare-and-set path. Retries on version races with fresh reads.
    pub async fn update_stage_state(
        &self,
        concept_id: Uuid,
        stage: &str,
        score: f64,
    ) -> Result<StageState> {
        for _attempt in 0..STAGE_CAS_MAX_ATTEMPTS {
            let (mut state_map, version) = self.read_stage_state(concept_id).await?;
            let entry = state_map.entry(stage.to_string()).or_default();
            entry.absorb(score);
            let updated = entry.clone();

            let state_json =
                serde_json::to_string(&state_map).context("serializing stage state")?;
            let q = query(
                "MATCH (c:Concept {id: $id})
                 WHERE c.version = $expected
                 SET c.stage_state = $stage_state,
                     c.last_updated_at = $now,
                     c.version = c.version + 1
                 RETURN c.version AS version",
            )
            .param("id", concept_id.to_string())
            .param("expected", version)
            .param("stage_state", state_json)
            .param("now", Utc::now().to_rfc3339());

            let mut stream = self.client.graph.execute(q).await?;
            if stream.next().await?.is_some() {
                return Ok(updated);
            }
            // Version moved under us — another submission touched this
            // concept. Re-read and retry.
        }
        Err(IdeamineError::Store(format!(
            "stage state update for concept {concept_id} stage {stage} lost {STAGE_CAS_MAX_ATTEMPTS} version races"
        ))
        .into())
    }

    /// Reconstruct a prior classification for a submission, if one exists.
    pub async fn existing_classification(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Classification>> {
        let q = query(
            "MATCH (s:Submission {id: $id})-[l:DUPLICATE_OF]->(c:Concept)
             RETURN c.id AS concept_id, l.method AS method, l.similarity AS similarity
             LIMIT 1",
        )
        .param("id", submission_id.to_string());

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let concept_id_str: String = row.get("concept_id").unwrap_or_default();
            let method_str: String = row.get("method").unwrap_or_default();
            let similarity: f64 = row.get("similarity").unwrap_or(1.0);
            if let Ok(concept_id) = Uuid::parse_str(&concept_id_str) {
                return Ok(Some(Classification::Linked {
                    concept_id,
                    method: MatchMethod::parse(&method_str).unwrap_or(MatchMethod::Exact),
                    similarity,
                }));
            }
        }

        let q = query(
            "MATCH (c:Concept {primary_submission_id: $id}) RETURN c.id AS concept_id LIMIT 1",
        )
        .param("id", submission_id.to_string());

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let concept_id_str: String = row.get("concept_id").unwrap_or_default();
            if let Ok(concept_id) = Uuid::parse_str(&concept_id_str) {
                return Ok(Some(Classification::Created { concept_id }));
            }
        }

        Ok(None)
    }

    /// Page of submissions with no concept assignment, in ascending
    /// insertion-sequence order, starting strictly after `after_sequence`.
    pub async fn unlinked_submissions(
        &self,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Submission>> {
        let q = query(&format!(
            "MATCH (s:Submission)
             WHERE s.insertion_sequence > $after
               AND NOT (s)-[:DUPLICATE_OF]->(:Concept)
             OPTIONAL MATCH (c:Concept {{primary_submission_id: s.id}})
             WITH s, c
             WHERE c IS NULL
             RETURN s.id AS id,
                    s.concept_text AS concept_text,
                    s.source_reference AS source_reference,
                    s.insertion_sequence AS insertion_sequence
             ORDER BY s.insertion_sequence ASC
             LIMIT {limit}"
        ))
        .param("after", after_sequence);

        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let id_str: String = row.get("id").unwrap_or_default();
            match Uuid::parse_str(&id_str) {
                Ok(id) => out.push(Submission {
                    id,
                    concept_text: row.get("concept_text").unwrap_or_default(),
                    source_reference: row.get("source_reference").unwrap_or_default(),
                    insertion_sequence: row.get("insertion_sequence").unwrap_or(0),
                }),
                Err(_) => warn!(id = id_str.as_str(), "Skipping submission with unparseable id"),
            }
        }
        Ok(out)
    }

    /// Flag a submission whose classification was abandoned (store lookups
    /// exhausted). It stays unlinked, so the next backfill picks it up.
    pub async fn mark_for_reprocessing(&self, submission_id: Uuid) -> Result<()> {
        let q = query("MATCH (s:Submission {id: $id}) SET s.needs_reprocess = true")
            .param("id", submission_id.to_string());
        self.client.graph.run(q).await?;
        Ok(())
    }

    async fn read_stage_state(
        &self,
        concept_id: Uuid,
    ) -> Result<(HashMap<String, StageState>, i64)> {
        let q = query(
            "MATCH (c:Concept {id: $id})
             RETURN c.stage_state AS stage_state, c.version AS version",
        )
        .param("id", concept_id.to_string());

        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Err(anyhow!("concept {concept_id} not found"));
        };
        let state_json: String = row.get("stage_state").unwrap_or_default();
        let version: i64 = row.get("version").unwrap_or(0);
        let state_map = if state_json.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&state_json).context("parsing stage state")?
        };
        Ok((state_map, version))
    }
}

fn concept_from_row(row: &neo4rs::Row) -> Result<BusinessConcept> {
    let id_str: String = row.get("id").unwrap_or_default();
    let primary_str: String = row.get("primary_submission_id").unwrap_or_default();
    let state_json: String = row.get("stage_state").unwrap_or_default();
    let stage_state = if state_json.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&state_json).context("parsing stage state")?
    };
    let embedding: Option<Vec<f32>> = row
        .get::<Vec<f64>>("embedding")
        .ok()
        .map(|v| v.into_iter().map(|x| x as f32).collect());

    Ok(BusinessConcept {
        id: Uuid::parse_str(&id_str).context("parsing concept id")?,
        canonical_name: row.get("canonical_name").unwrap_or_default(),
        fingerprint: row.get("fingerprint").unwrap_or_default(),
        embedding,
        first_seen_sequence: row.get("first_seen_sequence").unwrap_or(0),
        created_at: parse_rfc3339(&row.get::<String>("created_at").unwrap_or_default()),
        last_updated_at: parse_rfc3339(&row.get::<String>("last_updated_at").unwrap_or_default()),
        submission_count: row.get::<i64>("submission_count").unwrap_or(1) as u32,
        primary_submission_id: Uuid::parse_str(&primary_str).unwrap_or_default(),
        stage_state,
        version: row.get::<i64>("version").unwrap_or(0) as u32,
    })
}

fn embedding_to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|&v| v as f64).collect()
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
