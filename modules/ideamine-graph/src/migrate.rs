//! Schema migrations: uniqueness constraints, lookup indexes, and the
//! concept embedding vector index. Safe to run on every startup — statements
//! that already exist are skipped.

use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Embedding dimension for the concept vector index (voyage-3-large).
pub const EMBEDDING_DIM: usize = 1024;

pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    // --- Uniqueness constraints ---
    // Concept.fingerprint uniqueness is what makes concurrent creation of
    // the same concept resolve to exactly one row.
    let constraints = [
        "CREATE CONSTRAINT ON (c:Concept) ASSERT c.id IS UNIQUE",
        "CREATE CONSTRAINT ON (c:Concept) ASSERT c.fingerprint IS UNIQUE",
        "CREATE CONSTRAINT ON (s:Submission) ASSERT s.id IS UNIQUE",
    ];
    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Uniqueness constraints created");

    // --- Lookup indexes ---
    let indexes = [
        "CREATE INDEX ON :Submission(insertion_sequence)",
        "CREATE INDEX ON :Concept(first_seen_sequence)",
        "CREATE INDEX ON :Enrichment(stage)",
    ];
    for i in &indexes {
        run_ignoring_exists(g, i).await?;
    }
    info!("Lookup indexes created");

    // --- Vector index (incrementally updated on insert) ---
    let vector = format!(
        r#"CREATE VECTOR INDEX concept_embedding ON :Concept(embedding) WITH CONFIG {{"dimension": {EMBEDDING_DIM}, "capacity": 100000, "metric": "cos"}}"#
    );
    run_ignoring_exists(g, &vector).await?;
    info!("Vector index created");

    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
