use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ideamine_common::Config;
use ideamine_graph::{migrate::migrate, ConceptWriter, GraphClient};
use ideamine_pipeline::{
    BackfillDriver, ClassifierConfig, ConceptStore, DuplicateClassifier, VoyageEmbedder,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ideamine=info".parse()?))
        .init();

    info!("Ideamine backfill starting...");

    // Load config
    let config = Config::from_env();
    config.validate()?;

    // Connect to the graph store and run migrations
    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    client.ping().await?;
    migrate(&client).await?;

    let store: Arc<dyn ConceptStore> = Arc::new(ConceptWriter::new(client));
    let embedder = Arc::new(VoyageEmbedder::new(&config.voyage_api_key));

    let classifier = Arc::new(DuplicateClassifier::new(
        store.clone(),
        embedder,
        ClassifierConfig {
            similarity_threshold: config.similarity_threshold,
            max_semantic_results: config.max_semantic_results,
            ..ClassifierConfig::default()
        },
    ));

    let driver = BackfillDriver::new(store, classifier, config.backfill_batch_size);
    let summary = driver.run().await?;

    info!(
        total = summary.total,
        unique = summary.unique_concepts_created,
        duplicates = summary.duplicates_linked,
        unknown = summary.unknown,
        degraded = summary.degraded,
        errors = summary.errors,
        "Backfill finished"
    );

    Ok(())
}
