use std::env;

use crate::error::IdeamineError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Embeddings
    pub voyage_api_key: String,

    // Dedup tunables
    pub similarity_threshold: f64,
    pub max_semantic_results: usize,

    // Enrichment
    pub stages: Vec<String>,

    // Backfill
    pub backfill_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            voyage_api_key: required_env("VOYAGE_API_KEY"),
            similarity_threshold: env_or("SIMILARITY_THRESHOLD", "0.85"),
            max_semantic_results: env_or("MAX_SEMANTIC_RESULTS", "5"),
            stages: env::var("ENRICHMENT_STAGES")
                .unwrap_or_else(|_| "scoring,profiling,monetization".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            backfill_batch_size: env_or("BACKFILL_BATCH_SIZE", "200"),
        }
    }

    /// Check tunables before wiring the pipeline.
    pub fn validate(&self) -> Result<(), IdeamineError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(IdeamineError::Validation(format!(
                "SIMILARITY_THRESHOLD must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.max_semantic_results == 0 {
            return Err(IdeamineError::Validation(
                "MAX_SEMANTIC_RESULTS must be at least 1".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(IdeamineError::Config(
                "ENRICHMENT_STAGES must list at least one stage id".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.as_str()) {
                return Err(IdeamineError::Config(format!(
                    "ENRICHMENT_STAGES lists {stage} more than once"
                )));
            }
        }
        Ok(())
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|e| panic!("{key} must parse: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "secret".to_string(),
            voyage_api_key: "key".to_string(),
            similarity_threshold: 0.85,
            max_semantic_results: 5,
            stages: vec!["scoring".to_string(), "monetization".to_string()],
            backfill_batch_size: 200,
        }
    }

    #[test]
    fn default_tunables_validate() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let mut c = config();
        c.similarity_threshold = 1.2;
        assert!(c.validate().is_err());
    }

    #[test]
    fn empty_stage_list_rejected() {
        let mut c = config();
        c.stages.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn duplicate_stage_ids_rejected() {
        let mut c = config();
        c.stages.push("scoring".to_string());
        assert!(c.validate().is_err());
    }
}
