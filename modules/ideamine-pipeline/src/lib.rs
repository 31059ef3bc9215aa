pub mod backfill;
pub mod cache;
pub mod classifier;
pub mod coordinator;
pub mod embedder;
pub mod stages;
pub mod testing;
pub mod traits;

#[cfg(test)]
mod classifier_tests;

pub use backfill::BackfillDriver;
pub use classifier::{ClassifiedSubmission, ClassifierConfig, DuplicateClassifier};
pub use coordinator::{EnrichmentCoordinator, StageDisposition};
pub use embedder::{TextEmbedder, VoyageEmbedder};
pub use stages::{EnrichmentStage, StageOutcome};
pub use traits::ConceptStore;
