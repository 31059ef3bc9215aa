pub mod client;
pub mod migrate;
pub mod writer;

pub use client::GraphClient;
pub use writer::{ConceptWriter, CreateOutcome};
