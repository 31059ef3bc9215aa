pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

pub use config::Config;
pub use error::IdeamineError;
pub use normalize::{default_normalization_rules, fingerprint, normalize};
pub use types::*;
