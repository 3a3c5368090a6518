//! Drug-safety analytics over public datasets.
//!
//! Three pipelines share one toolkit: a word cloud over drug-label text, an
//! interaction-cluster tally over label interaction sections, and
//! adverse-event reports per 100k exposed for the top drugs by exposure.

pub mod api;
pub mod cache;
pub mod clusters;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod rates;
pub mod schema;
pub mod text;
pub mod tokenizer;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cache::{CachePolicy, TtlCache};
pub use clusters::{ClusterMatcher, ClusterResult};
pub use config::Config;
pub use document::RawDocument;
pub use engine::{AnalyticsEngine, ClusterReport, EngineSettings, SignalsReport, WordCloudReport};
pub use error::{AnalyticsError, Result};
pub use tokenizer::Tokenizer;
pub use upstream::{DataSource, HttpDataSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
