//! Sift vector crate - corpus loading, embeddings, nearest-neighbor indexes,
//! index building and the query engine.
//!
//! The builder embeds a YAML corpus and publishes an index plus a positional
//! metadata store; the query engine loads that pair once and answers
//! free-text queries with thresholded, URL-deduplicated results.

pub mod builder;
pub mod corpus;
pub mod embedding;
pub mod index;
pub mod search;
pub mod store;

pub use builder::{BuildReport, IndexBuilder};
pub use corpus::{load_corpus, Corpus};
pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{Matches, NearestNeighborIndex, NO_MATCH_KEY};
pub use search::{QueryParams, SearchContext};
pub use store::{ArtifactPaths, IndexManifest};
