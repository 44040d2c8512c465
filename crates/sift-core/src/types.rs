use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SiftError;

// =============================================================================
// Enums
// =============================================================================

/// Distance metric used by a nearest-neighbor index.
///
/// The metric is recorded next to the index at build time; searching with a
/// different metric than the one used to build is meaningless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2sq,
    /// Cosine distance (`1 - cosine similarity`).
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2sq => "l2sq",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2sq" | "l2" => Ok(DistanceMetric::L2sq),
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            other => Err(SiftError::Config(format!(
                "Unknown distance metric '{}'. Must be one of: l2sq, cosine",
                other
            ))),
        }
    }
}

/// Nearest-neighbor index structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// HNSW proximity graph (approximate).
    #[default]
    Hnsw,
    /// Brute-force scan over all vectors (exact).
    Flat,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Hnsw => "hnsw",
            IndexKind::Flat => "flat",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hnsw" => Ok(IndexKind::Hnsw),
            "flat" => Ok(IndexKind::Flat),
            other => Err(SiftError::Config(format!(
                "Unknown index kind '{}'. Must be one of: hnsw, flat",
                other
            ))),
        }
    }
}

/// What the builder does with a corpus record that lacks a required field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRecordPolicy {
    /// Abort the whole build.
    #[default]
    Fail,
    /// Log the record and leave it out of both the index and the metadata.
    Skip,
}

// =============================================================================
// Records
// =============================================================================

/// A single corpus document, as read at build time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Identifier, unique within one build.
    pub uuid: String,
    /// Source URL. Several documents may share one.
    pub url: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    /// Provenance tag naming the corpus chunk the document came from.
    pub chunk_uuid: String,
}

/// One entry of the persisted metadata store.
///
/// `metadata[i]` describes the document inserted into the index under key
/// `i`. Fields are optional on read so that older metadata files (and files
/// with null URLs) still load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Fallback snippet source when `original_text` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub chunk_uuid: String,
    /// Copy of the embedding, kept for debugging and to recover the
    /// index dimensionality at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl MetadataRecord {
    /// Build the metadata entry for a document and its embedding.
    pub fn from_document(doc: &DocumentRecord, vector: Option<Vec<f32>>) -> Self {
        Self {
            uuid: doc.uuid.clone(),
            url: Some(doc.url.clone()),
            title: doc.title.clone(),
            original_text: Some(doc.content.clone()),
            content: None,
            keywords: doc.keywords.clone(),
            chunk_uuid: doc.chunk_uuid.clone(),
            vector,
        }
    }

    /// The URL used as the deduplication key; empty strings count as absent.
    pub fn dedup_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }

    /// Snippet text: `original_text`, else `content`, else empty.
    pub fn snippet(&self) -> &str {
        self.original_text
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or("")
    }
}

// =============================================================================
// Query results
// =============================================================================

/// A caller-visible search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: Option<String>,
    pub snippet: String,
    pub title: String,
    /// Raw distance under the index metric; lower is closer.
    pub distance: f32,
}

/// Outcome of a single query.
///
/// Distinguishes an empty match list from failures so that callers can tell
/// "nothing relevant" apart from "something went wrong".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Ranked, thresholded, deduplicated results. May be empty.
    Matches { results: Vec<SearchResult> },
    /// The query could not be answered (embedding failure, malformed index
    /// response, timeout).
    Degraded { reason: String },
    /// The index returned a key with no metadata entry.
    Inconsistent { key: u64, metadata_len: usize },
}

impl SearchOutcome {
    pub fn is_matches(&self) -> bool {
        matches!(self, SearchOutcome::Matches { .. })
    }

    /// Caller-facing list: the results for `Matches`, empty otherwise.
    pub fn into_results(self) -> Vec<SearchResult> {
        match self {
            SearchOutcome::Matches { results } => results,
            _ => Vec::new(),
        }
    }
}
