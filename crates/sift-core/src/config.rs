use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SiftError};
use crate::types::{DistanceMetric, IndexKind, InvalidRecordPolicy};

/// Top-level configuration for sift.
///
/// Loaded from `~/.sift/config.toml` by default. Build-time and query-time
/// settings share one file so that the index parameters used to open an
/// index are the ones it was built with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiftConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl SiftConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SiftConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values no build or query could work with.
    pub fn validate(&self) -> Result<()> {
        if self.search.k == 0 {
            return Err(SiftError::Config("search.k must be at least 1".to_string()));
        }
        if self.search.max_k < self.search.k {
            return Err(SiftError::Config(format!(
                "search.max_k ({}) must not be below search.k ({})",
                self.search.max_k, self.search.k
            )));
        }
        if !(self.search.distance_threshold > 0.0) {
            return Err(SiftError::Config(
                "search.distance_threshold must be positive".to_string(),
            ));
        }
        if self.build.batch_size == 0 {
            return Err(SiftError::Config(
                "build.batch_size must be at least 1".to_string(),
            ));
        }
        if self.index.index_file == self.index.metadata_file {
            return Err(SiftError::Config(
                "index.index_file and index.metadata_file must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Data directory with a leading `~/` expanded to the home directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

/// Expand `~/` (or `~\`) to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the index, metadata and manifest files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for `sift serve`.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.sift/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name, recorded in the index manifest and checked at startup.
    pub model_name: String,
    /// Directory with `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Expected embedding dimension.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_dir: "~/.sift/models/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
        }
    }
}

/// Nearest-neighbor index parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,
    pub metric: DistanceMetric,
    /// HNSW graph connectivity (edges per node).
    pub connectivity: usize,
    /// HNSW candidate list size while inserting.
    pub expansion_add: usize,
    /// HNSW candidate list size while searching.
    pub expansion_search: usize,
    /// Index file name inside the data directory.
    pub index_file: String,
    /// Metadata file name inside the data directory.
    pub metadata_file: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Hnsw,
            metric: DistanceMetric::L2sq,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            index_file: "usearch_index.bin".to_string(),
            metadata_file: "metadata.json".to_string(),
        }
    }
}

/// Query-time configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of nearest neighbors to fetch.
    pub k: usize,
    /// Upper bound on a caller-supplied `k`.
    pub max_k: usize,
    /// Candidates at or beyond this distance are discarded. Tied to the
    /// metric and the embedding model.
    pub distance_threshold: f32,
    /// Per-query time budget in milliseconds; 0 disables it.
    pub timeout_ms: u64,
    /// Nearest-neighbor searches allowed in flight at once; 0 means one per
    /// available CPU.
    pub max_concurrency: usize,
}

impl SearchConfig {
    /// `max_concurrency` with 0 resolved to the available parallelism.
    pub fn concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k: 5,
            max_k: 50,
            distance_threshold: 1.1,
            timeout_ms: 10_000,
            max_concurrency: 0,
        }
    }
}

/// Index build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Number of documents embedded per batch.
    pub batch_size: usize,
    /// Policy for corpus records missing a required field.
    pub on_invalid_record: InvalidRecordPolicy,
    /// Store each embedding inside its metadata record.
    pub store_vectors: bool,
    /// Also write a flat text dump of all embeddings.
    pub dump_embeddings: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            on_invalid_record: InvalidRecordPolicy::Fail,
            store_vectors: true,
            dump_embeddings: false,
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Directory for `invocation_reasons.yaml`; empty disables the log.
    pub invocation_log_dir: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            invocation_log_dir: "~/.sift/logs".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SiftConfig::default();
        assert_eq!(config.general.data_dir, "~/.sift/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.embedding.model_name, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.index.kind, IndexKind::Hnsw);
        assert_eq!(config.index.metric, DistanceMetric::L2sq);
        assert_eq!(config.index.connectivity, 16);
        assert_eq!(config.index.expansion_add, 128);
        assert_eq!(config.index.expansion_search, 64);
        assert_eq!(config.search.k, 5);
        assert!((config.search.distance_threshold - 1.1).abs() < f32::EPSILON);
        assert_eq!(config.build.on_invalid_record, InvalidRecordPolicy::Fail);
        assert!(config.build.store_vectors);
        assert_eq!(config.search.max_concurrency, 0);
        assert!(config.search.concurrency() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/srv/sift"
log_level = "debug"
port = 8080

[index]
kind = "flat"
metric = "cosine"

[search]
k = 10
max_k = 20
distance_threshold = 0.4
max_concurrency = 3

[build]
batch_size = 16
on_invalid_record = "skip"
dump_embeddings = true
"#;
        let file = create_temp_config(content);
        let config = SiftConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/srv/sift");
        assert_eq!(config.general.port, 8080);
        assert_eq!(config.index.kind, IndexKind::Flat);
        assert_eq!(config.index.metric, DistanceMetric::Cosine);
        // Unset index fields keep their defaults.
        assert_eq!(config.index.connectivity, 16);
        assert_eq!(config.search.k, 10);
        assert!((config.search.distance_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.search.concurrency(), 3);
        assert_eq!(config.build.batch_size, 16);
        assert_eq!(config.build.on_invalid_record, InvalidRecordPolicy::Skip);
        assert!(config.build.dump_embeddings);
        assert_eq!(config.data_dir(), PathBuf::from("/srv/sift"));
        assert_eq!(config.index.metadata_file, "metadata.json");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = create_temp_config("[search]\nk = 0\n");
        assert!(matches!(
            SiftConfig::load(file.path()),
            Err(SiftError::Config(_))
        ));

        let file = create_temp_config("[search]\nk = 10\nmax_k = 5\n");
        assert!(SiftConfig::load(file.path()).is_err());

        let file = create_temp_config("[search]\ndistance_threshold = -1.0\n");
        assert!(SiftConfig::load(file.path()).is_err());

        let file = create_temp_config("[build]\nbatch_size = 0\n");
        assert!(SiftConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_unknown_metric_fails() {
        let file = create_temp_config("[index]\nmetric = \"hamming\"\n");
        assert!(SiftConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(SiftConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = SiftConfig::load(file.path()).unwrap();
        assert_eq!(config.search.k, 5);
        assert_eq!(config.index.index_file, "usearch_index.bin");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        let expanded = expand_home("~/data");
        assert!(expanded.ends_with("data"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
