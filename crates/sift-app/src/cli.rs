//! CLI argument definitions for the sift binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sift_core::config::SiftConfig;
use sift_core::types::{DistanceMetric, IndexKind, InvalidRecordPolicy};

/// Sift - semantic search over a documentation knowledge base.
#[derive(Parser, Debug)]
#[command(name = "sift", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the index and metadata files.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Use the deterministic mock embedder instead of the ONNX model.
    #[arg(long = "mock-embedder", global = true)]
    pub mock_embedder: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Embed a corpus of chunk_*.yaml files and publish an index.
    Build {
        /// Directory containing the chunk_*.yaml corpus files.
        #[arg(long = "corpus")]
        corpus: PathBuf,

        /// Index kind (hnsw, flat).
        #[arg(long = "kind")]
        kind: Option<IndexKind>,

        /// Distance metric (l2sq, cosine).
        #[arg(long = "metric")]
        metric: Option<DistanceMetric>,

        /// Skip malformed records instead of aborting the build.
        #[arg(long = "skip-invalid")]
        skip_invalid: bool,

        /// Also write an embeddings_<timestamp>.txt dump.
        #[arg(long = "dump-embeddings")]
        dump_embeddings: bool,
    },

    /// Serve the HTTP search API.
    Serve {
        /// API server port.
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },

    /// Run a single query and print the outcome as JSON.
    Query {
        /// Free-text query.
        text: String,

        /// Number of results to request.
        #[arg(short = 'k', long = "k")]
        k: Option<usize>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SIFT_CONFIG env var > ~/.sift/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SIFT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > SIFT_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Command::Serve { port: Some(p) } = self.command {
            return p;
        }
        if let Ok(val) = std::env::var("SIFT_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Resolve the log filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG (handled by the caller) > config.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Fold command-line overrides into `config`.
    pub fn apply_overrides(&self, config: &mut SiftConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        config.general.port = self.resolve_port(config.general.port);

        if let Command::Build {
            kind,
            metric,
            skip_invalid,
            dump_embeddings,
            ..
        } = &self.command
        {
            if let Some(kind) = kind {
                config.index.kind = *kind;
            }
            if let Some(metric) = metric {
                config.index.metric = *metric;
            }
            if *skip_invalid {
                config.build.on_invalid_record = InvalidRecordPolicy::Skip;
            }
            if *dump_embeddings {
                config.build.dump_embeddings = true;
            }
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".sift").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".sift").join("config.toml");
    }
    PathBuf::from("config.toml")
}
