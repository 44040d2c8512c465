//! Offline index builder.
//!
//! Turns a corpus directory into a published index + metadata pair:
//! 1. Load and validate the corpus
//! 2. Embed every document's content, in batches
//! 3. Insert vectors under keys `0..N` in corpus order
//! 4. Publish index, metadata, manifest (and optional embeddings dump)

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use sift_core::config::SiftConfig;
use sift_core::error::{Result, SiftError};
use sift_core::types::{DocumentRecord, MetadataRecord};

use crate::corpus::{load_corpus, SkippedRecord};
use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::{new_index, IndexParams};
use crate::store::{embeddings_dump_name, publish, ArtifactPaths, IndexManifest};

/// Summary of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub skipped: Vec<PathBuf>,
    pub dimensions: usize,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub manifest_path: PathBuf,
    pub embeddings_dump: Option<PathBuf>,
}

/// Builds and publishes an index from validated documents.
///
/// Uses dynamic dispatch for the embedder so the same builder serves the
/// ONNX model in production and `MockEmbedding` in tests.
pub struct IndexBuilder {
    config: SiftConfig,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl IndexBuilder {
    pub fn new(config: SiftConfig, embedder: impl EmbeddingService + 'static) -> Self {
        Self {
            config,
            embedder: Arc::new(embedder),
        }
    }

    pub fn new_dyn(config: SiftConfig, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    /// Load `corpus_dir` and build from its records.
    pub async fn build_from_dir(&self, corpus_dir: &Path) -> Result<BuildReport> {
        let corpus = load_corpus(corpus_dir, self.config.build.on_invalid_record)?;
        self.build_documents(corpus.documents, corpus.skipped).await
    }

    /// Build from documents that were loaded elsewhere.
    pub async fn build(&self, documents: Vec<DocumentRecord>) -> Result<BuildReport> {
        self.build_documents(documents, Vec::new()).await
    }

    async fn build_documents(
        &self,
        documents: Vec<DocumentRecord>,
        skipped: Vec<SkippedRecord>,
    ) -> Result<BuildReport> {
        if documents.is_empty() {
            return Err(SiftError::Corpus("No documents to index".to_string()));
        }
        let mut ids = HashSet::with_capacity(documents.len());
        for doc in &documents {
            if !ids.insert(doc.uuid.as_str()) {
                return Err(SiftError::Corpus(format!(
                    "Duplicate document id '{}'",
                    doc.uuid
                )));
            }
        }

        let vectors = self.embed_all(&documents).await?;
        let dimensions = self.embedder.dimensions();

        let store_vectors = self.config.build.store_vectors;
        let metadata: Vec<MetadataRecord> = documents
            .iter()
            .zip(vectors.iter())
            .map(|(doc, vector)| MetadataRecord::from_document(doc, store_vectors.then(|| vector.clone())))
            .collect();

        let params = IndexParams::from_config(&self.config.index, dimensions);
        let manifest = IndexManifest::new(params, self.embedder.model_name(), documents.len());
        let paths = ArtifactPaths::from_config(&self.config);
        let dump_path = self
            .config
            .build
            .dump_embeddings
            .then(|| self.config.data_dir().join(embeddings_dump_name(Utc::now())));

        // Graph construction and file IO are CPU/disk bound.
        let publish_dump = dump_path.clone();
        let live = tokio::task::spawn_blocking(move || -> Result<ArtifactPaths> {
            let mut index = new_index(&params)?;
            index.reserve(vectors.len())?;
            for (key, vector) in vectors.iter().enumerate() {
                index.add(key as u64, vector)?;
            }
            debug!(size = index.len(), kind = %params.kind, "Index built in memory");

            let dump = publish_dump.as_deref().map(|p| (p, vectors.as_slice()));
            publish(&paths, index.as_ref(), &metadata, &manifest, dump)
        })
        .await
        .map_err(|e| SiftError::Index(format!("Index build task panicked: {}", e)))??;

        let report = BuildReport {
            documents: documents.len(),
            skipped: skipped.into_iter().map(|s| s.path).collect(),
            dimensions,
            index_path: live.index,
            metadata_path: live.metadata,
            manifest_path: live.manifest,
            embeddings_dump: dump_path,
        };

        info!(
            documents = report.documents,
            skipped = report.skipped.len(),
            dimensions,
            kind = %params.kind,
            metric = %params.metric,
            model = self.embedder.model_name(),
            "Index build complete"
        );
        Ok(report)
    }

    /// Embed every document's content, preserving order.
    ///
    /// Each batch must come back with one vector per input and every vector
    /// must have the embedder's declared dimension.
    async fn embed_all(&self, documents: &[DocumentRecord]) -> Result<Vec<Vec<f32>>> {
        let expected_dims = self.embedder.dimensions();
        let batch_size = self.config.build.batch_size.max(1);
        let mut vectors = Vec::with_capacity(documents.len());

        for (batch_no, batch) in documents.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embedded = self.embedder.embed_batch_boxed(&texts).await?;

            if embedded.len() != batch.len() {
                return Err(SiftError::Embedding(format!(
                    "Embedding batch {} returned {} vectors for {} documents",
                    batch_no,
                    embedded.len(),
                    batch.len()
                )));
            }
            for (doc, vector) in batch.iter().zip(embedded.iter()) {
                if vector.len() != expected_dims {
                    return Err(SiftError::Embedding(format!(
                        "Document '{}' embedded to {} dimensions, expected {}",
                        doc.uuid,
                        vector.len(),
                        expected_dims
                    )));
                }
            }

            debug!(batch = batch_no, size = batch.len(), "Embedded batch");
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
