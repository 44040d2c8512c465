//! Query engine.
//!
//! A [`SearchContext`] is loaded once at startup and shared read-only by
//! every request. A query runs:
//! 1. embed the query text
//! 2. k-nearest-neighbor search (on a blocking thread)
//! 3. drop empty slots and anything at or beyond the distance threshold
//! 4. join each key to its metadata record
//! 5. keep only the first hit per URL
//! 6. format as [`SearchResult`]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use sift_core::config::{SearchConfig, SiftConfig};
use sift_core::error::{Result, SiftError};
use sift_core::types::{DistanceMetric, MetadataRecord, SearchOutcome, SearchResult};

use crate::embedding::DynEmbeddingService;
use crate::index::{Matches, NearestNeighborIndex, NO_MATCH_KEY};
use crate::store::{load_artifacts, ArtifactPaths, IndexManifest};

/// Per-query tuning, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryParams {
    /// Results requested when the caller does not say.
    pub k: usize,
    /// Upper bound on any requested `k`.
    pub max_k: usize,
    /// Candidates at or beyond this distance are dropped.
    pub distance_threshold: f32,
    pub timeout: Option<Duration>,
    /// Nearest-neighbor searches in flight at once.
    pub max_concurrency: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl QueryParams {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            k: config.k,
            max_k: config.max_k,
            distance_threshold: config.distance_threshold,
            timeout: (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms)),
            max_concurrency: config.concurrency(),
        }
    }
}

/// A candidate joined to its metadata record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit<'a> {
    pub key: u64,
    pub distance: f32,
    pub record: &'a MetadataRecord,
}

impl Hit<'_> {
    pub fn to_result(&self) -> SearchResult {
        SearchResult {
            url: self.record.url.clone(),
            snippet: self.record.snippet().to_string(),
            title: self.record.title.clone(),
            distance: self.distance,
        }
    }
}

/// Keep candidates strictly closer than `threshold`, in rank order.
/// Unfilled slots ([`NO_MATCH_KEY`]) are dropped.
pub fn filter_candidates(matches: &Matches, threshold: f32) -> Vec<(u64, f32)> {
    matches
        .iter()
        .filter(|(key, distance)| *key != NO_MATCH_KEY && *distance < threshold)
        .collect()
}

/// Resolve each candidate key to `metadata[key]`.
///
/// A key with no metadata entry means the index and metadata were not built
/// together; that is reported as [`SiftError::Consistency`].
pub fn join_metadata<'a>(
    candidates: &[(u64, f32)],
    metadata: &'a [MetadataRecord],
) -> Result<Vec<Hit<'a>>> {
    candidates
        .iter()
        .map(|&(key, distance)| {
            usize::try_from(key)
                .ok()
                .and_then(|pos| metadata.get(pos))
                .map(|record| Hit {
                    key,
                    distance,
                    record,
                })
                .ok_or(SiftError::Consistency {
                    key,
                    metadata_len: metadata.len(),
                })
        })
        .collect()
}

/// Keep the first hit for each URL. Hits without a URL are always kept.
pub fn dedup_by_url(hits: Vec<Hit<'_>>) -> Vec<Hit<'_>> {
    let mut seen: HashSet<&str> = HashSet::new();
    hits.into_iter()
        .filter(|hit| match hit.record.dedup_url() {
            Some(url) => seen.insert(url),
            None => true,
        })
        .collect()
}

/// Loaded, immutable query state.
#[derive(Clone)]
pub struct SearchContext {
    index: Arc<dyn NearestNeighborIndex>,
    metadata: Arc<Vec<MetadataRecord>>,
    embedder: Arc<dyn DynEmbeddingService>,
    manifest: Arc<IndexManifest>,
    params: QueryParams,
    /// One permit per index search slot.
    search_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("documents", &self.metadata.len())
            .field("manifest", &self.manifest)
            .field("params", &self.params)
            .finish()
    }
}

impl SearchContext {
    /// Load the published artifacts named by `config`.
    ///
    /// Fails if either file is missing or unreadable, or if `embedder` is not
    /// the model the index was built with.
    pub fn load(config: &SiftConfig, embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        let paths = ArtifactPaths::from_config(config);
        let loaded = load_artifacts(&paths, &config.index, embedder.model_name())?;
        Self::from_parts(
            loaded.index,
            loaded.metadata,
            loaded.manifest,
            embedder,
            QueryParams::from_config(&config.search),
        )
    }

    pub fn from_parts(
        index: Box<dyn NearestNeighborIndex>,
        metadata: Vec<MetadataRecord>,
        manifest: IndexManifest,
        embedder: Arc<dyn DynEmbeddingService>,
        params: QueryParams,
    ) -> Result<Self> {
        let dims = manifest.params.dimensions;
        if embedder.dimensions() != dims || index.dimensions() != dims {
            return Err(SiftError::Config(format!(
                "Embedding model produces {} dimensions and index holds {}, but the index was built with {}",
                embedder.dimensions(),
                index.dimensions(),
                dims
            )));
        }
        if embedder.model_name() != manifest.model_name {
            return Err(SiftError::Config(format!(
                "Index was built with model '{}' but the query model is '{}'",
                manifest.model_name,
                embedder.model_name()
            )));
        }
        if index.len() != metadata.len() {
            return Err(SiftError::Startup(format!(
                "Index holds {} vectors but metadata has {} records",
                index.len(),
                metadata.len()
            )));
        }

        let slots = params.max_concurrency.max(1);
        let mut index = index;
        index.set_search_threads(slots)?;

        Ok(Self {
            index: Arc::from(index),
            metadata: Arc::new(metadata),
            embedder,
            manifest: Arc::new(manifest),
            params,
            search_slots: Arc::new(Semaphore::new(slots)),
        })
    }

    pub fn documents(&self) -> usize {
        self.metadata.len()
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.params.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.manifest.params.metric
    }

    pub fn model_name(&self) -> &str {
        &self.manifest.model_name
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Answer `query` with up to `k` results (default `params.k`, capped at
    /// `params.max_k`).
    pub async fn search(&self, query: &str, k: Option<usize>) -> SearchOutcome {
        if query.trim().is_empty() {
            return SearchOutcome::Matches {
                results: Vec::new(),
            };
        }
        let k = k.unwrap_or(self.params.k).min(self.params.max_k);

        let result = match self.params.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_query(query, k)).await {
                Ok(result) => result,
                Err(_) => Err(SiftError::Search(format!(
                    "Query timed out after {} ms",
                    limit.as_millis()
                ))),
            },
            None => self.run_query(query, k).await,
        };

        match result {
            Ok(results) => SearchOutcome::Matches { results },
            Err(SiftError::Consistency { key, metadata_len }) => {
                error!(key, metadata_len, "Index returned a key with no metadata record");
                SearchOutcome::Inconsistent { key, metadata_len }
            }
            Err(e) => {
                warn!(error = %e, "Search degraded");
                SearchOutcome::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn run_query(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_boxed(query).await?;

        // The permit is released when the blocking search returns, even if
        // the query future was dropped by the timeout.
        let permit = Arc::clone(&self.search_slots)
            .acquire_owned()
            .await
            .map_err(|e| SiftError::Search(format!("Search slots closed: {}", e)))?;
        let index = Arc::clone(&self.index);
        let matches = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            index.search(&vector, k)
        })
        .await
        .map_err(|e| SiftError::Search(format!("Search task panicked: {}", e)))??;

        let candidates = filter_candidates(&matches, self.params.distance_threshold);
        let hits = join_metadata(&candidates, &self.metadata)?;
        let hits = dedup_by_url(hits);

        debug!(
            k,
            returned = matches.len(),
            within_threshold = candidates.len(),
            results = hits.len(),
            "Query answered"
        );
        Ok(hits.iter().map(Hit::to_result).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildReport, IndexBuilder};
    use crate::embedding::{EmbeddingService, MockEmbedding, MOCK_MODEL_NAME};
    use crate::index::{FlatIndex, IndexParams};
    use sift_core::types::{DocumentRecord, IndexKind};
    use std::path::Path;

    const DIMS: usize = 4;

    fn axis(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        v[hot] = 1.0;
        v
    }

    fn record(uuid: &str, url: Option<&str>) -> MetadataRecord {
        MetadataRecord {
            uuid: uuid.to_string(),
            url: url.map(String::from),
            title: format!("Title {}", uuid),
            original_text: Some(format!("Text {}", uuid)),
            ..Default::default()
        }
    }

    fn manifest(documents: usize) -> IndexManifest {
        let params = IndexParams {
            kind: IndexKind::Flat,
            metric: DistanceMetric::L2sq,
            dimensions: DIMS,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
        };
        IndexManifest::new(params, MOCK_MODEL_NAME, documents)
    }

    fn params(threshold: f32) -> QueryParams {
        QueryParams {
            distance_threshold: threshold,
            ..QueryParams::default()
        }
    }

    /// Flat index over `(record, vector)` pairs with a pinned-query embedder.
    fn context(
        docs: Vec<(MetadataRecord, Vec<f32>)>,
        embedder: MockEmbedding,
        params: QueryParams,
    ) -> SearchContext {
        let mut index = FlatIndex::new(DIMS, DistanceMetric::L2sq);
        let mut metadata = Vec::new();
        for (key, (meta, vector)) in docs.into_iter().enumerate() {
            index.add(key as u64, &vector).unwrap();
            metadata.push(meta);
        }
        let n = metadata.len();
        SearchContext::from_parts(Box::new(index), metadata, manifest(n), Arc::new(embedder), params)
            .unwrap()
    }

    fn three_docs() -> Vec<(MetadataRecord, Vec<f32>)> {
        vec![
            (record("d1", Some("https://docs/1")), axis(0)),
            (record("d2", Some("https://docs/2")), axis(1)),
            (record("d3", Some("https://docs/3")), axis(2)),
        ]
    }

    #[tokio::test]
    async fn test_closest_document_ranks_first() {
        let embedder = MockEmbedding::with_dimensions(DIMS)
            .with_fixed("about d2", vec![0.1, 0.9, 0.0, 0.0]);
        let ctx = context(three_docs(), embedder, params(1.1));

        let results = ctx.search("about d2", Some(5)).await.into_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url.as_deref(), Some("https://docs/2"));
        assert_eq!(results[0].snippet, "Text d2");
        assert!(results[0].distance < 1.1);
    }

    #[tokio::test]
    async fn test_same_url_keeps_lower_distance() {
        let docs = vec![
            (record("far", Some("https://docs/shared")), vec![0.8, 0.6, 0.0, 0.0]),
            (record("near", Some("https://docs/shared")), axis(0)),
            (record("other", Some("https://docs/other")), axis(2)),
        ];
        let embedder = MockEmbedding::with_dimensions(DIMS).with_fixed("q", axis(0));
        let ctx = context(docs, embedder, params(1.1));

        let results = ctx.search("q", None).await.into_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Title near");
    }

    #[tokio::test]
    async fn test_nothing_within_threshold_is_empty_not_error() {
        let embedder = MockEmbedding::with_dimensions(DIMS).with_fixed("unrelated", axis(3));
        let ctx = context(three_docs(), embedder, params(1.1));

        let outcome = ctx.search("unrelated", None).await;
        assert_eq!(outcome, SearchOutcome::Matches { results: vec![] });
    }

    #[tokio::test]
    async fn test_k_larger_than_corpus() {
        let embedder = MockEmbedding::with_dimensions(DIMS).with_fixed("q", axis(0));
        let ctx = context(three_docs(), embedder, params(10.0));

        let results = ctx.search("q", Some(10)).await.into_results();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_k_is_clamped_to_max_k() {
        let docs: Vec<_> = (0..6)
            .map(|i| {
                let mut v = axis(0);
                v[1] = i as f32 * 0.01;
                (record(&format!("d{}", i), Some(format!("https://docs/{}", i).as_str())), v)
            })
            .collect();
        let embedder = MockEmbedding::with_dimensions(DIMS).with_fixed("q", axis(0));
        let ctx = context(
            docs,
            embedder,
            QueryParams {
                max_k: 2,
                ..params(10.0)
            },
        );

        assert_eq!(ctx.search("q", Some(50)).await.into_results().len(), 2);
        assert_eq!(ctx.search("q", None).await.into_results().len(), 2);
    }

    #[tokio::test]
    async fn test_distance_equal_to_threshold_is_excluded() {
        let embedder = MockEmbedding::with_dimensions(DIMS).with_fixed("origin", vec![0.0; DIMS]);

        let strict = context(three_docs(), embedder.clone(), params(1.0));
        assert!(strict.search("origin", None).await.into_results().is_empty());

        let loose = context(three_docs(), embedder, params(1.0001));
        assert_eq!(loose.search("origin", None).await.into_results().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty_matches() {
        let ctx = context(three_docs(), MockEmbedding::with_dimensions(DIMS), params(1.1));
        assert_eq!(
            ctx.search("   ", None).await,
            SearchOutcome::Matches { results: vec![] }
        );
    }

    struct FailingEmbedder;

    impl EmbeddingService for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(SiftError::Embedding("model unavailable".to_string()))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            MOCK_MODEL_NAME
        }
    }

    struct SlowEmbedder;

    impl EmbeddingService for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(axis(0))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            MOCK_MODEL_NAME
        }
    }

    fn context_with(embedder: Arc<dyn DynEmbeddingService>, params: QueryParams) -> SearchContext {
        let mut index = FlatIndex::new(DIMS, DistanceMetric::L2sq);
        let mut metadata = Vec::new();
        for (key, (meta, vector)) in three_docs().into_iter().enumerate() {
            index.add(key as u64, &vector).unwrap();
            metadata.push(meta);
        }
        SearchContext::from_parts(Box::new(index), metadata, manifest(3), embedder, params).unwrap()
    }

    #[tokio::test]
    async fn test_embedding_failure_is_degraded() {
        let ctx = context_with(Arc::new(FailingEmbedder), params(1.1));
        let outcome = ctx.search("anything", None).await;
        match &outcome {
            SearchOutcome::Degraded { reason } => assert!(reason.contains("model unavailable")),
            other => panic!("expected degraded, got {:?}", other),
        }
        assert!(outcome.into_results().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_degraded() {
        let ctx = context_with(
            Arc::new(SlowEmbedder),
            QueryParams {
                timeout: Some(Duration::from_millis(20)),
                ..params(1.1)
            },
        );
        assert!(matches!(
            ctx.search("slow", None).await,
            SearchOutcome::Degraded { .. }
        ));
    }

    /// Reports a key past the end of any metadata it is paired with.
    struct StrayKeyIndex;

    impl NearestNeighborIndex for StrayKeyIndex {
        fn add(&mut self, _key: u64, _vector: &[f32]) -> Result<()> {
            Ok(())
        }

        fn search(&self, _query: &[f32], _k: usize) -> Result<Matches> {
            Matches::new(vec![0, 7], vec![0.1, 0.2])
        }

        fn len(&self) -> usize {
            3
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::L2sq
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_out_of_range_key_is_inconsistent() {
        let metadata: Vec<_> = three_docs().into_iter().map(|(m, _)| m).collect();
        let ctx = SearchContext::from_parts(
            Box::new(StrayKeyIndex),
            metadata,
            manifest(3),
            Arc::new(MockEmbedding::with_dimensions(DIMS)),
            params(1.1),
        )
        .unwrap();

        assert_eq!(
            ctx.search("q", None).await,
            SearchOutcome::Inconsistent {
                key: 7,
                metadata_len: 3
            }
        );
    }

    #[test]
    fn test_from_parts_rejects_wrong_model_or_dimension() {
        let index = || Box::new(FlatIndex::new(DIMS, DistanceMetric::L2sq));
        let wrong_dims = SearchContext::from_parts(
            index(),
            vec![],
            manifest(0),
            Arc::new(MockEmbedding::with_dimensions(8)),
            QueryParams::default(),
        );
        assert!(matches!(wrong_dims, Err(SiftError::Config(_))));

        let mut other_model = manifest(0);
        other_model.model_name = "all-MiniLM-L6-v2".to_string();
        let wrong_model = SearchContext::from_parts(
            index(),
            vec![],
            other_model,
            Arc::new(MockEmbedding::with_dimensions(DIMS)),
            QueryParams::default(),
        );
        assert!(matches!(wrong_model, Err(SiftError::Config(_))));
    }

    #[test]
    fn test_filter_drops_sentinel_and_keeps_rank_order() {
        let matches = Matches::new(vec![2, NO_MATCH_KEY, 0, 1], vec![0.2, 0.3, 0.5, 1.5]).unwrap();
        assert_eq!(filter_candidates(&matches, 1.1), vec![(2, 0.2), (0, 0.5)]);
        assert!(filter_candidates(&matches, 0.2).is_empty());
    }

    #[test]
    fn test_filter_drops_nan_distances() {
        let matches = Matches::new(vec![0, 1], vec![f32::NAN, 0.5]).unwrap();
        assert_eq!(filter_candidates(&matches, 1.1), vec![(1, 0.5)]);
    }

    #[test]
    fn test_join_reports_out_of_range_key() {
        let metadata = vec![record("a", Some("u"))];
        let err = join_metadata(&[(0, 0.1), (1, 0.2)], &metadata).unwrap_err();
        assert!(matches!(
            err,
            SiftError::Consistency {
                key: 1,
                metadata_len: 1
            }
        ));
    }

    #[test]
    fn test_dedup_first_wins_and_blank_urls_exempt() {
        let metadata = vec![
            record("a", Some("https://x")),
            record("b", None),
            record("c", Some("https://x")),
            record("d", Some("")),
            record("e", None),
            record("f", Some("")),
            record("g", Some("https://y")),
        ];
        let candidates: Vec<(u64, f32)> = (0..7).map(|k| (k, k as f32 * 0.1)).collect();
        let hits = join_metadata(&candidates, &metadata).unwrap();

        let kept: Vec<&str> = dedup_by_url(hits.clone())
            .iter()
            .map(|h| h.record.uuid.as_str())
            .collect();
        assert_eq!(kept, vec!["a", "b", "d", "e", "f", "g"]);

        let once = dedup_by_url(hits);
        let twice = dedup_by_url(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_snippet_falls_back_to_content() {
        let meta = MetadataRecord {
            content: Some("from content".to_string()),
            ..record("a", Some("u"))
        };
        let meta = MetadataRecord {
            original_text: None,
            ..meta
        };
        let hit = Hit {
            key: 0,
            distance: 0.3,
            record: &meta,
        };
        assert_eq!(hit.to_result().snippet, "from content");
    }

    // -----------------------------------------------------------------------
    // Loaded from published artifacts
    // -----------------------------------------------------------------------

    fn data_config(dir: &Path) -> SiftConfig {
        let mut config = SiftConfig::default();
        config.general.data_dir = dir.to_string_lossy().into_owned();
        config.embedding.dimensions = DIMS;
        config
    }

    fn document(uuid: &str, url: &str, content: &str) -> DocumentRecord {
        DocumentRecord {
            uuid: uuid.to_string(),
            url: url.to_string(),
            title: format!("Title {}", uuid),
            content: content.to_string(),
            keywords: Vec::new(),
            chunk_uuid: uuid.to_string(),
        }
    }

    fn corpus_embedder() -> MockEmbedding {
        MockEmbedding::with_dimensions(DIMS)
            .with_fixed("vector registers", axis(0))
            .with_fixed("memory ordering", axis(1))
            .with_fixed("cache maintenance", axis(2))
            .with_fixed("how do barriers work", vec![0.1, 0.9, 0.0, 0.0])
    }

    /// Build the three-document corpus into `config`'s data directory.
    async fn publish_corpus(config: &SiftConfig) -> BuildReport {
        let docs = vec![
            document("regs", "https://docs/regs", "vector registers"),
            document("order", "https://docs/order", "memory ordering"),
            document("cache", "https://docs/cache", "cache maintenance"),
        ];
        IndexBuilder::new(config.clone(), corpus_embedder())
            .build(docs)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_built_hnsw_index_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let config = data_config(dir.path());
        assert_eq!(config.index.kind, IndexKind::Hnsw);
        publish_corpus(&config).await;

        let ctx = SearchContext::load(&config, Arc::new(corpus_embedder())).unwrap();
        assert_eq!(ctx.documents(), 3);
        assert_eq!(ctx.manifest().params.kind, IndexKind::Hnsw);
        assert_eq!(ctx.model_name(), MOCK_MODEL_NAME);

        let results = ctx.search("how do barriers work", None).await.into_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url.as_deref(), Some("https://docs/order"));
        assert_eq!(results[0].snippet, "memory ordering");
        assert!(results[0].distance < 1.1);
    }

    #[test]
    fn test_load_fails_without_published_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = data_config(&dir.path().join("never-built"));
        let result = SearchContext::load(&config, Arc::new(corpus_embedder()));
        assert!(matches!(result, Err(SiftError::Startup(_))));
    }

    #[tokio::test]
    async fn test_load_fails_when_either_file_is_missing() {
        for remove_index in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let config = data_config(dir.path());
            let report = publish_corpus(&config).await;

            let victim = if remove_index {
                &report.index_path
            } else {
                &report.metadata_path
            };
            std::fs::remove_file(victim).unwrap();

            let result = SearchContext::load(&config, Arc::new(corpus_embedder()));
            assert!(matches!(result, Err(SiftError::Startup(_))));
        }
    }

    /// Same vectors as the corpus embedder, reported under another model name.
    struct OtherModel(MockEmbedding);

    impl EmbeddingService for OtherModel {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0.embed(text).await
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            "all-MiniLM-L6-v2"
        }
    }

    #[tokio::test]
    async fn test_load_rejects_model_recorded_in_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = data_config(dir.path());
        publish_corpus(&config).await;

        let result = SearchContext::load(&config, Arc::new(OtherModel(corpus_embedder())));
        match result {
            Err(SiftError::Config(msg)) => assert!(msg.contains("all-MiniLM-L6-v2")),
            other => panic!("expected config error, got {:?}", other.map(|c| c.documents())),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_beyond_core_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = data_config(dir.path());
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        config.search.max_concurrency = cores * 4;
        publish_corpus(&config).await;

        let ctx = SearchContext::load(&config, Arc::new(corpus_embedder())).unwrap();
        assert_eq!(ctx.params().max_concurrency, cores * 4);

        let tasks: Vec<_> = (0..cores * 16)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.search("how do barriers work", Some(3)).await })
            })
            .collect();
        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(outcome.is_matches(), "query failed: {:?}", outcome);
            assert_eq!(outcome.into_results().len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_search_slot_serializes_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = data_config(dir.path());
        config.search.max_concurrency = 1;
        publish_corpus(&config).await;

        let ctx = SearchContext::load(&config, Arc::new(corpus_embedder())).unwrap();
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.search("memory ordering", None).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_matches());
        }
    }

    #[test]
    fn test_query_params_timeout_zero_disables() {
        let config = SearchConfig {
            timeout_ms: 0,
            ..SearchConfig::default()
        };
        assert_eq!(QueryParams::from_config(&config).timeout, None);
        assert_eq!(
            QueryParams::default().timeout,
            Some(Duration::from_millis(10_000))
        );
    }
}
