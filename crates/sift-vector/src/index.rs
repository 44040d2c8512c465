//! Nearest-neighbor indexes.
//!
//! Two implementations sit behind [`NearestNeighborIndex`]:
//! - [`HnswIndex`]: a usearch HNSW graph, approximate and sub-linear.
//! - [`FlatIndex`]: brute-force scan over every vector, exact and O(n).
//!
//! Both answer a search with the same fixed [`Matches`] shape. Keys are the
//! dense positions `0..N` assigned at build time and double as indexes into
//! the metadata store.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use sift_core::config::IndexConfig;
use sift_core::error::{Result, SiftError};
use sift_core::types::{DistanceMetric, IndexKind};

/// Key reported for an unfilled result slot.
pub const NO_MATCH_KEY: u64 = u64::MAX;

/// Result of a k-nearest-neighbor search: parallel key and distance lists,
/// closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matches {
    keys: Vec<u64>,
    distances: Vec<f32>,
}

impl Matches {
    /// Pair up keys and distances. The two lists must have equal length.
    pub fn new(keys: Vec<u64>, distances: Vec<f32>) -> Result<Self> {
        if keys.len() != distances.len() {
            return Err(SiftError::Index(format!(
                "Malformed search response: {} keys but {} distances",
                keys.len(),
                distances.len()
            )));
        }
        Ok(Self { keys, distances })
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate `(key, distance)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f32)> + '_ {
        self.keys.iter().copied().zip(self.distances.iter().copied())
    }
}

/// Parameters needed to create or reopen an index. Must be identical at
/// build time and at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub kind: IndexKind,
    pub metric: DistanceMetric,
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl IndexParams {
    pub fn from_config(config: &IndexConfig, dimensions: usize) -> Self {
        Self {
            kind: config.kind,
            metric: config.metric,
            dimensions,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
        }
    }
}

/// A k-nearest-neighbor index over fixed-dimension f32 vectors.
pub trait NearestNeighborIndex: Send + Sync {
    /// Pre-allocate room for `capacity` vectors.
    fn reserve(&mut self, _capacity: usize) -> Result<()> {
        Ok(())
    }

    /// Allow up to `threads` searches to run at the same time.
    fn set_search_threads(&mut self, _threads: usize) -> Result<()> {
        Ok(())
    }

    /// Insert `vector` under `key`.
    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()>;

    /// Return up to `k` nearest keys in ascending distance order.
    fn search(&self, query: &[f32], k: usize) -> Result<Matches>;

    /// Number of vectors in the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Write the index to `path`.
    fn save(&self, path: &Path) -> Result<()>;
}

/// Create an empty index for `params`.
pub fn new_index(params: &IndexParams) -> Result<Box<dyn NearestNeighborIndex>> {
    match params.kind {
        IndexKind::Hnsw => Ok(Box::new(HnswIndex::new(params)?)),
        IndexKind::Flat => Ok(Box::new(FlatIndex::new(params.dimensions, params.metric))),
    }
}

/// Reopen an index written by [`NearestNeighborIndex::save`].
pub fn open_index(params: &IndexParams, path: &Path) -> Result<Box<dyn NearestNeighborIndex>> {
    if !path.exists() {
        return Err(SiftError::Startup(format!(
            "Index file '{}' does not exist",
            path.display()
        )));
    }
    match params.kind {
        IndexKind::Hnsw => Ok(Box::new(HnswIndex::open(params, path)?)),
        IndexKind::Flat => Ok(Box::new(FlatIndex::open(params, path)?)),
    }
}

fn check_dimensions(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(SiftError::Index(format!(
            "Vector has {} dimensions, index expects {}",
            vector.len(),
            expected
        )));
    }
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SiftError::Index(format!("Non UTF-8 index path: {}", path.display())))
}

// ---------------------------------------------------------------------------
// HnswIndex - usearch graph
// ---------------------------------------------------------------------------

/// Approximate index backed by a usearch HNSW graph.
///
/// usearch hands every concurrent search its own thread slot and fails a
/// search when none is free, so the slot count is kept alongside the graph
/// and re-applied whenever capacity changes.
pub struct HnswIndex {
    inner: usearch::Index,
    params: IndexParams,
    threads: usize,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("params", &self.params)
            .field("size", &self.inner.size())
            .field("threads", &self.threads)
            .finish()
    }
}

impl HnswIndex {
    pub fn new(params: &IndexParams) -> Result<Self> {
        let options = IndexOptions {
            dimensions: params.dimensions,
            metric: match params.metric {
                DistanceMetric::L2sq => MetricKind::L2sq,
                DistanceMetric::Cosine => MetricKind::Cos,
            },
            quantization: ScalarKind::F32,
            connectivity: params.connectivity,
            expansion_add: params.expansion_add,
            expansion_search: params.expansion_search,
            multi: false,
        };

        let inner = usearch::Index::new(&options)
            .map_err(|e| SiftError::Index(format!("Failed to create HNSW index: {}", e)))?;

        Ok(Self {
            inner,
            params: *params,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        })
    }

    /// Apply `capacity` and the current thread slot count to the graph.
    fn reserve_slots(&self, capacity: usize) -> Result<()> {
        self.inner
            .reserve_capacity_and_threads(capacity, self.threads)
            .map_err(|e| {
                SiftError::Index(format!(
                    "Failed to reserve capacity {} with {} threads: {}",
                    capacity, self.threads, e
                ))
            })
    }

    pub fn open(params: &IndexParams, path: &Path) -> Result<Self> {
        let index = Self::new(params)?;
        index.inner.load(path_str(path)?).map_err(|e| {
            SiftError::Startup(format!("Failed to load index '{}': {}", path.display(), e))
        })?;
        // Loading resets the thread slots to the library default.
        index.reserve_slots(index.inner.size())?;

        if index.inner.dimensions() != params.dimensions {
            return Err(SiftError::Startup(format!(
                "Index '{}' has {} dimensions, expected {}",
                path.display(),
                index.inner.dimensions(),
                params.dimensions
            )));
        }

        debug!(path = %path.display(), size = index.inner.size(), "HNSW index loaded");
        Ok(index)
    }
}

impl NearestNeighborIndex for HnswIndex {
    fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.reserve_slots(capacity)
    }

    fn set_search_threads(&mut self, threads: usize) -> Result<()> {
        self.threads = threads.max(1);
        self.reserve_slots(self.inner.capacity().max(self.inner.size()))?;
        debug!(threads = self.threads, "HNSW search threads reserved");
        Ok(())
    }

    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimensions(self.params.dimensions, vector)?;
        if self.inner.size() >= self.inner.capacity() {
            let grown = (self.inner.capacity() * 2).max(64);
            self.reserve(grown)?;
        }
        self.inner
            .add(key, vector)
            .map_err(|e| SiftError::Index(format!("Failed to add key {}: {}", key, e)))
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Matches> {
        check_dimensions(self.params.dimensions, query)?;
        if k == 0 || self.inner.size() == 0 {
            return Ok(Matches::default());
        }
        let found = self
            .inner
            .search(query, k)
            .map_err(|e| SiftError::Index(format!("Vector search failed: {}", e)))?;
        Matches::new(found.keys, found.distances)
    }

    fn len(&self) -> usize {
        self.inner.size()
    }

    fn dimensions(&self) -> usize {
        self.params.dimensions
    }

    fn metric(&self) -> DistanceMetric {
        self.params.metric
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.inner
            .save(path_str(path)?)
            .map_err(|e| SiftError::Index(format!("Failed to save index '{}': {}", path.display(), e)))
    }
}

// ---------------------------------------------------------------------------
// FlatIndex - exact brute-force scan
// ---------------------------------------------------------------------------

/// Magic bytes identifying a flat index file.
const FLAT_MAGIC: &[u8; 4] = b"SFLT";

/// Current flat index format version.
const FLAT_VERSION: u32 = 1;

/// Header: magic, version, metric, dimensions (u32 each) + count (u64).
const FLAT_HEADER_SIZE: usize = 24;

/// Exact index that scores every stored vector on each search.
///
/// Keys must be inserted densely (`0, 1, 2, ...`); the key of a vector is
/// its position.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    metric: DistanceMetric,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimensions: usize, metric: DistanceMetric) -> Self {
        Self {
            dimensions,
            metric,
            vectors: Vec::new(),
        }
    }

    /// Read a flat index file, checking it against `params`.
    pub fn open(params: &IndexParams, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            SiftError::Startup(format!("Failed to read index '{}': {}", path.display(), e))
        })?;
        let index = Self::from_bytes(&bytes)
            .map_err(|e| SiftError::Startup(format!("Index '{}': {}", path.display(), e)))?;

        if index.dimensions != params.dimensions || index.metric != params.metric {
            return Err(SiftError::Startup(format!(
                "Index '{}' was built with {} dims / {}, expected {} dims / {}",
                path.display(),
                index.dimensions,
                index.metric,
                params.dimensions,
                params.metric
            )));
        }
        Ok(index)
    }

    fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < FLAT_HEADER_SIZE || &bytes[0..4] != FLAT_MAGIC {
            return Err("not a flat index file".to_string());
        }
        let read_u32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let version = read_u32(4);
        if version != FLAT_VERSION {
            return Err(format!("unsupported version {}", version));
        }
        let metric = match read_u32(8) {
            0 => DistanceMetric::L2sq,
            1 => DistanceMetric::Cosine,
            other => return Err(format!("unknown metric tag {}", other)),
        };
        let dimensions = read_u32(12) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[16..24]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| "header count overflows".to_string())?;

        let body = &bytes[FLAT_HEADER_SIZE..];
        let expected = count
            .checked_mul(dimensions)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| "header count overflows".to_string())?;
        if body.len() != expected {
            return Err(format!(
                "truncated body: {} bytes, expected {}",
                body.len(),
                expected
            ));
        }

        let vectors = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            dimensions,
            metric,
            vectors,
        })
    }

    fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimensions;
        &self.vectors[start..start + self.dimensions]
    }
}

impl NearestNeighborIndex for FlatIndex {
    fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.vectors.reserve(capacity * self.dimensions);
        Ok(())
    }

    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimensions(self.dimensions, vector)?;
        let next = self.len() as u64;
        if key != next {
            return Err(SiftError::Index(format!(
                "Flat index keys must be dense: got {}, expected {}",
                key, next
            )));
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Matches> {
        check_dimensions(self.dimensions, query)?;

        let mut scored: Vec<(u64, f32)> = (0..self.len())
            .map(|pos| (pos as u64, distance(self.metric, query, self.vector(pos))))
            .collect();

        // Stable sort keeps lower keys first among equal distances.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        let (keys, distances) = scored.into_iter().unzip();
        Matches::new(keys, distances)
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.vectors.len() / self.dimensions
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let metric_tag: u32 = match self.metric {
            DistanceMetric::L2sq => 0,
            DistanceMetric::Cosine => 1,
        };
        writer.write_all(FLAT_MAGIC)?;
        writer.write_all(&FLAT_VERSION.to_le_bytes())?;
        writer.write_all(&metric_tag.to_le_bytes())?;
        writer.write_all(&(self.dimensions as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.vectors {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Distance between two equal-length vectors under `metric`.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::L2sq => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum(),
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b) as f32,
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
