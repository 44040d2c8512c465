//! Persisted build artifacts.
//!
//! A built index is published as three files in the data directory:
//! - the index itself (binary, format owned by the index implementation),
//! - the metadata, a JSON array whose position `i` describes index key `i`,
//! - `index_manifest.json`, the parameters needed to reopen the index and
//!   the names of the index and metadata files it belongs to.
//!
//! Every build writes its index and metadata under names stamped with the
//! build time (`usearch_index.<stamp>.bin`, `metadata.<stamp>.json`), so no
//! live file is ever overwritten. Renaming the new manifest over the old one
//! is the single step that switches readers to the new pair. A failure
//! before that rename leaves the previous manifest, and the pair it names,
//! in place.
//!
//! Without a manifest, the configured file names are read as they are.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sift_core::config::{IndexConfig, SiftConfig};
use sift_core::error::{Result, SiftError};
use sift_core::types::MetadataRecord;

use crate::index::{open_index, IndexParams, NearestNeighborIndex};

/// Manifest file name inside the data directory.
pub const MANIFEST_FILE: &str = "index_manifest.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Everything needed to reopen a published index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    #[serde(flatten)]
    pub params: IndexParams,
    /// Embedding model the vectors were produced with.
    pub model_name: String,
    /// Number of indexed documents (= metadata length).
    pub documents: usize,
    pub created_at: DateTime<Utc>,
    /// Index file inside the data directory; empty means the configured name.
    #[serde(default)]
    pub index_file: String,
    /// Metadata file inside the data directory; empty means the configured name.
    #[serde(default)]
    pub metadata_file: String,
}

impl IndexManifest {
    pub fn new(params: IndexParams, model_name: &str, documents: usize) -> Self {
        Self {
            format_version: MANIFEST_VERSION,
            params,
            model_name: model_name.to_string(),
            documents,
            created_at: Utc::now(),
            index_file: String::new(),
            metadata_file: String::new(),
        }
    }

    /// Stamp used in the artifact names of the build this manifest describes.
    pub fn build_stamp(&self) -> String {
        self.created_at.format("%Y%m%d%H%M%S%6f").to_string()
    }
}

/// Locations of the published artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
}

impl ArtifactPaths {
    pub fn new(data_dir: &Path, index_file: &str, metadata_file: &str) -> Self {
        Self {
            index: data_dir.join(index_file),
            metadata: data_dir.join(metadata_file),
            manifest: data_dir.join(MANIFEST_FILE),
        }
    }

    pub fn from_config(config: &SiftConfig) -> Self {
        Self::new(
            &config.data_dir(),
            &config.index.index_file,
            &config.index.metadata_file,
        )
    }

    fn data_dir(&self) -> &Path {
        self.manifest.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Index and metadata names for the build stamped `stamp`.
    fn stamped(&self, stamp: &str) -> Self {
        Self {
            index: stamped_path(&self.index, stamp),
            metadata: stamped_path(&self.metadata, stamp),
            manifest: self.manifest.clone(),
        }
    }

    /// The pair `manifest` points at, or the configured names where it is
    /// silent.
    pub fn resolve(&self, manifest: &IndexManifest) -> Result<Self> {
        let pick = |named: &str, configured: &Path| -> Result<PathBuf> {
            if named.is_empty() {
                return Ok(configured.to_path_buf());
            }
            let plain = Path::new(named).file_name().and_then(|n| n.to_str()) == Some(named);
            if !plain {
                return Err(SiftError::Startup(format!(
                    "Manifest names '{}', which is not a file in the data directory",
                    named
                )));
            }
            Ok(self.data_dir().join(named))
        };
        Ok(Self {
            index: pick(&manifest.index_file, &self.index)?,
            metadata: pick(&manifest.metadata_file, &self.metadata)?,
            manifest: self.manifest.clone(),
        })
    }
}

/// `dir/name.ext` becomes `dir/name.<stamp>.ext`.
fn stamped_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}.{}", stem, stamp),
    };
    path.with_file_name(name)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The artifacts of one build, loaded and cross-checked.
pub struct LoadedArtifacts {
    /// Files the artifacts were read from.
    pub paths: ArtifactPaths,
    pub index: Box<dyn NearestNeighborIndex>,
    pub metadata: Vec<MetadataRecord>,
    pub manifest: IndexManifest,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Files created by an in-progress publish; removed on drop unless the
/// manifest rename went through.
struct Staging {
    created: Vec<PathBuf>,
    committed: bool,
}

impl Staging {
    fn new() -> Self {
        Self {
            created: Vec::new(),
            committed: false,
        }
    }

    /// Claim `path` for a new file. Existing files are never overwritten.
    fn create(&mut self, path: &Path) -> Result<PathBuf> {
        if path.exists() {
            return Err(SiftError::Index(format!(
                "Refusing to overwrite existing artifact '{}'",
                path.display()
            )));
        }
        self.created.push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    /// Claim a scratch file that a crashed earlier publish may have left.
    fn scratch(&mut self, path: &Path) -> PathBuf {
        self.created.push(path.to_path_buf());
        path.to_path_buf()
    }

    /// Switch readers over by renaming the staged manifest into place.
    fn commit(mut self, staged_manifest: &Path, manifest: &Path) -> Result<()> {
        std::fs::rename(staged_manifest, manifest)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.created {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}

/// Publish index, metadata and manifest (and optionally an embeddings dump)
/// as one build, returning the files now being served.
///
/// Readers see either the previous build or this one, never a mix. Files of
/// the build this one replaces are removed afterwards.
pub fn publish(
    paths: &ArtifactPaths,
    index: &dyn NearestNeighborIndex,
    metadata: &[MetadataRecord],
    manifest: &IndexManifest,
    embeddings_dump: Option<(&Path, &[Vec<f32>])>,
) -> Result<ArtifactPaths> {
    if index.len() != metadata.len() || manifest.documents != metadata.len() {
        return Err(SiftError::Index(format!(
            "Refusing to publish: index has {} vectors, metadata {} records, manifest {} documents",
            index.len(),
            metadata.len(),
            manifest.documents
        )));
    }

    std::fs::create_dir_all(paths.data_dir())?;
    let previous = match read_manifest(&paths.manifest) {
        Ok(Some(m)) => paths.resolve(&m).ok(),
        _ => None,
    };

    let live = paths.stamped(&manifest.build_stamp());
    let mut manifest = manifest.clone();
    manifest.index_file = file_name_of(&live.index);
    manifest.metadata_file = file_name_of(&live.metadata);

    let mut staging = Staging::new();

    if let Some((dump_path, vectors)) = embeddings_dump {
        let path = staging.create(dump_path)?;
        write_embeddings_dump(&path, vectors)?;
    }

    let path = staging.create(&live.index)?;
    index.save(&path)?;

    let path = staging.create(&live.metadata)?;
    write_json(&path, &metadata)?;

    let staged_manifest = staging.scratch(&tmp_path(&paths.manifest));
    write_json(&staged_manifest, &manifest)?;

    staging.commit(&staged_manifest, &paths.manifest)?;

    info!(
        index = %live.index.display(),
        metadata = %live.metadata.display(),
        documents = metadata.len(),
        "Index artifacts published"
    );

    if let Some(old) = previous {
        for stale in [&old.index, &old.metadata] {
            if stale == &live.index || stale == &live.metadata || !stale.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(stale) {
                warn!(path = %stale.display(), error = %e, "Failed to remove superseded artifact");
            }
        }
    }

    Ok(live)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Format a float like numpy's `savetxt` default (`%.18e`).
fn format_sci(value: f32) -> String {
    let formatted = format!("{:.18e}", value as f64);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => formatted,
    }
}

/// Write one line per vector, values separated by single spaces.
pub fn write_embeddings_dump(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for vector in vectors {
        let line: Vec<String> = vector.iter().map(|v| format_sci(*v)).collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    writer.flush()?;
    Ok(())
}

/// Timestamped dump file name, e.g. `embeddings_20250101_120000.txt`.
pub fn embeddings_dump_name(at: DateTime<Utc>) -> String {
    format!("embeddings_{}.txt", at.format("%Y%m%d_%H%M%S"))
}

/// Load the metadata array. Missing, unreadable or empty metadata is fatal.
pub fn load_metadata(path: &Path) -> Result<Vec<MetadataRecord>> {
    if !path.exists() {
        return Err(SiftError::Startup(format!(
            "Metadata file '{}' does not exist",
            path.display()
        )));
    }
    let file = File::open(path).map_err(|e| {
        SiftError::Startup(format!("Failed to open metadata '{}': {}", path.display(), e))
    })?;
    let metadata: Vec<MetadataRecord> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| {
            SiftError::Startup(format!("Failed to parse metadata '{}': {}", path.display(), e))
        })?;
    if metadata.is_empty() {
        return Err(SiftError::Startup(format!(
            "Metadata '{}' is empty; index dimension cannot be determined",
            path.display()
        )));
    }
    Ok(metadata)
}

/// Read the manifest if one was published.
pub fn read_manifest(path: &Path) -> Result<Option<IndexManifest>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let manifest: IndexManifest = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        SiftError::Startup(format!("Failed to parse manifest '{}': {}", path.display(), e))
    })?;
    if manifest.format_version != MANIFEST_VERSION {
        return Err(SiftError::Startup(format!(
            "Unsupported manifest version {} (expected {})",
            manifest.format_version, MANIFEST_VERSION
        )));
    }
    Ok(Some(manifest))
}

/// Load the pair the manifest names: metadata first, then the index with
/// matching parameters.
///
/// The dimension comes from the first metadata record's vector when present,
/// otherwise from the manifest. Without a manifest the configured files are
/// read, and the index is opened with `fallback` parameters and the
/// `fallback_model` name.
pub fn load_artifacts(
    paths: &ArtifactPaths,
    fallback: &IndexConfig,
    fallback_model: &str,
) -> Result<LoadedArtifacts> {
    let manifest = read_manifest(&paths.manifest)?;
    let paths = match &manifest {
        Some(m) => paths.resolve(m)?,
        None => paths.clone(),
    };
    let metadata = load_metadata(&paths.metadata)?;

    let metadata_dims = metadata[0].vector.as_ref().map(Vec::len);
    let dimensions = match (metadata_dims, manifest.as_ref().map(|m| m.params.dimensions)) {
        (Some(from_meta), Some(from_manifest)) if from_meta != from_manifest => {
            return Err(SiftError::Startup(format!(
                "Metadata vectors have {} dimensions but the manifest records {}",
                from_meta, from_manifest
            )));
        }
        (Some(dims), _) | (None, Some(dims)) => dims,
        (None, None) => {
            return Err(SiftError::Startup(
                "Cannot determine index dimension: no manifest and no vector in metadata"
                    .to_string(),
            ));
        }
    };

    let manifest = match manifest {
        Some(m) => m,
        None => {
            warn!(
                manifest = %paths.manifest.display(),
                "No index manifest found, using configured index parameters"
            );
            IndexManifest::new(
                IndexParams::from_config(fallback, dimensions),
                fallback_model,
                metadata.len(),
            )
        }
    };

    if manifest.documents != metadata.len() {
        return Err(SiftError::Startup(format!(
            "Manifest records {} documents but metadata has {}",
            manifest.documents,
            metadata.len()
        )));
    }

    let index = open_index(&manifest.params, &paths.index)?;
    if index.len() != metadata.len() {
        return Err(SiftError::Startup(format!(
            "Index holds {} vectors but metadata has {} records",
            index.len(),
            metadata.len()
        )));
    }

    info!(
        index = %paths.index.display(),
        documents = metadata.len(),
        dimensions,
        kind = %manifest.params.kind,
        metric = %manifest.params.metric,
        "Index artifacts loaded"
    );

    Ok(LoadedArtifacts {
        paths,
        index,
        metadata,
        manifest,
    })
}
