//! Corpus loading.
//!
//! A corpus directory holds one YAML file per document, named
//! `chunk_<tag>.yaml`. The `<tag>` part becomes the document's provenance
//! tag. Files are read in file-name order so that repeated builds over the
//! same directory assign the same index keys.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use sift_core::error::{Result, SiftError};
use sift_core::types::{DocumentRecord, InvalidRecordPolicy};

const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_SUFFIX: &str = ".yaml";

/// A corpus record as it appears on disk, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDocument {
    pub uuid: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
}

impl RawDocument {
    /// Check that every required field is present and attach the
    /// provenance tag. `source` names the record in error messages.
    pub fn validate(self, chunk_uuid: &str, source: &str) -> Result<DocumentRecord> {
        let missing = |field: &str| SiftError::Corpus(format!("{}: missing required field '{}'", source, field));

        let content = self.content.ok_or_else(|| missing("content"))?;
        if content.trim().is_empty() {
            return Err(SiftError::Corpus(format!("{}: field 'content' is empty", source)));
        }

        Ok(DocumentRecord {
            uuid: self.uuid.ok_or_else(|| missing("uuid"))?,
            url: self.url.ok_or_else(|| missing("url"))?,
            title: self.title.ok_or_else(|| missing("title"))?,
            content,
            keywords: self.keywords.ok_or_else(|| missing("keywords"))?,
            chunk_uuid: chunk_uuid.to_string(),
        })
    }
}

/// A record left out of the build under [`InvalidRecordPolicy::Skip`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Validated documents in build order, plus anything that was skipped.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<DocumentRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// Extract `<tag>` from a `chunk_<tag>.yaml` file name.
pub fn chunk_tag(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)
        .filter(|tag| !tag.is_empty())
}

/// Load every `chunk_*.yaml` file directly inside `dir`.
///
/// An unreadable directory or file always aborts. A record that fails to
/// parse or lacks a required field aborts under [`InvalidRecordPolicy::Fail`]
/// and is logged and dropped under [`InvalidRecordPolicy::Skip`]. Duplicate
/// identifiers and an empty result always abort.
pub fn load_corpus(dir: &Path, policy: InvalidRecordPolicy) -> Result<Corpus> {
    if !dir.is_dir() {
        return Err(SiftError::Corpus(format!(
            "Corpus directory '{}' does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut corpus = Corpus::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            SiftError::Corpus(format!("Failed to read corpus directory '{}': {}", dir.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let Some(tag) = chunk_tag(&file_name) else {
            continue;
        };

        let path = entry.path();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SiftError::Corpus(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let source = path.display().to_string();
        let parsed = serde_yaml::from_str::<RawDocument>(&text)
            .map_err(|e| SiftError::Corpus(format!("{}: invalid YAML: {}", source, e)))
            .and_then(|raw| raw.validate(tag, &source));

        let document = match (parsed, policy) {
            (Ok(doc), _) => doc,
            (Err(e), InvalidRecordPolicy::Fail) => return Err(e),
            (Err(e), InvalidRecordPolicy::Skip) => {
                warn!(path = %path.display(), error = %e, "Skipping invalid corpus record");
                corpus.skipped.push(SkippedRecord {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !seen_ids.insert(document.uuid.clone()) {
            return Err(SiftError::Corpus(format!(
                "{}: duplicate document id '{}'",
                source, document.uuid
            )));
        }

        debug!(path = %path.display(), uuid = %document.uuid, "Loaded corpus record");
        corpus.documents.push(document);
    }

    if corpus.documents.is_empty() {
        return Err(SiftError::Corpus(format!(
            "No valid chunk_*.yaml records found in '{}'",
            dir.display()
        )));
    }

    info!(
        dir = %dir.display(),
        documents = corpus.documents.len(),
        skipped = corpus.skipped.len(),
        "Corpus loaded"
    );
    Ok(corpus)
}
