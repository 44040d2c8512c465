//! Append-only log of why a caller invoked a tool.
//!
//! Each entry is one YAML document (`---` separated) in
//! `<log_dir>/invocation_reasons.yaml`. Appends run on the blocking pool,
//! one at a time. Failing to write an entry is logged and otherwise ignored;
//! it never fails the request that triggered it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use sift_core::error::{Result, SiftError};

pub const LOG_FILE_NAME: &str = "invocation_reasons.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub reason: String,
}

/// Writer for the invocation log. Disabled when built without a directory.
#[derive(Debug)]
pub struct InvocationLog {
    path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl InvocationLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: Some(dir.join(LOG_FILE_NAME)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `reason` for a call to `tool`. Blank reasons are not logged.
    pub async fn record(&self, tool: &str, reason: Option<&str>, args: serde_json::Value) {
        let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) else {
            return;
        };
        let Some(path) = self.path.clone() else {
            return;
        };

        let entry = InvocationRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            tool: tool.to_string(),
            args,
            reason: reason.to_string(),
        };

        let id = entry.id.clone();
        let lock = Arc::clone(&self.write_lock);
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || append(&target, &lock, &entry)).await;

        match written {
            Ok(Ok(())) => debug!(tool, id = %id, "Invocation reason recorded"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to record invocation reason"),
            Err(e) => warn!(path = %path.display(), error = %e, "Invocation log task failed"),
        }
    }
}

fn append(path: &Path, lock: &Mutex<()>, entry: &InvocationRecord) -> Result<()> {
    let document = serde_yaml::to_string(entry)?;

    let _guard = lock
        .lock()
        .map_err(|e| SiftError::Io(std::io::Error::other(e.to_string())))?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write!(file, "---\n{}", document)?;
    Ok(())
}

/// Read every entry back from a log file.
pub fn read_entries(path: &Path) -> Result<Vec<InvocationRecord>> {
    let text = std::fs::read_to_string(path)?;
    serde_yaml::Deserializer::from_str(&text)
        .map(|doc| InvocationRecord::deserialize(doc).map_err(SiftError::from))
        .collect()
}
