//! Application state shared across all route handlers.
//!
//! AppState is built once before serving begins and never mutated; it is
//! passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use sift_core::config::{expand_home, SiftConfig};
use sift_vector::SearchContext;

use crate::invocation_log::InvocationLog;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SiftConfig>,
    /// Loaded index, metadata and embedding model.
    pub search: Arc<SearchContext>,
    pub invocation_log: Arc<InvocationLog>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: SiftConfig, search: SearchContext) -> Self {
        let invocation_log = if config.api.invocation_log_dir.trim().is_empty() {
            InvocationLog::disabled()
        } else {
            InvocationLog::new(&expand_home(&config.api.invocation_log_dir))
        };

        Self {
            config: Arc::new(config),
            search: Arc::new(search),
            invocation_log: Arc::new(invocation_log),
            start_time: Instant::now(),
        }
    }
}
