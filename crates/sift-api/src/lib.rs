//! Sift API crate - axum HTTP surface over the query engine.
//!
//! Exposes the knowledge-base search as `GET`/`POST /search` plus a health
//! check, and records caller-supplied invocation reasons to a YAML log.

pub mod error;
pub mod handlers;
pub mod invocation_log;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
