//! Sift application binary - composition root.
//!
//! Ties the sift crates together into a single executable:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Create the embedding service (ONNX model, or mock)
//! 3. Run the requested command: build an index, serve the HTTP API, or
//!    answer one query from the terminal

mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sift_api::routes;
use sift_api::state::AppState;
use sift_core::config::{expand_home, SiftConfig};
use sift_core::error::SiftError;
use sift_core::types::SearchOutcome;
use sift_vector::embedding::{DynEmbeddingService, MockEmbedding, OnnxEmbeddingService};
use sift_vector::{IndexBuilder, SearchContext};

use cli::{CliArgs, Command};

fn create_embedder(
    config: &SiftConfig,
    mock: bool,
) -> Result<Arc<dyn DynEmbeddingService>, SiftError> {
    if mock {
        tracing::warn!(
            dimensions = config.embedding.dimensions,
            "Using mock embedder; results are not semantically meaningful"
        );
        return Ok(Arc::new(MockEmbedding::with_dimensions(
            config.embedding.dimensions,
        )));
    }
    let model_dir = expand_home(&config.embedding.model_dir);
    let service = OnnxEmbeddingService::from_directory(&config.embedding.model_name, &model_dir)?;
    Ok(Arc::new(service))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply;
    // problems are reported once the subscriber is up.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(SiftConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => SiftConfig::default(),
    };
    args.apply_overrides(&mut config);

    // Tracing.
    let filter = match args.resolve_log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting sift v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => {
            tracing::error!(path = %config_file.display(), error = %e, "Invalid configuration");
            return Err(e.into());
        }
        None => tracing::info!(path = %config_file.display(), "No config file, using defaults"),
    }
    config.validate()?;

    let embedder = create_embedder(&config, args.mock_embedder)?;

    match &args.command {
        Command::Build { corpus, .. } => {
            let builder = IndexBuilder::new_dyn(config, embedder);
            let report = builder.build_from_dir(corpus).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve { .. } => {
            let search = SearchContext::load(&config, embedder)?;
            tracing::info!(
                documents = search.documents(),
                model = search.model_name(),
                "Search context ready"
            );
            let state = AppState::new(config.clone(), search);
            routes::start_server(&config, state).await?;
        }
        Command::Query { text, k } => {
            let search = SearchContext::load(&config, embedder)?;
            let outcome = search.search(text, *k).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            match outcome {
                SearchOutcome::Matches { .. } => {}
                SearchOutcome::Degraded { reason } => return Err(SiftError::Search(reason).into()),
                SearchOutcome::Inconsistent { key, metadata_len } => {
                    return Err(SiftError::Consistency { key, metadata_len }.into())
                }
            }
        }
    }

    Ok(())
}
