//! Tributary binary entry point: loads a route config document, starts
//! the engine, and waits for a shutdown signal.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tributary::config::EngineConfig;
use tributary::engine::Engine;
use tributary::error::EngineError;
use tributary::time_provider::production_time_provider;

/// A lightweight, concurrently-supervised integration engine.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to the YAML/JSON route config document.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(&args.config).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            tracing::error!(error = %err, "engine exited with an error");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(config_path: &std::path::Path) -> Result<(), EngineError> {
    let config = EngineConfig::load_from_file(config_path)?;
    let engine = std::sync::Arc::new(Engine::from_config(&config, production_time_provider())?);

    engine.start().await;
    tracing::info!(routes = engine.route_count(), "engine running");

    let shutdown = engine.spawn_signal_handler();
    shutdown
        .await
        .map_err(|source| EngineError::Unhandled(format!("shutdown task panicked: {source}")))?;

    tracing::info!("engine stopped cleanly");
    Ok(())
}
