//! Cobalt Graph - Main Entry Point
//!
//! Loads a single TOML config file and runs the pipeline until it shuts
//! down (Ctrl-C or a fatal startup error), then exits with the matching
//! process code. No flag parsing beyond the config path, no interactive
//! prompts: this binary is the thinnest possible wrapper around
//! `cobalt_pipeline::run`.

use cobalt_common::config::PipelineConfig;
use cobalt_common::error::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cobalt-graph v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: cobalt-graph <config.toml>");
            std::process::exit(ExitCode::ConfigInvalid.into());
        }
    };

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("reading {config_path}: {e}");
            std::process::exit(ExitCode::ConfigInvalid.into());
        }
    };

    let config = match PipelineConfig::from_toml_str(&contents) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(ExitCode::ConfigInvalid.into());
        }
    };

    let exit_code = cobalt_pipeline::run(config).await;
    std::process::exit(exit_code.into());
}
