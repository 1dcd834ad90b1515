//! pvsignal binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Build the signal pipeline (embedder, clusterer, scorer, summarizer)
//! 4. Either serve the REST API or analyze one file and print JSON

mod cli;

use std::path::Path;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pvsignal_api::state::AppState;
use pvsignal_api::create_router;
use pvsignal_core::{ClusterMetrics, PvConfig, SummaryOutcome};
use pvsignal_pipeline::{RunReport, SignalPipeline};

use cli::{CliArgs, Command};

/// Output of `pvsignal analyze`.
#[derive(Debug, Serialize)]
struct Analysis {
    report: RunReport,
    signals: Vec<ClusterMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summaries: Option<Vec<SummaryOutcome>>,
}

/// Filter priority: --log-level > RUST_LOG > config file.
fn env_filter(cli_level: Option<&str>, config_level: &str) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level))
}

async fn serve(config: PvConfig, pipeline: SignalPipeline) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.general.port;
    let addr = format!("127.0.0.1:{}", port);
    let router = create_router(AppState::new(pipeline));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind - is another instance running?");
            tracing::error!("Try: PVSIGNAL_PORT={} pvsignal serve", port.saturating_add(1));
            return Err(e.into());
        }
    };

    tracing::info!(addr = %addr, "API server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn analyze(
    pipeline: SignalPipeline,
    file: &Path,
    top_n: usize,
    with_summaries: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(file).await.map_err(|e| {
        tracing::error!(path = %file.display(), error = %e, "Failed to read input file");
        e
    })?;

    let report = pipeline.ingest(bytes).await?;
    let signals = pipeline.get_top_signals(top_n);
    let summaries = if with_summaries {
        Some(pipeline.get_summaries(top_n).await)
    } else {
        None
    };

    let analysis = Analysis {
        report,
        signals,
        summaries,
    };
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; its outcome is logged below.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(PvConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => PvConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(
            args.log_level.as_deref(),
            &config.general.log_level,
        ))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting pvsignal v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Invalid configuration, using defaults"
        ),
        None => tracing::info!(path = %config_file.display(), "No configuration file, using defaults"),
    }

    config.general.port = args.resolve_port(config.general.port);

    let pipeline = SignalPipeline::from_config(config.clone())?;
    tracing::info!(summarizer = pipeline.summarizer_name(), "Signal pipeline ready");

    match args.command() {
        Command::Serve => serve(config, pipeline).await,
        Command::Analyze {
            file,
            top_n,
            summaries,
        } => {
            let top_n = top_n.unwrap_or(config.summary.default_top_n);
            analyze(pipeline, &file, top_n, summaries).await
        }
    }
}

