//! Render router worker binary.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrender_router::RouterConfig;
use vrender_worker::{build_orchestrator, RequestRunner, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vrender-worker");

    let config = WorkerConfig::from_env();
    let router_config = RouterConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port, "Serving Prometheus metrics");
    }

    let orchestrator = build_orchestrator(&config, router_config).context("Failed to build router")?;
    let runner = RequestRunner::new(orchestrator.clone(), config.max_concurrent_jobs);
    let stdout = tokio::io::stdout();

    let run = async {
        match &config.requests_file {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Ok::<_, anyhow::Error>(runner.run(BufReader::new(file), stdout).await?)
            }
            None => Ok(runner.run(BufReader::new(tokio::io::stdin()), stdout).await?),
        }
    };

    tokio::select! {
        summary = run => {
            let summary = summary?;
            info!(
                submitted = summary.submitted,
                invalid = summary.invalid,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "All requests processed"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(in_flight = orchestrator.in_flight_count(), "Received shutdown signal");
        }
    }

    info!("Router stats: {}", serde_json::to_string(&orchestrator.stats())?);
    info!("Rule engine stats: {}", serde_json::to_string(&orchestrator.rule_engine().stats())?);
    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production. Logs go to stderr so
/// stdout carries only results.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vrender_router=info,vrender_worker=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
