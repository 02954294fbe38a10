use anyhow::{Context, Result};
use podstats_recompute::{Config, Coordinator, JobRequest, RecomputeRequest, S3BlobStore};
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting podstats recompute worker"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Read and validate the job request before touching storage
    let job = read_job_request().context("Failed to read job request")?;
    let request = match RecomputeRequest::from_job(&job) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Rejected job request");
            return Err(e.into());
        }
    };

    let store = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 blob store")?,
    );

    let coordinator = Coordinator::new(store, &config.recompute);
    match coordinator.run(&request).await {
        Ok(outcome) => {
            info!(
                show = %outcome.show_uuid,
                month = %outcome.month,
                times = ?outcome.times,
                "Recompute finished"
            );
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Recompute failed");
            Err(e.into())
        }
    }
}

/// Read the job request JSON from the path in argv, or stdin for `-`.
fn read_job_request() -> Result<JobRequest> {
    let source = std::env::args().nth(1).unwrap_or_else(|| "-".to_string());
    let raw = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read job request from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&source)
            .with_context(|| format!("Failed to read job request file {source}"))?
    };
    serde_json::from_str(&raw).context("Failed to parse job request JSON")
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
