use serde::Deserialize;

/// Main configuration for the recompute worker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Recompute tuning
    #[serde(default)]
    pub recompute: RecomputeConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port; 0 disables the Prometheus exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding raw dailies and derived summaries
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Tuning for the recomputation pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct RecomputeConfig {
    /// Concurrent per-day computations in the dailies phase
    #[serde(default = "default_daily_concurrency")]
    pub daily_concurrency: usize,
}

// Default value functions
fn default_service_name() -> String {
    "recompute-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_daily_concurrency() -> usize {
    16
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "recompute-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/recompute").required(false))
            .add_source(config::File::with_name("/etc/podstats/recompute").required(false))
            // Override with environment variables
            // RECOMPUTE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("RECOMPUTE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self {
            daily_concurrency: default_daily_concurrency(),
        }
    }
}
