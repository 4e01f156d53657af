use std::time::Duration;

use snafu::Snafu;

const fn default_max_batch_size() -> usize {
    1000
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_scan_interval_secs() -> u64 {
    10
}

#[derive(Debug, Snafu)]
pub enum OptionsError {
    #[snafu(display("Invalid value {value:?} for {name}: {source}"))]
    InvalidInteger {
        name: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Environment-derived worker options. Read once at startup and carried in
/// the [`WorkerContext`](crate::WorkerContext); no module looks at the
/// environment after this.
#[derive(Debug, Clone)]
pub struct Options {
    /// Name of the tenant delivery configuration table.
    pub tenant_config_table: String,
    /// First-hop role assumed for every delivery.
    pub central_role_arn: Option<String>,
    /// Default region for all clients and for configs without `target_region`.
    pub region: String,
    /// Informational upper bound on the in-memory batch.
    pub max_batch_size: usize,
    /// Per-flush retry ceiling for the stream delivery engine.
    pub retry_attempts: u32,
    /// Queue polled in poll-mode and targeted by self-reinjection.
    pub queue_url: Option<String>,
    /// Bucket scanned in scan-mode.
    pub source_bucket: String,
    pub scan_interval: Duration,
}

impl Options {
    pub fn from_env() -> Result<Self, OptionsError> {
        Ok(Self {
            tenant_config_table: env_or("TENANT_CONFIG_TABLE", "tenant-configurations"),
            central_role_arn: std::env::var("CENTRAL_LOG_DISTRIBUTION_ROLE").ok(),
            region: env_or("AWS_REGION", "us-east-1"),
            max_batch_size: parse_env("MAX_BATCH_SIZE", default_max_batch_size())?,
            retry_attempts: parse_env("RETRY_ATTEMPTS", default_retry_attempts())?,
            queue_url: std::env::var("SQS_QUEUE_URL").ok(),
            source_bucket: env_or("SOURCE_BUCKET", "test-logs"),
            scan_interval: Duration::from_secs(parse_env(
                "SCAN_INTERVAL",
                default_scan_interval_secs(),
            )?),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    name: &'static str,
    default: T,
) -> Result<T, OptionsError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|source| OptionsError::InvalidInteger {
                name,
                value,
                source,
            }),
        Err(_) => Ok(default),
    }
}
