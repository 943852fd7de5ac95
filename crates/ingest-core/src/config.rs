use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Environment variable overriding `generation.max_parallelism`.
pub const MAX_BATCH_CONCURRENCY_ENV: &str = "MAX_BATCH_CONCURRENCY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_concurrency_override(std::env::var(MAX_BATCH_CONCURRENCY_ENV).ok().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Apply a `MAX_BATCH_CONCURRENCY` value; unparsable or zero values are ignored.
    pub fn apply_concurrency_override(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else {
            return;
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => self.generation.max_parallelism = n,
            _ => warn!(
                "Ignoring invalid {}={:?}, keeping max_parallelism={}",
                MAX_BATCH_CONCURRENCY_ENV, raw, self.generation.max_parallelism
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.generation.batch_size == 0 {
            anyhow::bail!("generation.batch_size must be greater than zero");
        }
        if self.generation.max_parallelism == 0 {
            anyhow::bail!("generation.max_parallelism must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than zero");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms
            || self.retry.elevated_base_delay_ms > self.retry.max_delay_ms
        {
            anyhow::bail!("retry base delays must not exceed retry.max_delay_ms");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base seed for reproducible runs; a random one is drawn per run when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Records per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Maximum batches inserting at once
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Count used by the worker CLI when `--count` is not given
    #[serde(default = "default_count")]
    pub default_count: u64,
}

fn default_batch_size() -> u64 {
    1000
}

fn default_max_parallelism() -> usize {
    32
}

fn default_count() -> u64 {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Insert attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Base delay for server selection timeouts and network failures
    #[serde(default = "default_elevated_base_delay_ms")]
    pub elevated_base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Extra pause once a network failure persists past the second retry
    #[serde(default = "default_outage_delay_ms")]
    pub outage_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_elevated_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_outage_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            elevated_base_delay_ms: default_elevated_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            outage_delay_ms: default_outage_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Ingestion endpoints (http sink round-robins across them)
    #[serde(default)]
    pub urls: Vec<String>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Simulated insert latency for the mock sink
    #[serde(default)]
    pub mock_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP trigger surface binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7845".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}
