use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::Classification;
use crate::config::RetryConfig;
use crate::error::Cancelled;
use crate::sink::RecordSink;

/// Exponential backoff policy with an extra recovery pause for suspected outages.
#[derive(Debug, Clone)]
pub struct BackoffController {
    base_delay_ms: u64,
    elevated_base_delay_ms: u64,
    max_delay_ms: u64,
    outage_delay_ms: u64,
}

impl BackoffController {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            elevated_base_delay_ms: config.elevated_base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            outage_delay_ms: config.outage_delay_ms,
        }
    }

    /// `min(base * 2^attempt, max)`; base is elevated for server selection
    /// timeouts and network-like failures.
    pub fn delay_ms(&self, attempt: u32, class: &Classification) -> u64 {
        let base = if class.is_server_selection_timeout() || class.network_like {
            self.elevated_base_delay_ms
        } else {
            self.base_delay_ms
        };
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        base.saturating_mul(factor).min(self.max_delay_ms)
    }

    pub fn wants_recovery(&self, attempt: u32, class: &Classification) -> bool {
        attempt >= 1 && (class.is_server_selection_timeout() || class.network_like)
    }

    pub fn outage_delay_ms(&self, attempt: u32, class: &Classification) -> u64 {
        if class.network_like && attempt >= 2 {
            self.outage_delay_ms
        } else {
            0
        }
    }

    /// Sleep for the computed delay, then run recovery measures when they apply.
    /// Every wait is raced against `cancel`.
    pub async fn apply(
        &self,
        batch_index: u64,
        attempt: u32,
        class: &Classification,
        sink: &dyn RecordSink,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let delay_ms = self.delay_ms(attempt, class);
        info!(
            "[BATCH_{:06}] Waiting {:.1}s before retry {} ({})",
            batch_index,
            delay_ms as f64 / 1000.0,
            attempt + 1,
            class.category
        );
        pause(delay_ms, cancel).await?;

        if self.wants_recovery(attempt, class) {
            warn!(
                "[BATCH_{:06}] Recycling {} connections on retry {}",
                batch_index,
                sink.name(),
                attempt + 1
            );
            sink.recycle_connections();

            let outage_ms = self.outage_delay_ms(attempt, class);
            if outage_ms > 0 {
                info!(
                    "[BATCH_{:06}] Adding {}s recovery delay for a suspected storage outage",
                    batch_index,
                    outage_ms / 1000
                );
                pause(outage_ms, cancel).await?;
            }
        }

        if attempt >= 2 {
            warn!(
                "[BATCH_{:06}] Persistent {} error on retry {}",
                batch_index,
                class.category,
                attempt + 1
            );
        }

        Ok(())
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

async fn pause(ms: u64, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = sleep(Duration::from_millis(ms)) => Ok(()),
    }
}
