use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::BackoffController;
use crate::config::Config;
use crate::error::{BatchError, GenerationError};
use crate::job::{rate, GenerationJob, GenerationReport};
use crate::record::RecordGenerator;
use crate::sink::RecordSink;
use crate::worker::{format_hms, BatchWorker, WorkerContext};

pub const MIN_TOTAL_COUNT: u64 = 1_000;
pub const MAX_TOTAL_COUNT: u64 = 5_000_000;
/// Accepted counts are rounded down to a multiple of this.
pub const COUNT_GRANULARITY: u64 = 500;

/// Reject counts outside the accepted range, then round down to the granularity.
pub fn normalize_count(count: u64) -> Result<u64, GenerationError> {
    if !(MIN_TOTAL_COUNT..=MAX_TOTAL_COUNT).contains(&count) {
        return Err(GenerationError::Validation {
            count,
            min: MIN_TOTAL_COUNT,
            max: MAX_TOTAL_COUNT,
        });
    }
    Ok(count / COUNT_GRANULARITY * COUNT_GRANULARITY)
}

/// How a total count is split into full batches plus one trailing remainder batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: u64,
    pub full_batches: u64,
    pub remainder: u64,
}

impl BatchPlan {
    pub fn new(total: u64, batch_size: u64) -> Self {
        Self {
            batch_size,
            full_batches: total / batch_size,
            remainder: total % batch_size,
        }
    }

    pub fn total_batches(&self) -> u64 {
        self.full_batches + u64::from(self.remainder > 0)
    }

    pub fn total_records(&self) -> u64 {
        self.full_batches * self.batch_size + self.remainder
    }

    /// Batch sizes in execution order.
    pub fn sizes(&self) -> impl Iterator<Item = u64> + '_ {
        let remainder = (self.remainder > 0).then_some(self.remainder);
        (0..self.full_batches)
            .map(move |_| self.batch_size)
            .chain(remainder)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub batch_size: u64,
    pub max_parallelism: usize,
    pub max_attempts: u32,
    /// Fixed base seed; drawn at random per run when `None`
    pub base_seed: Option<u64>,
    pub backoff: BackoffController,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.generation.batch_size,
            max_parallelism: config.generation.max_parallelism,
            max_attempts: config.retry.max_attempts,
            base_seed: config.generation.seed,
            backoff: BackoffController::new(&config.retry),
        }
    }

    fn validate(&self) -> Result<(), GenerationError> {
        if self.batch_size == 0 {
            return Err(GenerationError::InvalidSettings(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_parallelism == 0 {
            return Err(GenerationError::InvalidSettings(
                "max_parallelism must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(GenerationError::InvalidSettings(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_parallelism: 32,
            max_attempts: 5,
            base_seed: None,
            backoff: BackoffController::default(),
        }
    }
}

/// Splits a generation request into batches and runs them behind an admission gate.
pub struct BatchScheduler {
    sink: Arc<dyn RecordSink>,
    settings: SchedulerSettings,
    current: Mutex<Option<Arc<GenerationJob>>>,
}

impl BatchScheduler {
    pub fn new(sink: Arc<dyn RecordSink>, settings: SchedulerSettings) -> Self {
        Self {
            sink,
            settings,
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// The most recently started job, if any.
    pub fn current_job(&self) -> Option<Arc<GenerationJob>> {
        self.current.lock().clone()
    }

    pub async fn run(&self, total_count: u64) -> Result<GenerationReport, GenerationError> {
        self.run_with_cancel(total_count, CancellationToken::new())
            .await
    }

    /// Run a generation job. Cancelling `cancel` stops all batches at their next
    /// suspension point; the first terminal batch failure does the same for its siblings.
    pub async fn run_with_cancel(
        &self,
        total_count: u64,
        cancel: CancellationToken,
    ) -> Result<GenerationReport, GenerationError> {
        self.settings.validate()?;
        let total = normalize_count(total_count)?;
        let plan = BatchPlan::new(total, self.settings.batch_size);
        let base_seed = self.settings.base_seed.unwrap_or_else(rand::random);

        let job = Arc::new(GenerationJob::new(
            total,
            plan.batch_size,
            plan.total_batches(),
        ));
        *self.current.lock() = Some(job.clone());

        info!(
            "Starting generation of {} records in {} batches of {} (+{} remainder) with {} max parallelism at {} UTC",
            total,
            plan.full_batches,
            plan.batch_size,
            plan.remainder,
            self.settings.max_parallelism,
            job.started_at_utc().format("%Y-%m-%d %H:%M:%S")
        );

        let abort = cancel.child_token();
        let ctx = WorkerContext {
            sink: self.sink.clone(),
            backoff: self.settings.backoff.clone(),
            max_attempts: self.settings.max_attempts,
            job: job.clone(),
            gate: Arc::new(Semaphore::new(self.settings.max_parallelism)),
            cancel: abort.clone(),
        };

        let mut tasks = JoinSet::new();
        for batch_index in 0..plan.full_batches {
            let seed = RecordGenerator::batch_seed(base_seed, batch_index);
            tasks.spawn(BatchWorker::new(batch_index, plan.batch_size, seed, ctx.clone()).run());
        }
        info!("All {} batch tasks created", plan.full_batches);

        let mut first_failure: Option<GenerationError> = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) if e.is_cancelled() => continue,
                Ok(Err(e)) => self.failed(&job, e),
                Err(join_err) => GenerationError::Task(join_err),
            };
            if first_failure.is_none() {
                warn!("Cancelling outstanding batches after first failure: {}", failure);
                abort.cancel();
                first_failure = Some(failure);
            }
        }

        if let Some(failure) = first_failure {
            error!("Generation failed: {}", failure);
            return Err(failure);
        }
        if cancel.is_cancelled() {
            return Err(self.cancelled(&job));
        }

        if plan.remainder > 0 {
            let seed = RecordGenerator::batch_seed(base_seed, plan.full_batches);
            let worker = BatchWorker::new(plan.full_batches, plan.remainder, seed, ctx);
            match worker.run().await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(self.cancelled(&job)),
                Err(e) => {
                    let failure = self.failed(&job, e);
                    error!("Generation failed: {}", failure);
                    return Err(failure);
                }
            }
        }

        let elapsed = job.elapsed();
        let report = GenerationReport {
            total_records: total,
            batches: plan.total_batches(),
            duration_ms: elapsed.as_millis() as u64,
            records_per_second: rate(total, elapsed),
        };
        info!(
            "Successfully completed generation of {} records in {} at rate {:.0} records/sec",
            report.total_records,
            format_hms(elapsed.as_secs()),
            report.records_per_second
        );
        Ok(report)
    }

    fn failed(&self, job: &GenerationJob, source: BatchError) -> GenerationError {
        GenerationError::Failed {
            completed_batches: job.completed_batches(),
            total_batches: job.total_batches(),
            source,
        }
    }

    fn cancelled(&self, job: &GenerationJob) -> GenerationError {
        let err = GenerationError::Cancelled {
            completed_batches: job.completed_batches(),
            total_batches: job.total_batches(),
        };
        warn!("{}", err);
        err
    }
}
