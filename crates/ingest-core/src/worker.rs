use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffController;
use crate::classify::{Classification, ErrorClassifier};
use crate::error::{BatchError, InsertError};
use crate::job::GenerationJob;
use crate::record::RecordGenerator;
use crate::sink::RecordSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    AcquiringSlot,
    Generating,
    Inserting,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one insert attempt, tagged for the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome {
    Inserted,
    Transient(Classification, InsertError),
    Permanent(Classification, InsertError),
}

impl AttemptOutcome {
    pub fn from_result(result: Result<(), InsertError>) -> Self {
        match result {
            Ok(()) => AttemptOutcome::Inserted,
            Err(e) => {
                let class = ErrorClassifier::classify(&e);
                if class.retriable {
                    AttemptOutcome::Transient(class, e)
                } else {
                    AttemptOutcome::Permanent(class, e)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_index: u64,
    pub records: u64,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Handles shared by all workers of one generation run.
#[derive(Clone)]
pub struct WorkerContext {
    pub sink: Arc<dyn RecordSink>,
    pub backoff: BackoffController,
    pub max_attempts: u32,
    pub job: Arc<GenerationJob>,
    pub gate: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

/// One batch: wait for a gate slot, generate records, insert with bounded retries.
pub struct BatchWorker {
    batch_index: u64,
    size: u64,
    seed: u64,
    ctx: WorkerContext,
    state: BatchState,
}

impl BatchWorker {
    pub fn new(batch_index: u64, size: u64, seed: u64, ctx: WorkerContext) -> Self {
        Self {
            batch_index,
            size,
            seed,
            ctx,
            state: BatchState::Pending,
        }
    }

    fn transition(&mut self, next: BatchState) {
        debug!(
            "[BATCH_{:06}] {} -> {}",
            self.batch_index, self.state, next
        );
        self.state = next;
    }

    fn cancelled(&mut self) -> BatchError {
        self.transition(BatchState::Cancelled);
        BatchError::Cancelled {
            batch_index: self.batch_index,
        }
    }

    pub async fn run(mut self) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let idx = self.batch_index;
        let cancel = self.ctx.cancel.clone();

        self.transition(BatchState::AcquiringSlot);
        let gate = self.ctx.gate.clone();
        // Held until this function returns, on every path.
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled()),
            permit = gate.acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return Err(self.cancelled()),
            },
        };
        debug!(
            "[BATCH_{:06}] Slot acquired after {}ms",
            idx,
            started.elapsed().as_millis()
        );

        self.transition(BatchState::Generating);
        let records = RecordGenerator::generate(self.size as usize, self.seed);

        let sink = self.ctx.sink.clone();
        let max_attempts = self.ctx.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            self.transition(BatchState::Inserting);
            let attempt_started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                r = sink.insert_batch(&records) => r,
            };
            let attempt_ms = attempt_started.elapsed().as_millis();

            match AttemptOutcome::from_result(result) {
                AttemptOutcome::Inserted => break,
                AttemptOutcome::Transient(class, err) if attempt + 1 < max_attempts => {
                    warn!(
                        "[BATCH_{:06}] [{}] attempt {}/{} failed after {}ms: {}",
                        idx,
                        class.category,
                        attempt + 1,
                        max_attempts,
                        attempt_ms,
                        err.message
                    );
                    self.transition(BatchState::Retrying);
                    if self
                        .ctx
                        .backoff
                        .apply(idx, attempt, &class, sink.as_ref(), &cancel)
                        .await
                        .is_err()
                    {
                        return Err(self.cancelled());
                    }
                    attempt += 1;
                }
                AttemptOutcome::Transient(class, err) => {
                    error!(
                        "[BATCH_{:06}] [{}] Final attempt {}/{} failed after {}ms: {}",
                        idx,
                        class.category,
                        attempt + 1,
                        max_attempts,
                        attempt_ms,
                        err.message
                    );
                    self.transition(BatchState::Failed);
                    return Err(BatchError::RetriesExhausted {
                        batch_index: idx,
                        attempts: attempt + 1,
                        category: class.category,
                        source: err,
                    });
                }
                AttemptOutcome::Permanent(class, err) => {
                    error!(
                        "[BATCH_{:06}] [{}] Non-retriable failure on attempt {}: {}",
                        idx,
                        class.category,
                        attempt + 1,
                        err.message
                    );
                    self.transition(BatchState::Failed);
                    return Err(BatchError::Permanent {
                        batch_index: idx,
                        attempts: attempt + 1,
                        category: class.category,
                        source: err,
                    });
                }
            }
        }

        self.transition(BatchState::Succeeded);
        let snapshot = self.ctx.job.record_batch(self.size);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "[BATCH_{:06}] Inserted {} records in {}ms, progress {}/{}",
            idx, self.size, elapsed_ms, snapshot.completed_batches, snapshot.total_batches
        );

        if self.ctx.job.should_report(snapshot.completed_batches) {
            info!(
                "Progress: {}/{} batches ({}%) | {} records | Rate: {:.0}/sec | ETA: {} | Avg batch time: {}ms",
                snapshot.completed_batches,
                snapshot.total_batches,
                snapshot.percent,
                snapshot.completed_records,
                snapshot.records_per_second,
                snapshot
                    .eta_ms
                    .map(|ms| format_hms(ms / 1000))
                    .unwrap_or_else(|| "unknown".to_string()),
                snapshot.avg_batch_ms
            );
        }

        Ok(BatchReport {
            batch_index: idx,
            records: self.size,
            attempts: attempt + 1,
            elapsed_ms,
        })
    }
}

/// `hh:mm:ss` rendering of a whole number of seconds.
pub fn format_hms(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InsertErrorKind;
    use crate::sink::{InsertFuture, MockSink};
    use crate::record::Record;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results, then succeeds.
    struct ScriptedSink {
        script: Mutex<VecDeque<InsertError>>,
        always: Option<InsertError>,
        calls: AtomicU32,
    }

    impl ScriptedSink {
        fn failing_then_ok(errors: Vec<InsertError>) -> Self {
            Self {
                script: Mutex::new(errors.into()),
                always: None,
                calls: AtomicU32::new(0),
            }
        }

        fn always(error: InsertError) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                always: Some(error),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl RecordSink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn insert_batch<'a>(&'a self, _records: &'a [Record]) -> InsertFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = self.script.lock().pop_front() {
                    return Err(err);
                }
                match &self.always {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                }
            })
        }
    }

    fn context(sink: Arc<dyn RecordSink>, cancel: CancellationToken) -> WorkerContext {
        WorkerContext {
            sink,
            backoff: BackoffController::default(),
            max_attempts: 5,
            job: Arc::new(GenerationJob::new(1000, 1000, 1)),
            gate: Arc::new(Semaphore::new(1)),
            cancel,
        }
    }

    #[test]
    fn test_attempt_outcome_tags() {
        assert!(matches!(
            AttemptOutcome::from_result(Ok(())),
            AttemptOutcome::Inserted
        ));
        assert!(matches!(
            AttemptOutcome::from_result(Err(InsertError::timeout("operation timed out"))),
            AttemptOutcome::Transient(..)
        ));
        assert!(matches!(
            AttemptOutcome::from_result(Err(InsertError::constraint_violation("duplicate key"))),
            AttemptOutcome::Permanent(..)
        ));
    }

    #[tokio::test]
    async fn test_batch_succeeds_first_try() {
        let ctx = context(Arc::new(MockSink::new(0)), CancellationToken::new());
        let job = ctx.job.clone();
        let gate = ctx.gate.clone();

        let report = BatchWorker::new(0, 1000, 1, ctx).run().await.unwrap();
        assert_eq!(report.records, 1000);
        assert_eq!(report.attempts, 1);
        assert_eq!(job.completed_batches(), 1);
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_is_exactly_five_attempts() {
        let sink = Arc::new(ScriptedSink::always(InsertError::connectivity(
            "connection refused",
        )));
        let ctx = context(sink.clone(), CancellationToken::new());
        let job = ctx.job.clone();
        let gate = ctx.gate.clone();

        let err = BatchWorker::new(3, 10, 1, ctx).run().await.unwrap_err();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
        match err {
            BatchError::RetriesExhausted {
                batch_index,
                attempts,
                source,
                ..
            } => {
                assert_eq!(batch_index, 3);
                assert_eq!(attempts, 5);
                assert_eq!(source.kind, InsertErrorKind::Connectivity);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(job.completed_batches(), 0);
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let sink = Arc::new(ScriptedSink::failing_then_ok(vec![
            InsertError::timeout("operation timed out"),
            InsertError::server("not primary"),
        ]));
        let ctx = context(sink.clone(), CancellationToken::new());

        let report = BatchWorker::new(0, 10, 1, ctx).run().await.unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_fails_fast() {
        let sink = Arc::new(ScriptedSink::always(InsertError::constraint_violation(
            "E11000 duplicate key error",
        )));
        let ctx = context(sink.clone(), CancellationToken::new());

        let err = BatchWorker::new(1, 10, 1, ctx).run().await.unwrap_err();
        assert!(matches!(err, BatchError::Permanent { attempts: 1, .. }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_for_slot() {
        let cancel = CancellationToken::new();
        let ctx = context(Arc::new(MockSink::new(0)), cancel.clone());
        let held = ctx.gate.clone().acquire_owned().await.unwrap();

        let handle = tokio::spawn(BatchWorker::new(7, 10, 1, ctx).run());
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.batch_index(), 7);
        drop(held);
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3723), "01:02:03");
    }
}
