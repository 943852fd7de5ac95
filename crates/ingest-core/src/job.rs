use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Progress state for one generation run, shared by reference with every batch worker.
pub struct GenerationJob {
    total_records: u64,
    batch_size: u64,
    total_batches: u64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    progress: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
    completed_batches: u64,
    completed_records: u64,
}

impl GenerationJob {
    pub fn new(total_records: u64, batch_size: u64, total_batches: u64) -> Self {
        Self {
            total_records,
            batch_size,
            total_batches,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            progress: Mutex::new(Counters::default()),
        }
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn total_batches(&self) -> u64 {
        self.total_batches
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn completed_batches(&self) -> u64 {
        self.progress.lock().completed_batches
    }

    /// Count a finished batch and return the progress as of that increment.
    pub fn record_batch(&self, records: u64) -> ProgressSnapshot {
        let (completed_batches, completed_records) = {
            let mut counters = self.progress.lock();
            counters.completed_batches += 1;
            counters.completed_records += records;
            (counters.completed_batches, counters.completed_records)
        };
        self.snapshot_of(completed_batches, completed_records)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let (completed_batches, completed_records) = {
            let counters = self.progress.lock();
            (counters.completed_batches, counters.completed_records)
        };
        self.snapshot_of(completed_batches, completed_records)
    }

    /// Progress is reported every `max(1, total / 20)` batches and on the last one.
    pub fn should_report(&self, completed_batches: u64) -> bool {
        let interval = (self.total_batches / 20).max(1);
        completed_batches % interval == 0 || completed_batches == self.total_batches
    }

    fn snapshot_of(&self, completed_batches: u64, completed_records: u64) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let records_per_second = rate(completed_records, elapsed);

        let remaining = self.total_records.saturating_sub(completed_records);
        let eta_ms = if remaining == 0 {
            Some(0)
        } else if records_per_second > 0.0 {
            Some((remaining as f64 / records_per_second * 1000.0) as u64)
        } else {
            None
        };

        let percent = if self.total_batches > 0 {
            completed_batches * 100 / self.total_batches
        } else {
            100
        };

        let avg_batch_ms = if completed_batches > 0 {
            elapsed_ms / completed_batches
        } else {
            0
        };

        ProgressSnapshot {
            started_at: self.started_at_utc.to_rfc3339(),
            completed_batches,
            total_batches: self.total_batches,
            completed_records,
            total_records: self.total_records,
            percent,
            elapsed_ms,
            records_per_second,
            eta_ms,
            avg_batch_ms,
        }
    }
}

/// Records per second, with elapsed time floored at 1ms so the rate stays finite.
pub fn rate(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.max(Duration::from_millis(1)).as_secs_f64();
    records as f64 / secs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub started_at: String,
    pub completed_batches: u64,
    pub total_batches: u64,
    pub completed_records: u64,
    pub total_records: u64,
    pub percent: u64,
    pub elapsed_ms: u64,
    pub records_per_second: f64,
    pub eta_ms: Option<u64>,
    pub avg_batch_ms: u64,
}

/// Final outcome of a successful generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub total_records: u64,
    pub batches: u64,
    pub duration_ms: u64,
    pub records_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_batch_updates_progress() {
        let job = GenerationJob::new(2500, 1000, 3);

        tokio::time::advance(Duration::from_secs(1)).await;
        let snap = job.record_batch(1000);
        assert_eq!(snap.completed_batches, 1);
        assert_eq!(snap.completed_records, 1000);
        assert_eq!(snap.percent, 33);
        assert!(snap.records_per_second > 900.0 && snap.records_per_second <= 1000.0);
        assert!(snap.eta_ms.unwrap() >= 1500);

        job.record_batch(1000);
        let snap = job.record_batch(500);
        assert_eq!(snap.completed_batches, 3);
        assert_eq!(snap.completed_records, 2500);
        assert_eq!(snap.percent, 100);
        assert_eq!(snap.eta_ms, Some(0));
        assert_eq!(job.completed_batches(), 3);
    }

    #[tokio::test]
    async fn test_report_cadence() {
        let job = GenerationJob::new(100_000, 1000, 100);
        assert!(!job.should_report(1));
        assert!(job.should_report(5));
        assert!(job.should_report(100));

        let small = GenerationJob::new(5000, 1000, 5);
        for completed in 1..=5 {
            assert!(small.should_report(completed));
        }

        let odd = GenerationJob::new(45_500, 1000, 46);
        assert!(odd.should_report(2));
        assert!(!odd.should_report(45));
        assert!(odd.should_report(46));
    }

    #[test]
    fn test_rate_floors_elapsed() {
        assert_eq!(rate(1000, Duration::ZERO), 1_000_000.0);
        assert_eq!(rate(1000, Duration::from_secs(2)), 500.0);
    }
}
