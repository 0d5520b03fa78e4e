use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::RenameOutcome;

/// Cumulative counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_batches: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    /// Successful batches whose response needed padding, truncation or placeholders
    pub degraded_batches: u64,
    pub total_files: u64,
    pub successful_files: u64,
    pub failed_files: u64,
    pub total_time_ms: u64,
    pub extraction_time_ms: u64,
    pub analysis_time_ms: u64,
}

impl BatchStats {
    /// Share of files that ended successfully, 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.successful_files as f64 / self.total_files as f64
        }
    }
}

impl fmt::Display for BatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files ({} renamed, {} failed), {} batches ({} failed, {} degraded), {:.2}s total, {:.2}s extracting, {:.2}s analysing",
            self.total_files,
            self.successful_files,
            self.failed_files,
            self.total_batches,
            self.failed_batches,
            self.degraded_batches,
            self.total_time_ms as f64 / 1000.0,
            self.extraction_time_ms as f64 / 1000.0,
            self.analysis_time_ms as f64 / 1000.0,
        )
    }
}

/// Mutex-guarded [`BatchStats`], so updates stay whole even from worker threads.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<BatchStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut BatchStats)) {
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    pub fn record_batch(&self, success: bool, degraded: bool, elapsed: Duration) {
        self.update(|s| {
            s.total_batches += 1;
            if success {
                s.successful_batches += 1;
                if degraded {
                    s.degraded_batches += 1;
                }
            } else {
                s.failed_batches += 1;
            }
            s.analysis_time_ms += elapsed.as_millis() as u64;
        });
    }

    pub fn record_outcome(&self, outcome: &RenameOutcome) {
        self.update(|s| {
            s.total_files += 1;
            if outcome.success {
                s.successful_files += 1;
            } else {
                s.failed_files += 1;
            }
        });
    }

    pub fn record_extraction(&self, elapsed: Duration) {
        self.update(|s| s.extraction_time_ms += elapsed.as_millis() as u64);
    }

    pub fn finish(&self, total: Duration) {
        self.update(|s| s.total_time_ms = total.as_millis() as u64);
    }

    pub fn snapshot(&self) -> BatchStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_counts_batches_and_files() {
        let agg = StatsAggregator::new();
        agg.record_batch(true, false, Duration::from_millis(120));
        agg.record_batch(true, true, Duration::from_millis(80));
        agg.record_batch(false, false, Duration::from_millis(300));
        agg.record_outcome(&RenameOutcome::failed(PathBuf::from("x.jpg"), "boom"));
        agg.record_extraction(Duration::from_millis(50));
        agg.finish(Duration::from_secs(2));

        let s = agg.snapshot();
        assert_eq!(s.total_batches, 3);
        assert_eq!(s.successful_batches, 2);
        assert_eq!(s.degraded_batches, 1);
        assert_eq!(s.failed_batches, 1);
        assert_eq!(s.analysis_time_ms, 500);
        assert_eq!(s.total_files, 1);
        assert_eq!(s.failed_files, 1);
        assert_eq!(s.extraction_time_ms, 50);
        assert_eq!(s.total_time_ms, 2000);
        assert_eq!(s.success_rate(), 0.0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let agg = Arc::new(StatsAggregator::new());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let agg = agg.clone();
                scope.spawn(move || {
                    for _ in 0..250 {
                        agg.record_batch(true, false, Duration::ZERO);
                    }
                });
            }
        });
        assert_eq!(agg.snapshot().successful_batches, 1000);
    }

    #[test]
    fn test_display_summary() {
        let stats = BatchStats { total_files: 2, successful_files: 2, total_batches: 1, successful_batches: 1, ..Default::default() };
        assert!(stats.to_string().starts_with("2 files (2 renamed, 0 failed), 1 batches"));
        assert_eq!(stats.success_rate(), 1.0);
    }
}
