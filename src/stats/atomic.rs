//! Lock-free statistics using atomic operations
//!
//! Tracks task and step throughput without mutex contention; the control API
//! serves snapshots of these counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::task::TaskStatus;

/// Global statistics for this agent
#[derive(Debug, Default)]
pub struct GlobalStats {
    pub tasks_completed: AtomicU64,
    pub tasks_partial: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_rejected: AtomicU64,
    pub steps_executed: AtomicU64,
    pub step_errors: AtomicU64,
    pub ad_urls_found: AtomicU64,
    pub uniqueness_runs: AtomicU64,
    pub total_step_latency_ms: AtomicU64,
    pub start_time: AtomicU64,
}

impl GlobalStats {
    pub fn new() -> Self {
        let stats = Self::default();
        stats.start_time.store(now_secs(), Ordering::Relaxed);
        stats
    }

    /// Record a finished task by its final status
    pub fn record_task(&self, status: TaskStatus) {
        let counter = match status {
            TaskStatus::Completed => &self.tasks_completed,
            TaskStatus::Partial => &self.tasks_partial,
            _ => &self.tasks_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step(&self, success: bool, latency_ms: u64) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
        self.total_step_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if !success {
            self.step_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ad_urls(&self, count: u64) {
        self.ad_urls_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_uniqueness_run(&self) {
        self.uniqueness_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Average step latency in milliseconds
    pub fn average_step_latency_ms(&self) -> f64 {
        let steps = self.steps_executed.load(Ordering::Relaxed);
        if steps == 0 {
            return 0.0;
        }
        self.total_step_latency_ms.load(Ordering::Relaxed) as f64 / steps as f64
    }

    /// Tasks finished per hour since startup
    pub fn tasks_per_hour(&self) -> f64 {
        let elapsed_hours = (now_secs().saturating_sub(self.start_time.load(Ordering::Relaxed))) as f64 / 3600.0;
        if elapsed_hours < 0.001 {
            return 0.0;
        }
        let total = self.tasks_completed.load(Ordering::Relaxed)
            + self.tasks_partial.load(Ordering::Relaxed)
            + self.tasks_failed.load(Ordering::Relaxed);
        total as f64 / elapsed_hours
    }

    /// Get snapshot for serialization
    pub fn snapshot(&self) -> GlobalStatsSnapshot {
        GlobalStatsSnapshot {
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_partial: self.tasks_partial.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            step_errors: self.step_errors.load(Ordering::Relaxed),
            ad_urls_found: self.ad_urls_found.load(Ordering::Relaxed),
            uniqueness_runs: self.uniqueness_runs.load(Ordering::Relaxed),
            average_step_latency_ms: self.average_step_latency_ms(),
            tasks_per_hour: self.tasks_per_hour(),
        }
    }

    /// Reset all stats
    pub fn reset(&self) {
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_partial.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.tasks_rejected.store(0, Ordering::Relaxed);
        self.steps_executed.store(0, Ordering::Relaxed);
        self.step_errors.store(0, Ordering::Relaxed);
        self.ad_urls_found.store(0, Ordering::Relaxed);
        self.uniqueness_runs.store(0, Ordering::Relaxed);
        self.total_step_latency_ms.store(0, Ordering::Relaxed);
        self.start_time.store(now_secs(), Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serializable snapshot of global stats
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsSnapshot {
    pub tasks_completed: u64,
    pub tasks_partial: u64,
    pub tasks_failed: u64,
    pub tasks_rejected: u64,
    pub steps_executed: u64,
    pub step_errors: u64,
    pub ad_urls_found: u64,
    pub uniqueness_runs: u64,
    pub average_step_latency_ms: f64,
    pub tasks_per_hour: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_by_final_status() {
        let stats = GlobalStats::new();
        stats.record_task(TaskStatus::Completed);
        stats.record_task(TaskStatus::Partial);
        stats.record_task(TaskStatus::Failed);
        stats.record_rejection();

        let snap = stats.snapshot();
        assert_eq!(snap.tasks_completed, 1);
        assert_eq!(snap.tasks_partial, 1);
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.tasks_rejected, 1);
    }

    #[test]
    fn average_latency_over_steps() {
        let stats = GlobalStats::new();
        stats.record_step(true, 100);
        stats.record_step(false, 300);

        assert_eq!(stats.average_step_latency_ms(), 200.0);
        assert_eq!(stats.snapshot().step_errors, 1);
    }

    #[test]
    fn reset_zeroes_counters() {
        let stats = GlobalStats::new();
        stats.record_step(true, 10);
        stats.record_ad_urls(4);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.steps_executed, 0);
        assert_eq!(snap.ad_urls_found, 0);
    }
}
