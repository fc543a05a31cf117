//! Retention reaper: periodic deletion of records older than the window.
//!
//! The reaper runs on its own thread and only talks to the engine through its
//! public operations, so it is serialized with writers and readers by the
//! engine lock. Stopping suppresses future cycles; a cycle already running
//! finishes first.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::storage::{PurgeSummary, StorageEngine, StorageError, Timestamp};

// =============================================================================
// Constants
// =============================================================================

/// Default retention window (14 days).
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Default delay before the first cycle (10 seconds).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Default period between cycles (1 day).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Clock
// =============================================================================

/// Source of "now" for cutoff computation.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Policy
// =============================================================================

/// When and how far back the reaper purges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age of kept records. Zero disables retention.
    pub window: Duration,
    /// Delay before the first cycle.
    pub initial_delay: Duration,
    /// Period between cycle starts.
    pub period: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_RETENTION_WINDOW,
            initial_delay: DEFAULT_INITIAL_DELAY,
            period: DEFAULT_PERIOD,
        }
    }
}

impl RetentionPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Records strictly older than the returned timestamp are expired at `now`.
    pub fn cutoff(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(duration_millis(self.window))
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// =============================================================================
// Task
// =============================================================================

/// Snapshot of reaper activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaperStats {
    /// Cycles executed, failed ones included.
    pub runs: u64,
    /// Cycles that failed or left a region unpurged.
    pub failed_runs: u64,
    /// Rows deleted by the most recent cycle.
    pub last_deleted: u64,
    /// Rows deleted over the reaper's lifetime.
    pub total_deleted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    failed_runs: AtomicU64,
    last_deleted: AtomicU64,
    total_deleted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReaperStats {
        ReaperStats {
            runs: self.runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            last_deleted: self.last_deleted.load(Ordering::Relaxed),
            total_deleted: self.total_deleted.load(Ordering::Relaxed),
        }
    }
}

/// One retention cycle, runnable on demand or from the reaper thread.
#[derive(Clone)]
pub struct RetentionTask {
    engine: Arc<StorageEngine>,
    clock: Arc<dyn Clock>,
    window: Duration,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for RetentionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionTask")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RetentionTask {
    pub fn new(engine: Arc<StorageEngine>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            engine,
            clock,
            window,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Delete everything older than `now - window`.
    pub fn run_once(&self) -> Result<PurgeSummary, StorageError> {
        let cutoff = RetentionPolicy::new(self.window).cutoff(self.clock.now_millis());
        let result = self.engine.delete_records_before(cutoff);

        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(summary) => {
                let deleted = summary.deleted as u64;
                self.counters.last_deleted.store(deleted, Ordering::Relaxed);
                self.counters.total_deleted.fetch_add(deleted, Ordering::Relaxed);
                if !summary.is_complete() {
                    self.counters.failed_runs.fetch_add(1, Ordering::Relaxed);
                }
                tracing::info!(
                    deleted,
                    failed_regions = summary.failures.len(),
                    cutoff = %format_millis(cutoff),
                    "Deleted records before cutoff"
                );
            }
            Err(e) => {
                self.counters.last_deleted.store(0, Ordering::Relaxed);
                self.counters.failed_runs.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Error while deleting old records");
            }
        }
        result
    }

    pub fn stats(&self) -> ReaperStats {
        self.counters.snapshot()
    }
}

fn format_millis(ts: Timestamp) -> String {
    DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

// =============================================================================
// Reaper
// =============================================================================

/// Handle to the scheduled retention thread.
pub struct RetentionReaper {
    task: RetentionTask,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RetentionReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionReaper")
            .field("task", &self.task)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl RetentionReaper {
    /// Schedule retention cycles for `engine` according to `policy`.
    ///
    /// Returns `Ok(None)` when the policy's window is zero: nothing is
    /// scheduled and no cycle ever runs.
    ///
    /// # Errors
    /// `InvalidRetention` if retention is enabled with a zero period.
    pub fn spawn(
        engine: Arc<StorageEngine>,
        clock: Arc<dyn Clock>,
        policy: RetentionPolicy,
    ) -> Result<Option<Self>, StorageError> {
        if !policy.is_enabled() {
            tracing::info!("Retention disabled, reaper not scheduled");
            return Ok(None);
        }
        if policy.period.is_zero() {
            return Err(StorageError::InvalidRetention(
                "period must be non-zero when retention is enabled".to_string(),
            ));
        }

        let task = RetentionTask::new(engine, clock, policy.window);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = task.clone();

        let handle = thread::Builder::new()
            .name("retention-reaper".to_string())
            .spawn(move || {
                tracing::info!(
                    window = ?policy.window,
                    period = ?policy.period,
                    "Retention reaper started"
                );
                let mut next_run = Instant::now() + policy.initial_delay;
                loop {
                    let timeout = next_run.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Failures are recorded by the task; the schedule continues.
                            let _ = worker.run_once();
                            next_run += policy.period;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("Retention reaper stopped");
            })
            .map_err(|e| StorageError::Internal(format!("failed to spawn reaper thread: {e}")))?;

        Ok(Some(Self {
            task,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }))
    }

    pub fn stats(&self) -> ReaperStats {
        self.task.stats()
    }

    /// Suppress future cycles and wait for the thread to exit.
    ///
    /// A cycle in progress runs to completion before this returns.
    pub fn stop(mut self) -> Result<(), StorageError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), StorageError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| StorageError::Internal("Failed to join reaper thread".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for RetentionReaper {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Channel, LogRecord, RegionKind, Value, ValueType};
    use tempfile::tempdir;

    fn engine_with_samples(
        timestamps: &[Timestamp],
    ) -> (tempfile::TempDir, Arc<StorageEngine>) {
        let dir = tempdir().unwrap();
        let engine =
            Arc::new(StorageEngine::open(dir.path().join("ret.db").to_str().unwrap()).unwrap());
        engine
            .upsert_channel(&Channel::new("temp", ValueType::Double))
            .unwrap();
        for &ts in timestamps {
            engine
                .write_batch(
                    RegionKind::Double,
                    &[LogRecord::new("temp", Value::Double(1.0), ts)],
                    ts,
                )
                .unwrap();
        }
        (dir, engine)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_policy_cutoff() {
        let policy = RetentionPolicy::new(Duration::from_secs(10));
        assert_eq!(policy.cutoff(60_000), 50_000);
        assert!(policy.is_enabled());
        assert!(!RetentionPolicy::new(Duration::ZERO).is_enabled());
        assert_eq!(policy.period, DEFAULT_PERIOD);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
    }

    #[test]
    fn test_run_once_deletes_expired() {
        let (_dir, engine) = engine_with_samples(&[1_000, 4_000, 5_000]);
        let clock = Arc::new(ManualClock::new(10_000));
        let task = RetentionTask::new(Arc::clone(&engine), clock.clone(), Duration::from_secs(6));

        let summary = task.run_once().unwrap();
        assert_eq!(summary.deleted, 1);

        let remaining: Vec<_> = engine
            .get_records("temp", 0, i64::MAX)
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(remaining, vec![4_000, 5_000]);

        clock.advance(Duration::from_millis(500));
        task.run_once().unwrap();
        assert_eq!(
            task.stats(),
            ReaperStats {
                runs: 2,
                failed_runs: 0,
                last_deleted: 1,
                total_deleted: 2,
            }
        );
    }

    #[test]
    fn test_failed_cycle_is_counted() {
        let (_dir, engine) = engine_with_samples(&[]);
        engine.disconnect().unwrap();
        let task = RetentionTask::new(engine, Arc::new(SystemClock), Duration::from_secs(1));

        assert!(matches!(task.run_once(), Err(StorageError::NotConnected)));
        assert_eq!(task.stats().failed_runs, 1);
    }

    #[test]
    fn test_partial_purge_counts_as_failed_run() {
        let (_dir, engine) = engine_with_samples(&[1_000, 9_000]);
        engine.execute_batch("DROP TABLE bool_values").unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let task = RetentionTask::new(Arc::clone(&engine), clock, Duration::from_secs(5));

        let summary = task.run_once().unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, RegionKind::Bool);

        let stats = task.stats();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.total_deleted, 1);
    }

    #[test]
    fn test_zero_window_is_not_scheduled() {
        let (_dir, engine) = engine_with_samples(&[1, 2, 3]);
        let clock = Arc::new(ManualClock::new(0));
        let policy = RetentionPolicy::new(Duration::ZERO)
            .with_initial_delay(Duration::ZERO)
            .with_period(Duration::from_millis(1));

        let reaper = RetentionReaper::spawn(Arc::clone(&engine), clock.clone(), policy).unwrap();
        assert!(reaper.is_none());

        clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.get_records("temp", 0, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_reaper_runs_periodically() {
        let (_dir, engine) = engine_with_samples(&[1_000, 2_000]);
        let clock = Arc::new(ManualClock::new(2_500));
        let policy = RetentionPolicy::new(Duration::from_secs(1))
            .with_initial_delay(Duration::ZERO)
            .with_period(Duration::from_millis(10));

        let reaper = RetentionReaper::spawn(Arc::clone(&engine), clock.clone(), policy)
            .unwrap()
            .unwrap();
        let task = reaper.task.clone();
        wait_for(|| reaper.stats().runs >= 1);
        wait_for(|| engine.get_records("temp", 0, 10_000).unwrap().len() == 1);

        clock.advance(Duration::from_secs(1));
        wait_for(|| engine.get_records("temp", 0, 10_000).unwrap().is_empty());
        reaper.stop().unwrap();

        let stats = task.stats();
        assert_eq!(stats.total_deleted, 2);
        assert_eq!(stats.failed_runs, 0);
    }

    #[test]
    fn test_reaper_survives_failed_cycles() {
        let (_dir, engine) = engine_with_samples(&[]);
        engine.disconnect().unwrap();
        let policy = RetentionPolicy::new(Duration::from_secs(1))
            .with_initial_delay(Duration::ZERO)
            .with_period(Duration::from_millis(5));

        let reaper = RetentionReaper::spawn(engine, Arc::new(SystemClock), policy)
            .unwrap()
            .unwrap();
        let task = reaper.task.clone();
        wait_for(|| reaper.stats().runs >= 3);
        reaper.stop().unwrap();

        let stats = task.stats();
        assert_eq!(stats.failed_runs, stats.runs);
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let (_dir, engine) = engine_with_samples(&[1]);
        let policy = RetentionPolicy::new(Duration::from_secs(1)).with_period(Duration::ZERO);

        let result = RetentionReaper::spawn(Arc::clone(&engine), Arc::new(SystemClock), policy);
        assert!(matches!(result, Err(StorageError::InvalidRetention(_))));

        // Disabled retention ignores the period.
        let disabled = RetentionPolicy::new(Duration::ZERO).with_period(Duration::ZERO);
        assert!(
            RetentionReaper::spawn(engine, Arc::new(SystemClock), disabled)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_stop_suppresses_future_cycles() {
        let (_dir, engine) = engine_with_samples(&[]);
        let policy = RetentionPolicy::new(Duration::from_secs(1))
            .with_initial_delay(Duration::from_secs(3600));

        let reaper = RetentionReaper::spawn(engine, Arc::new(SystemClock), policy)
            .unwrap()
            .unwrap();
        let task = reaper.task.clone();
        reaper.stop().unwrap();
        assert_eq!(task.stats().runs, 0);
    }
}
