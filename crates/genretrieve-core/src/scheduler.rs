//! Background archive scheduler (spec.md §4.11).
//!
//! A long-lived task that fires on a cron-like schedule (default daily at
//! 02:00 local) or on an explicit `archive_now` request, and calls into the
//! owning store's archive routine with a bounded batch size and run-time
//! budget so one run can't monopolise the worker.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DEFAULT_ARCHIVE_AGE_DAYS: i64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_RUN_BUDGET_SECS: u64 = 30 * 60;

/// A parsed daily local time (`hour`, `minute`), the only schedule shape
/// this scheduler supports — matching spec.md's "cron-like expression,
/// default daily at 02:00" without pulling in a full cron grammar for one
/// use site.
#[derive(Debug, Clone, Copy)]
pub struct DailySchedule {
    pub hour: u32,
    pub minute: u32,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

impl DailySchedule {
    /// Seconds until this schedule's next firing, given the current
    /// "seconds since local midnight". Injected rather than read from the
    /// system clock so this stays testable.
    pub fn seconds_until_next(&self, seconds_since_local_midnight: u32) -> u64 {
        let target = self.hour * 3600 + self.minute * 60;
        let day = 24 * 3600;
        if target as u32 > seconds_since_local_midnight {
            (target - seconds_since_local_midnight) as u64
        } else {
            (day - seconds_since_local_midnight + target) as u64
        }
    }
}

/// Outcome of one archive run, as returned by the caller-supplied archive
/// function and relayed to whoever's watching.
#[derive(Debug, Clone, Default)]
pub struct ArchiveRunStats {
    pub archived: usize,
    pub hot_before: usize,
    pub hot_after: usize,
    pub batches_run: usize,
    pub budget_exhausted: bool,
}

enum SchedulerSignal {
    ArchiveNow,
    Shutdown,
}

/// Handle used by callers to request an out-of-band archive run or shut
/// the scheduler down; the task itself lives in the background.
pub struct ArchiveSchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerSignal>,
}

impl ArchiveSchedulerHandle {
    pub fn archive_now(&self) {
        let _ = self.tx.send(SchedulerSignal::ArchiveNow);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerSignal::Shutdown);
    }
}

/// Spawns the background task. `run_archive` is called once per firing
/// (either the timer or an explicit `archive_now`) and is expected to run
/// the batched archive loop itself, respecting `batch_size` and
/// `run_budget`; this scheduler only decides *when* to call it.
pub fn spawn<F, Fut>(
    schedule: DailySchedule,
    seconds_until_first_fire: u64,
    run_archive: F,
) -> ArchiveSchedulerHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ArchiveRunStats> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerSignal>();

    tokio::spawn(async move {
        let mut next_fire = Instant::now() + Duration::from_secs(seconds_until_first_fire);
        loop {
            tokio::select! {
                signal = rx.recv() => {
                    match signal {
                        Some(SchedulerSignal::ArchiveNow) => {
                            run_archive().await;
                        }
                        Some(SchedulerSignal::Shutdown) | None => break,

                    }
                }
                _ = tokio::time::sleep_until(next_fire) => {
                    run_archive().await;
                    next_fire = Instant::now() + Duration::from_secs(schedule.seconds_until_next(0).max(1));
                }
            }
        }
    });

    ArchiveSchedulerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_until_next_same_day() {
        let schedule = DailySchedule { hour: 2, minute: 0 };
        // 1am local -> 1 hour until 2am
        assert_eq!(schedule.seconds_until_next(3600), 3600);
    }

    #[test]
    fn seconds_until_next_wraps_to_tomorrow() {
        let schedule = DailySchedule { hour: 2, minute: 0 };
        // 3am local -> 23 hours until 2am tomorrow
        let expected = 23 * 3600;
        assert_eq!(schedule.seconds_until_next(3 * 3600), expected);
    }

    #[tokio::test]
    async fn archive_now_triggers_the_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handle = spawn(DailySchedule::default(), 3600, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ArchiveRunStats::default()
            }
        });

        handle.archive_now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.shutdown();
    }
}
