//! Background metadata refresh.
//!
//! Each metadata-backed identity provider (and each federation) owns one
//! [`MetadataRefreshScheduler`]. The scheduler runs a tokio task that reloads
//! the target when its metadata goes stale or when an accessor asks for it.
//! Reloads of one target never overlap, and a failed reload keeps the last
//! published metadata and is retried after the minimum refresh interval.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Something whose metadata can be reloaded.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    /// Name used in log messages.
    fn refresh_name(&self) -> String;

    /// Loads and publishes fresh metadata, returning when it goes stale.
    async fn reload_metadata(&self) -> Result<DateTime<Utc>>;
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Metadata is within its validity window.
    Fresh,
    /// Metadata is past its validity window and a reload is due.
    Stale,
    /// A reload is in progress.
    Reloading,
    /// The last reload failed; the next attempt waits for the retry floor.
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Fresh { due: DateTime<Utc> },
    Reloading,
    Failed { retry_at: DateTime<Utc> },
}

struct Shared {
    phase: Mutex<Phase>,
    notify: Notify,
    min_interval: TimeDelta,
}

impl Shared {
    fn due_at(&self) -> Option<DateTime<Utc>> {
        match *self.phase.lock() {
            Phase::Fresh { due } => Some(due),
            Phase::Failed { retry_at } => Some(retry_at),
            Phase::Reloading => None,
        }
    }

    /// Moves to `Reloading` if a reload is due now.
    fn begin_reload(&self) -> bool {
        let mut phase = self.phase.lock();
        let due = match *phase {
            Phase::Fresh { due } => due,
            Phase::Failed { retry_at } => retry_at,
            Phase::Reloading => return false,
        };
        if Utc::now() < due {
            return false;
        }
        *phase = Phase::Reloading;
        true
    }

    fn finish_reload(&self, name: &str, result: Result<DateTime<Utc>>) {
        let floor = Utc::now() + self.min_interval;
        let next = match result {
            Ok(valid_until) => {
                info!("Reloaded metadata for {}, valid until {}", name, valid_until);
                Phase::Fresh {
                    due: valid_until.max(floor),
                }
            }
            Err(e) => {
                warn!(
                    "Reloading metadata for {} failed, keeping previous metadata: {}",
                    name, e
                );
                Phase::Failed { retry_at: floor }
            }
        };
        *self.phase.lock() = next;
    }
}

/// Per-target background refresh task.
///
/// Dropping the scheduler stops the task.
pub struct MetadataRefreshScheduler {
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl MetadataRefreshScheduler {
    /// Starts refreshing `target`, whose current metadata is valid until
    /// `valid_until`. Reload attempts are at least `min_interval` apart.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(target: Weak<dyn RefreshTarget>, valid_until: DateTime<Utc>, min_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            phase: Mutex::new(Phase::Fresh { due: valid_until }),
            notify: Notify::new(),
            min_interval: to_delta(min_interval),
        });
        let handle = tokio::spawn(run(target, shared.clone()));
        Self { shared, handle }
    }

    /// Asks for a reload if one is due. Does nothing while a reload is in
    /// progress or before the retry floor of a failed one has passed.
    pub fn trigger(&self) {
        if self.state() == RefreshState::Stale {
            self.shared.notify.notify_one();
        }
    }

    pub fn state(&self) -> RefreshState {
        match *self.shared.phase.lock() {
            Phase::Fresh { due } if Utc::now() >= due => RefreshState::Stale,
            Phase::Fresh { .. } => RefreshState::Fresh,
            Phase::Reloading => RefreshState::Reloading,
            Phase::Failed { .. } => RefreshState::Failed,
        }
    }
}

impl Drop for MetadataRefreshScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(target: Weak<dyn RefreshTarget>, shared: Arc<Shared>) {
    loop {
        let wait = shared
            .due_at()
            .map(|due| (due - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.notify.notified() => {}
        }

        if !shared.begin_reload() {
            continue;
        }
        let Some(target) = target.upgrade() else {
            debug!("Refresh target dropped, stopping metadata refresh");
            return;
        };
        let name = target.refresh_name();
        debug!("Reloading metadata for {}", name);
        let result = target.reload_metadata().await;
        drop(target);
        shared.finish_reload(&name, result);
    }
}

/// When freshly loaded metadata goes stale: the earlier of its own
/// `validUntil` and `now + cacheDuration`, or `now + default_cache_duration`
/// when it states neither.
pub fn metadata_valid_until(
    now: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    cache_duration: Option<TimeDelta>,
    default_cache_duration: Duration,
) -> DateTime<Utc> {
    let cached = cache_duration.map(|d| now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC));
    match (valid_until, cached) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => now
            .checked_add_signed(to_delta(default_cache_duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

/// Converts a configured interval, saturating at a century.
pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SamlError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        reloads: AtomicUsize,
        fail: bool,
        delay: Duration,
        validity: TimeDelta,
    }

    impl Counter {
        fn new(fail: bool, delay: Duration, validity: TimeDelta) -> Arc<Self> {
            Arc::new(Self {
                reloads: AtomicUsize::new(0),
                fail,
                delay,
                validity,
            })
        }
    }

    #[async_trait]
    impl RefreshTarget for Counter {
        fn refresh_name(&self) -> String {
            "counter".into()
        }

        async fn reload_metadata(&self) -> Result<DateTime<Utc>> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(SamlError::Configuration("unreachable".into()))
            } else {
                Ok(Utc::now() + self.validity)
            }
        }
    }

    fn scheduler(target: &Arc<Counter>, valid_until: DateTime<Utc>, min_interval: Duration) -> MetadataRefreshScheduler {
        let weak: Weak<dyn RefreshTarget> = Arc::downgrade(target) as Weak<dyn RefreshTarget>;
        MetadataRefreshScheduler::spawn(weak, valid_until, min_interval)
    }

    #[tokio::test]
    async fn test_fresh_metadata_is_not_reloaded() {
        let target = Counter::new(false, Duration::ZERO, TimeDelta::hours(1));
        let scheduler = scheduler(&target, Utc::now() + TimeDelta::hours(1), Duration::from_millis(10));
        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), RefreshState::Fresh);
        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_metadata_reloads_in_background() {
        let target = Counter::new(false, Duration::ZERO, TimeDelta::hours(1));
        let scheduler = scheduler(&target, Utc::now() - TimeDelta::seconds(1), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), RefreshState::Fresh);
    }

    #[tokio::test]
    async fn test_trigger_while_reloading_is_noop() {
        let target = Counter::new(false, Duration::from_millis(200), TimeDelta::hours(1));
        let scheduler = scheduler(&target, Utc::now() - TimeDelta::seconds(1), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), RefreshState::Reloading);
        for _ in 0..5 {
            scheduler.trigger();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), RefreshState::Fresh);
    }

    #[tokio::test]
    async fn test_failed_reload_retries_after_floor() {
        let target = Counter::new(true, Duration::ZERO, TimeDelta::hours(1));
        let scheduler = scheduler(&target, Utc::now() - TimeDelta::seconds(1), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), RefreshState::Failed);
        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);

        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(target.reloads.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_short_validity_is_floored() {
        let target = Counter::new(false, Duration::ZERO, TimeDelta::zero());
        let _scheduler = scheduler(&target, Utc::now() - TimeDelta::seconds(1), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        let reloads = target.reloads.load(Ordering::SeqCst);
        assert!((2..=4).contains(&reloads), "{reloads} reloads");
    }

    #[tokio::test]
    async fn test_drop_stops_task() {
        let target = Counter::new(false, Duration::ZERO, TimeDelta::hours(1));
        let scheduler = scheduler(&target, Utc::now() + TimeDelta::milliseconds(50), Duration::from_millis(10));
        drop(scheduler);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata_valid_until() {
        let now = Utc::now();
        let default = Duration::from_secs(900);
        assert_eq!(metadata_valid_until(now, None, None, default), now + TimeDelta::minutes(15));
        assert_eq!(
            metadata_valid_until(now, None, Some(TimeDelta::minutes(5)), default),
            now + TimeDelta::minutes(5)
        );
        assert_eq!(
            metadata_valid_until(now, Some(now + TimeDelta::minutes(1)), Some(TimeDelta::minutes(5)), default),
            now + TimeDelta::minutes(1)
        );
        assert_eq!(
            metadata_valid_until(now, Some(now + TimeDelta::hours(1)), None, default),
            now + TimeDelta::hours(1)
        );
    }
}
