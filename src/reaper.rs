//! Background sweeper for request timeouts and idle sessions.
//!
//! The reaper is the only component that triggers timeouts. Registered
//! entries are held weakly: an entry disappears once its owner drops it or
//! once [`Reapable::reap`] reports that it no longer needs sweeping. Sweeps
//! use `try_lock`, so an entry currently driven by another thread is skipped
//! until the next interval and the reaper never blocks on application code.

use std::{
    sync::{
        Arc,
        Mutex,
        TryLockError,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State that must be checked periodically for expiry.
pub trait Reapable: Send {
    /// Check for expiry at `now`.
    ///
    /// Returns `true` while the entry is still pending and should be checked
    /// again.
    fn reap(&mut self, now: Instant) -> bool;
}

type Entry = Weak<Mutex<dyn Reapable>>;

/// Handle identifying a registered entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReaperKey(u64);

impl ReaperKey {
    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

/// Counters describing one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries whose state was checked.
    pub checked: usize,
    /// Entries skipped because another thread held them.
    pub busy: usize,
    /// Entries removed because they finished.
    pub finished: usize,
    /// Entries removed because their owner dropped them.
    pub dropped: usize,
}

/// Periodic sweeper over registered [`Reapable`] entries.
#[derive(Debug)]
pub struct TimeoutReaper {
    interval: Duration,
    next_key: AtomicU64,
    entries: DashMap<ReaperKey, Entry>,
}

impl TimeoutReaper {
    /// Create a reaper sweeping every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_key: AtomicU64::new(0),
            entries: DashMap::new(),
        }
    }

    /// Interval between sweeps.
    #[must_use]
    pub fn interval(&self) -> Duration { self.interval }

    /// Number of registered entries, including dropped ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Register `entry` for sweeping.
    pub fn register<R: Reapable + 'static>(&self, entry: &Arc<Mutex<R>>) -> ReaperKey {
        let key = ReaperKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let weak = Arc::downgrade(entry);
        let weak: Entry = weak;
        self.entries.insert(key, weak);
        key
    }

    /// Stop sweeping the entry registered under `key`.
    pub fn deregister(&self, key: ReaperKey) { self.entries.remove(&key); }

    /// Check every registered entry once.
    ///
    /// Entries are collected before any of them is checked, so an entry may
    /// register further entries from within [`Reapable::reap`].
    pub fn sweep(&self, now: Instant) -> SweepStats {
        let snapshot: Vec<(ReaperKey, Entry)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut stats = SweepStats::default();
        for (key, weak) in snapshot {
            let Some(entry) = weak.upgrade() else {
                self.entries.remove(&key);
                stats.dropped += 1;
                continue;
            };
            let mut guard = match entry.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    stats.busy += 1;
                    continue;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    warn!(key = key.as_u64(), "reaping entry whose lock was poisoned");
                    poisoned.into_inner()
                }
            };
            stats.checked += 1;
            if !guard.reap(now) {
                drop(guard);
                self.entries.remove(&key);
                stats.finished += 1;
            }
        }
        if stats != SweepStats::default() {
            debug!(
                checked = stats.checked,
                busy = stats.busy,
                finished = stats.finished,
                dropped = stats.dropped,
                "reaper sweep"
            );
        }
        stats
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,

                    now = ticker.tick() => {
                        self.sweep(now);
                    }
                }
            }
            debug!("timeout reaper stopped");
        })
    }
}
