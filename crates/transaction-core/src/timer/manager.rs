//! The timer scheduling primitive
//!
//! `schedule(delay, interval, callback) -> handle` / `cancel(&handle)`.
//! Each scheduled timer runs as its own tokio task. Cancellation and firing
//! race: the task re-checks its registration (id + generation) immediately
//! before invoking the callback, so once `cancel` has returned the callback
//! will not be delivered. Callback panics are caught and logged; they never
//! take down the timer task of another timer or the scheduler itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, trace};

/// Handle to a scheduled timer, used for cancellation
///
/// The generation id makes handles unambiguous: a handle from an earlier
/// registration of a reused id can never cancel or be confused with a later
/// timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    id: u64,
    generation: u64,
}

struct ActiveTimer {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Schedules one-shot and periodic callbacks
///
/// Every stack instance owns its own `TimerManager`; there is no process
/// global. Dropping the manager (or calling [`TimerManager::cancel_all`])
/// aborts all pending timers without delivering their callbacks, which is
/// what the stack's hard-stop semantics require.
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<TimerManagerInner>,
}

struct TimerManagerInner {
    next_id: AtomicU64,
    next_generation: AtomicU64,
    active: DashMap<u64, ActiveTimer>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager {
            inner: Arc::new(TimerManagerInner {
                next_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                active: DashMap::new(),
            }),
        }
    }

    /// Schedules `callback` to run after `delay`, then every `interval` if
    /// one is given. Returns a handle for cancellation.
    pub fn schedule<F>(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: F,
    ) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        // Register before spawning so the task always finds its entry
        self.inner.active.insert(
            id,
            ActiveTimer {
                generation,
                task: None,
            },
        );

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                // A cancel that won the race removed the registration;
                // deliver nothing in that case.
                let still_registered = inner
                    .active
                    .get(&id)
                    .map(|t| t.generation == generation)
                    .unwrap_or(false);
                if !still_registered {
                    trace!(timer = id, "timer cancelled before firing");
                    return;
                }

                if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    error!(timer = id, "timer callback panicked");
                }

                match interval {
                    Some(period) => tokio::time::sleep(period).await,
                    None => {
                        inner
                            .active
                            .remove_if(&id, |_, t| t.generation == generation);
                        return;
                    }
                }
            }
        });

        // If a concurrent cancel already removed the entry, stop the task
        match self.inner.active.get_mut(&id) {
            Some(mut entry) if entry.generation == generation => {
                entry.task = Some(task);
            }
            _ => task.abort(),
        }

        TimerHandle { id, generation }
    }

    /// Cancels a scheduled timer. After this returns, the callback will not
    /// run again (and not at all if it had not yet fired). Cancelling an
    /// already-fired one-shot or an already-cancelled timer is a no-op.
    pub fn cancel(&self, handle: &TimerHandle) {
        if let Some((_, timer)) = self
            .inner
            .active
            .remove_if(&handle.id, |_, t| t.generation == handle.generation)
        {
            if let Some(task) = timer.task {
                task.abort();
            }
        }
    }

    /// Aborts every pending timer without delivering callbacks (hard stop)
    pub fn cancel_all(&self) {
        self.inner.active.retain(|_, timer| {
            if let Some(task) = timer.task.take() {
                task.abort();
            }
            false
        });
    }

    /// Number of currently registered timers
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("active", &self.inner.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[tokio::test]
    async fn one_shot_fires_once_and_deregisters() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        manager.schedule(Duration::from_millis(10), None, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn periodic_fires_repeatedly_until_cancelled() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let handle = manager.schedule(
            Duration::from_millis(5),
            Some(Duration::from_millis(5)),
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        sleep(Duration::from_millis(60)).await;
        manager.cancel(&handle);
        let count_at_cancel = fired.load(Ordering::SeqCst);
        assert!(count_at_cancel >= 2, "expected repeated firings, got {}", count_at_cancel);

        sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), count_at_cancel);
    }

    #[tokio::test]
    async fn cancel_before_firing_suppresses_callback() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let handle = manager.schedule(Duration::from_millis(30), None, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        manager.cancel(&handle);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn callback_panic_does_not_poison_other_timers() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        manager.schedule(Duration::from_millis(5), None, || {
            panic!("deliberate test panic");
        });
        manager.schedule(Duration::from_millis(20), None, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_drops_everything() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let fired = fired.clone();
            manager.schedule(Duration::from_millis(30), None, move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
