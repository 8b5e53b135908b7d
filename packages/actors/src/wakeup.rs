//! Scheduled wake-ups for batch jobs that yielded their quantum.
//!
//! A scheduler holds at most one pending wake-up. Scheduling again replaces
//! the previous one. When the wake-up fires, the callback registered with
//! [`WakeUpScheduler::on_fire`] runs; the queue actor registers one that
//! sends itself [`QueueMessage::WakeUp`](crate::QueueMessage::WakeUp).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// Callback invoked when a wake-up fires.
pub type WakeUpCallback = Arc<dyn Fn() + Send + Sync>;

/// One-shot wake-up facility.
pub trait WakeUpScheduler: Send + Sync + 'static {
    /// Request a single wake-up at `at`, replacing any pending one.
    fn schedule_once(&self, at: DateTime<Utc>);

    /// Drop the pending wake-up, if any.
    fn cancel(&self);

    /// The pending wake-up time.
    fn pending(&self) -> Option<DateTime<Utc>>;

    /// Set the callback run when a wake-up fires.
    fn on_fire(&self, callback: WakeUpCallback);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct TimerSlot {
    at: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
    callback: Option<WakeUpCallback>,
}

/// In-process timer backed by a tokio task.
///
/// Does not survive a restart by itself; the queue actor re-arms it from the
/// persisted batch checkpoint on startup.
#[derive(Clone, Default)]
pub struct TimerWakeUp {
    slot: Arc<Mutex<TimerSlot>>,
}

impl TimerWakeUp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WakeUpScheduler for TimerWakeUp {
    fn schedule_once(&self, at: DateTime<Utc>) {
        let mut slot = lock(&self.slot);
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.at = Some(at);

        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let shared = self.slot.clone();
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let callback = {
                let mut slot = lock(&shared);
                if slot.at != Some(at) {
                    return;
                }
                slot.at = None;
                slot.task = None;
                slot.callback.clone()
            };

            match callback {
                Some(callback) => callback(),
                None => tracing::warn!("Wake-up at {} fired with no callback", at),
            }
        }));
    }

    fn cancel(&self) {
        let mut slot = lock(&self.slot);
        slot.at = None;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
    }

    fn pending(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot).at
    }

    fn on_fire(&self, callback: WakeUpCallback) {
        lock(&self.slot).callback = Some(callback);
    }
}

#[derive(Default)]
struct ExternalSlot {
    at: Option<DateTime<Utc>>,
    callback: Option<WakeUpCallback>,
}

/// Scheduler driven from outside the process.
///
/// Only records the requested time. A cron job or delayed message reads
/// [`WakeUpScheduler::pending`] and calls [`ExternalWakeUp::fire`] (or
/// `QueueClient::wake_up`) once it is due.
#[derive(Clone, Default)]
pub struct ExternalWakeUp {
    slot: Arc<Mutex<ExternalSlot>>,
}

impl ExternalWakeUp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the pending wake-up and run the callback.
    ///
    /// Returns `false` when nothing was pending.
    pub fn fire(&self) -> bool {
        let callback = {
            let mut slot = lock(&self.slot);
            if slot.at.take().is_none() {
                return false;
            }
            slot.callback.clone()
        };

        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

impl WakeUpScheduler for ExternalWakeUp {
    fn schedule_once(&self, at: DateTime<Utc>) {
        lock(&self.slot).at = Some(at);
    }

    fn cancel(&self) {
        lock(&self.slot).at = None;
    }

    fn pending(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot).at
    }

    fn on_fire(&self, callback: WakeUpCallback) {
        lock(&self.slot).callback = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, WakeUpCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let callback: WakeUpCallback = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[tokio::test]
    async fn timer_keeps_only_the_latest_wake_up() {
        let timer = TimerWakeUp::new();
        let (count, callback) = counter();
        timer.on_fire(callback);

        let now = Utc::now();
        timer.schedule_once(now + chrono::Duration::milliseconds(20));
        timer.schedule_once(now + chrono::Duration::milliseconds(40));
        assert!(timer.pending().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(timer.pending().is_none());
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let timer = TimerWakeUp::new();
        let (count, callback) = counter();
        timer.on_fire(callback);

        timer.schedule_once(Utc::now() + chrono::Duration::milliseconds(20));
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn external_fire_consumes_pending() {
        let external = ExternalWakeUp::new();
        let (count, callback) = counter();
        external.on_fire(callback);

        assert!(!external.fire());
        external.schedule_once(Utc::now());
        assert!(external.fire());
        assert!(!external.fire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
