//! Cancellable one-shot timer slot.

use std::time::Duration;

use tokio::task::JoinHandle;

/// One pending timer, cancelled and replaced whenever rescheduled.
///
/// Each connection carries exactly one of these. Re-arming happens under
/// the owning aggregate's lock, so a cancel and the schedule that replaces
/// it are atomic with respect to state changes. Cancellation is abort-based
/// and can still race a firing in flight; whoever handles the fired timer
/// must re-check the state it was armed against before acting.
#[derive(Debug, Default)]
pub struct CallTimer {
    handle: Option<JoinHandle<()>>,
}

impl CallTimer {
    /// Empty slot, nothing armed.
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Cancel whatever is armed, then arm `on_fire` to run after `delay`.
    pub fn rearm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        }));
    }

    /// Cancel the armed timer, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timer is currently armed (or fired and not yet reaped).
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = CallTimer::new();
        let f = fired.clone();
        timer.rearm(Duration::from_millis(10), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rearm_cancels_previous() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = CallTimer::new();
        let f = fired.clone();
        timer.rearm(Duration::from_millis(20), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        timer.rearm(Duration::from_millis(40), move || {
            f.fetch_add(10, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the replacement fired.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timer = CallTimer::new();
        let f = fired.clone();
        timer.rearm(Duration::from_millis(20), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_armed());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
