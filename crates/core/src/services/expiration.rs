//! In-process poll timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// One sleeping task per active poll.
///
/// When a timer fires, the poll id is sent over the channel returned by
/// [`ExpirationScheduler::new`]; the poll engine's expiration worker reads it
/// and runs the guarded transition. A lost timer is harmless because the
/// periodic sweep expires overdue polls as well.
#[derive(Clone)]
pub struct ExpirationScheduler {
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    fired: mpsc::UnboundedSender<String>,
}

impl ExpirationScheduler {
    /// Create a scheduler and the receiving end of its fired-timer channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: Arc::new(Mutex::new(HashMap::new())),
                fired,
            },
            rx,
        )
    }

    /// Arm a timer for `poll_id`, replacing any previous one.
    pub async fn schedule(&self, poll_id: &str, after: Duration) {
        let timers = Arc::clone(&self.timers);
        let fired = self.fired.clone();
        let id = poll_id.to_string();

        let mut guard = self.timers.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            timers.lock().await.remove(&id);
            if fired.send(id).is_err() {
                tracing::warn!("Expiration worker is gone, dropping fired timer");
            }
        });

        if let Some(previous) = guard.insert(poll_id.to_string(), handle) {
            previous.abort();
        }
        tracing::debug!(poll_id = %poll_id, after_secs = after.as_secs(), "Armed poll timer");
    }

    /// Disarm the timer of `poll_id`. Returns whether one was pending.
    pub async fn cancel(&self, poll_id: &str) -> bool {
        match self.timers.lock().await.remove(poll_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of armed timers.
    pub async fn pending(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Whether `poll_id` has an armed timer.
    pub async fn is_scheduled(&self, poll_id: &str) -> bool {
        self.timers.lock().await.contains_key(poll_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (scheduler, mut rx) = ExpirationScheduler::new();
        scheduler.schedule("poll1", Duration::from_secs(30)).await;
        assert!(scheduler.is_scheduled("poll1").await);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await.unwrap(), "poll1");
        assert_eq!(scheduler.pending().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (scheduler, mut rx) = ExpirationScheduler::new();
        scheduler.schedule("poll1", Duration::from_secs(30)).await;

        assert!(scheduler.cancel("poll1").await);
        assert!(!scheduler.cancel("poll1").await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let (scheduler, mut rx) = ExpirationScheduler::new();
        scheduler.schedule("poll1", Duration::from_secs(10)).await;
        scheduler.schedule("poll1", Duration::from_secs(50)).await;
        assert_eq!(scheduler.pending().await, 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await.unwrap(), "poll1");
    }
}
