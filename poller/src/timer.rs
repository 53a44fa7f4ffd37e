//! Per-poll deadline timer that can be paused and resumed.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub(crate) struct Deadline {
    expires_at: Instant,
    paused_remaining: Option<Duration>,
    task: Option<JoinHandle<()>>,
}

impl Deadline {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            expires_at: Instant::now() + duration,
            paused_remaining: None,
            task: None,
        }
    }

    /// Schedule `on_expiry` at the current expiry time, replacing any
    /// previously armed callback.
    pub(crate) fn arm<F>(&mut self, runtime: &Handle, on_expiry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let at = self.expires_at;
        self.task = Some(runtime.spawn(async move {
            sleep_until(at).await;
            on_expiry();
        }));
    }

    /// Stop the clock, remembering how much time was left.
    pub(crate) fn pause(&mut self) {
        if self.paused_remaining.is_none() {
            self.paused_remaining = Some(self.remaining());
        }
        self.cancel();
    }

    /// Restart the clock with the time left at `pause`. The caller re-arms.
    pub(crate) fn resume(&mut self) {
        if let Some(remaining) = self.paused_remaining.take() {
            self.expires_at = Instant::now() + remaining;
        }
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.paused_remaining
            .unwrap_or_else(|| self.expires_at.saturating_duration_since(Instant::now()))
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut deadline = Deadline::new(Duration::from_secs(10));
        let flag = fired.clone();
        deadline.arm(&Handle::current(), move || flag.store(true, Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_preserves_remaining_time() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut deadline = Deadline::new(Duration::from_secs(10));
        let flag = fired.clone();
        deadline.arm(&Handle::current(), move || flag.store(true, Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(4)).await;
        deadline.pause();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(deadline.remaining(), Duration::from_secs(6));

        deadline.resume();
        let flag = fired.clone();
        deadline.arm(&Handle::current(), move || flag.store(true, Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut deadline = Deadline::new(Duration::from_secs(1));
        let flag = fired.clone();
        deadline.arm(&Handle::current(), move || flag.store(true, Ordering::SeqCst));
        deadline.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
