//! Coalescing (debounced) task scheduling
//!
//! Each [`CoalescingScheduler::schedule`] call replaces the pending effect and
//! restarts the quiet window; only the last effect of a burst runs. Once the
//! window elapses the effect is spawned on its own task, so a later signal
//! can no longer abort an effect that has started.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Debounce primitive built on a cancellable delayed task
#[derive(Debug)]
pub struct CoalescingScheduler {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CoalescingScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `effect` once the window passes without another call
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, effect: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tokio::spawn(effect());
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            trace!("Coalescing scheduled effect");
            previous.abort();
        }
    }

    /// Drop the pending effect, if its window has not elapsed yet
    pub fn cancel(&self) {
        if let Some(pending) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pending.abort();
        }
    }

    /// True while an effect is waiting for its window to elapse
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for CoalescingScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
