//! Cancellation shared between the Ctrl-C listener and the orchestrator
//!
//! Once set the flag stays set, so a stage that starts after Ctrl-C was
//! pressed fails immediately instead of consuming a stale wake-up later.

use crate::error::{LaunchError, LaunchResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`CancelFlag::cancel`] was called
    pub fn check(&self) -> LaunchResult<()> {
        if self.is_cancelled() {
            Err(LaunchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the flag is set, immediately if it already is
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before reading the flag so a concurrent cancel is not lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Drive `work` to completion unless cancelled first.
    ///
    /// `work` is dropped on cancellation.
    pub async fn guard<T, F>(&self, work: F) -> LaunchResult<T>
    where
        F: Future<Output = LaunchResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(LaunchError::Cancelled),
            result = work => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn check_reports_cancellation() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.clone().cancel();
        assert!(matches!(flag.check(), Err(LaunchError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_skips_work_when_already_cancelled() {
        let flag = CancelFlag::new();
        flag.cancel();
        let result = flag
            .guard(async { Ok::<_, LaunchError>(1) })
            .await;
        assert!(matches!(result, Err(LaunchError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_interrupts_pending_work() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let result = flag
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LaunchError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_returns_work_result() {
        let flag = CancelFlag::new();
        assert_eq!(flag.guard(async { Ok(7) }).await.unwrap(), 7);
    }
}
