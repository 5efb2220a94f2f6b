//! Cooperative run cancellation.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation token shared between the caller and a run.
///
/// Cancelling stops new external calls from being scheduled; calls already
/// in flight are allowed to finish.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RunCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Stop signal for one stage: the run's token plus a stage-local halt raised
/// on the first failure.
#[derive(Debug, Clone)]
pub(crate) struct StageStop {
    run: RunCancellation,
    halt: RunCancellation,
}

impl StageStop {
    pub(crate) fn new(run: &RunCancellation) -> Self {
        Self {
            run: run.clone(),
            halt: RunCancellation::new(),
        }
    }

    pub(crate) fn halt(&self) {
        self.halt.cancel();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.run.is_cancelled() || self.halt.is_cancelled()
    }

    pub(crate) async fn stopped(&self) {
        tokio::select! {
            _ = self.run.cancelled() => {}
            _ = self.halt.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = RunCancellation::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("task ok");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = RunCancellation::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("resolves");
    }

    #[tokio::test]
    async fn stage_stop_follows_either_source() {
        let run = RunCancellation::new();
        let stage = StageStop::new(&run);
        assert!(!stage.is_stopped());
        stage.halt();
        assert!(stage.is_stopped());
        assert!(!run.is_cancelled());

        let stage = StageStop::new(&run);
        run.cancel();
        assert!(stage.is_stopped());
        tokio::time::timeout(Duration::from_millis(100), stage.stopped())
            .await
            .expect("resolves");
    }
}
