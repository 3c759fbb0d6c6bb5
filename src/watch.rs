//! Single-slot background task with cooperative cancellation.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::SyncError;

/// Default capacity of watch stream channels.
pub const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug)]
struct WatchTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Holds at most one running watch loop.
///
/// The mutex is only held for the check-and-set in [`start`](Self::start) and the take in
/// [`stop`](Self::stop), never across an await.
#[derive(Debug, Default)]
pub(crate) struct WatchSlot {
    task: Mutex<Option<WatchTask>>,
}

impl WatchSlot {
    fn lock(&self) -> MutexGuard<'_, Option<WatchTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `run` unless a loop is still running. A loop that already returned on its own
    /// (e.g. because its stream was dropped) does not block a restart.
    pub(crate) fn start<F, Fut>(&self, run: F) -> Result<(), SyncError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Err(SyncError::AlreadyStarted);
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        *slot = Some(WatchTask { cancel, handle });
        Ok(())
    }

    /// Requests the loop to exit and waits until it has returned.
    pub(crate) async fn stop(&self) {
        let task = self.lock().take();
        let Some(task) = task else {
            return;
        };
        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            error!(error = %err, "Watch loop terminated abnormally");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.handle.is_finished())
    }
}

/// Sleeps for `interval`. Returns `false` if `cancel` fired first.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[tokio::test]
    async fn second_start_fails_while_running() {
        let slot = WatchSlot::default();
        slot.start(|cancel| async move { cancel.cancelled().await }).unwrap();

        let second = slot.start(|_| async {});
        assert!(matches!(second, Err(SyncError::AlreadyStarted)));
        assert!(slot.is_running());

        slot.stop().await;
        assert!(!slot.is_running());
    }

    #[tokio::test]
    async fn stop_waits_for_the_loop_to_return() {
        let slot = WatchSlot::default();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        slot.start(move |cancel| async move {
            cancel.cancelled().await;
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        slot.stop().await;
        assert!(finished.load(Ordering::SeqCst));
        slot.start(|_| async {}).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted_by_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(&cancel, Duration::from_secs(3600)).await);
        assert!(sleep_or_cancel(&CancellationToken::new(), Duration::from_millis(1)).await);
    }
}
