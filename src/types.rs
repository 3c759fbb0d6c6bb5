use std::fmt::Debug;

use tokio::sync::mpsc;

use crate::SyncError;

/// Item yielded by watch streams.
#[derive(Debug, Clone)]
pub enum SyncMessage<T: Clone> {
    Data(T),
    Notification(Notification),
}

/// Progress markers interleaved with data on watch streams.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A full scan from the current cursor is starting.
    ScanStarted,
    /// The scan reached an empty page; the loop sleeps until the next cycle.
    ScanFinished,
}

impl<T: Clone> From<Notification> for SyncMessage<T> {
    fn from(value: Notification) -> Self {
        SyncMessage::Notification(value)
    }
}

impl<T: Clone> PartialEq<Notification> for SyncMessage<T> {
    fn eq(&self, other: &Notification) -> bool {
        if let SyncMessage::Notification(notification) = self {
            notification == other
        } else {
            false
        }
    }
}

pub type SyncResult<T> = Result<SyncMessage<T>, SyncError>;

pub(crate) trait IntoSyncResult<T: Clone> {
    fn into_sync_result(self) -> SyncResult<T>;
}

impl<T: Clone> IntoSyncResult<T> for SyncResult<T> {
    fn into_sync_result(self) -> SyncResult<T> {
        self
    }
}

impl<T: Clone> IntoSyncResult<T> for SyncMessage<T> {
    fn into_sync_result(self) -> SyncResult<T> {
        Ok(self)
    }
}

impl<T: Clone, E: Into<SyncError>> IntoSyncResult<T> for E {
    fn into_sync_result(self) -> SyncResult<T> {
        Err(self.into())
    }
}

impl<T: Clone> IntoSyncResult<T> for Notification {
    fn into_sync_result(self) -> SyncResult<T> {
        Ok(SyncMessage::Notification(self))
    }
}

pub(crate) trait TryStream<T: Clone> {
    /// Sends `msg` downstream. Returns `false` once the receiver is gone.
    async fn try_stream<M: IntoSyncResult<T>>(&self, msg: M) -> bool;
}

impl<T: Clone + Debug> TryStream<T> for mpsc::Sender<SyncResult<T>> {
    async fn try_stream<M: IntoSyncResult<T>>(&self, msg: M) -> bool {
        let item = msg.into_sync_result();
        match &item {
            Ok(msg) => trace!(item = ?msg, "Sending message"),
            Err(err) => debug!(error = %err, "Sending error"),
        }
        if let Err(err) = self.send(item).await {
            warn!(error = %err, "Downstream channel closed, stopping stream");
            return false;
        }
        true
    }
}
