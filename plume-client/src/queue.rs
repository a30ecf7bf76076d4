//! Publish job queue
//!
//! Unbounded multi-producer/single-consumer queue between `publish` callers
//! and the outbound loop. Global FIFO across all producers: wire order is
//! enqueue order.

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A unit of outbound work: a callback that writes already-framed bytes
/// into the in-flight output buffer, plus the signal resolved once it ran.
pub(crate) struct Job {
    pub(crate) write: Box<dyn FnOnce(&mut BytesMut) + Send>,
    pub(crate) done: oneshot::Sender<()>,
}

impl Job {
    /// Applies the callback to the outbound buffer and fires the completion
    /// signal. "Applied to buffer" is the fulfilled contract; reaching the
    /// network is not.
    pub(crate) fn apply(self, buf: &mut BytesMut) {
        (self.write)(buf);
        let _ = self.done.send(());
    }
}

pub(crate) fn channel() -> (mpsc::UnboundedSender<Job>, JobQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, JobQueue { rx })
}

/// Consumer side of the publish queue, owned by the outbound loop.
pub(crate) struct JobQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl JobQueue {
    /// Removes every job currently queued, in enqueue order, without
    /// blocking.
    pub(crate) fn drain_available(&mut self, out: &mut Vec<Job>) {
        while let Ok(job) = self.rx.try_recv() {
            out.push(job);
        }
    }

    /// Suspends until a job arrives or `cancel` fires. Returns `None` on
    /// cancellation or once every producer handle is gone.
    pub(crate) async fn wait_for_work(&mut self, cancel: &CancellationToken) -> Option<Job> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            job = self.rx.recv() => job,
        }
    }
}
