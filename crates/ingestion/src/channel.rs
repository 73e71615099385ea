//! Frame delivery channel between a driver's producer threads and the pairing task.
//!
//! Producers must never block, so a full channel evicts its oldest notification
//! before accepting the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, RecvError, Sender, TryRecvError, TrySendError};
use contracts::{FrameResult, StreamKind};
use tracing::{trace, warn};

/// Delivery counters shared by both ends of a frame channel
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// Notifications accepted into the channel
    pub frames_sent: AtomicU64,

    /// Notifications evicted because the channel was full
    pub frames_dropped: AtomicU64,

    /// Notifications discarded because the receiving side was gone
    pub frames_orphaned: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_orphaned: self.frames_orphaned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_orphaned: u64,
}

/// Create a bounded drop-oldest channel for one stream
pub fn frame_channel(stream: StreamKind, capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    let metrics = Arc::new(ChannelMetrics::new());

    let sender = FrameSender {
        stream,
        tx,
        evict: rx.clone(),
        metrics: metrics.clone(),
    };
    let receiver = FrameReceiver {
        stream,
        rx,
        metrics,
    };
    (sender, receiver)
}

/// Producer end; cheap to clone, safe to call from any thread
#[derive(Clone)]
pub struct FrameSender {
    stream: StreamKind,
    tx: Sender<FrameResult>,
    evict: Receiver<FrameResult>,
    metrics: Arc<ChannelMetrics>,
}

impl FrameSender {
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Deliver a notification without blocking.
    ///
    /// Returns `false` once the receiver has been dropped.
    pub fn send(&self, mut item: FrameResult) -> bool {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
                    trace!(stream = %self.stream, "frame queued");
                    return true;
                }
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    // a concurrent consumer may have emptied the slot already
                    if let Ok(oldest) = self.evict.try_recv() {
                        self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(
                            "capsync_frames_dropped_total",
                            "stream" => self.stream.to_string()
                        )
                        .increment(1);
                        trace!(stream = %self.stream, "channel full, oldest frame dropped");
                        drop(oldest);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.frames_orphaned.fetch_add(1, Ordering::Relaxed);
                    warn!(stream = %self.stream, "frame channel closed");
                    return false;
                }
            }
        }
    }

    pub fn metrics(&self) -> ChannelSnapshot {
        self.metrics.snapshot()
    }
}

/// Consumer end, owned by the pairing task
pub struct FrameReceiver {
    stream: StreamKind,
    rx: Receiver<FrameResult>,
    metrics: Arc<ChannelMetrics>,
}

impl FrameReceiver {
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Next notification; errors once every sender is gone and the channel is drained
    pub async fn recv(&self) -> Result<FrameResult, RecvError> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Result<FrameResult, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn metrics(&self) -> ChannelSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        // senders keep an evicting handle, so closing here is what tells them to stop
        self.rx.close();
    }
}
