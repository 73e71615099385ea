//! # Ingestion
//!
//! Producer/consumer plumbing between device drivers and the sync engine.
//!
//! Responsibilities:
//! - `BoundedQueue`: fixed-capacity blocking FIFO with drop-oldest overflow and
//!   enable/disable/stop semantics
//! - `StreamReader`: one queue per physical stream with end-of-stream signalling
//! - Frame channels: non-blocking drop-oldest delivery from driver threads to the
//!   pairing task
//! - Simulated drivers (`MockCamera`, `PlaybackSource`) for running without hardware
//!
//! ## Usage Example
//!
//! ```ignore
//! use contracts::{StreamKind, Wait};
//! use ingestion::{frame_channel, BoundedQueue};
//!
//! let queue = BoundedQueue::new(2)?;
//! queue.enable();
//! queue.push(capture);
//! let capture = queue.pop(Wait::from_millis(100))?;
//!
//! let (tx, rx) = frame_channel(StreamKind::Color, 4);
//! tx.send(Ok(notification));
//! let next = rx.recv().await?;
//! ```

mod channel;
mod mock;
mod playback;
mod queue;
mod reader;

pub use channel::{frame_channel, ChannelMetrics, ChannelSnapshot, FrameReceiver, FrameSender};
pub use mock::{MockCamera, MockCameraConfig, SyncLine};
pub use playback::PlaybackSource;
pub use queue::{BoundedQueue, QueueState};
pub use reader::{ImageStream, StreamReader};
