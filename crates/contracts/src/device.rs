//! Device abstractions - the narrow interfaces the sync engine consumes
//!
//! [`FrameSource`] is the driver side: it pushes frame-ready notifications from its
//! own producer threads. [`CaptureSource`] is the consumer side: a started device
//! that hands out captures with a bounded wait. The multi-device synchronizer only
//! ever talks to `CaptureSource`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Capture, ContractError, DeviceConfiguration, StreamFault, Wait, WaitError};

/// Physical stream of a device.
///
/// Depth and IR come from one sensor and share its timestamp domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Color,
    DepthIr,
}

impl StreamKind {
    /// The stream this one pairs with
    pub fn other(self) -> Self {
        match self {
            StreamKind::Color => StreamKind::DepthIr,
            StreamKind::DepthIr => StreamKind::Color,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Color => f.write_str("color"),
            StreamKind::DepthIr => f.write_str("depth_ir"),
        }
    }
}

/// New data from one stream
#[derive(Debug, Clone)]
pub struct FrameNotification {
    pub stream: StreamKind,
    /// Number of frames packed into the delivered block; exactly one is representable
    pub frames_in_block: u32,
    /// Images from this stream only
    pub capture: Capture,
}

impl FrameNotification {
    pub fn new(stream: StreamKind, capture: Capture) -> Self {
        Self {
            stream,
            frames_in_block: 1,
            capture,
        }
    }
}

/// Result carried by a frame-ready callback
pub type FrameResult = Result<FrameNotification, StreamFault>;

/// Frame-ready callback, invoked from the source's producer threads
pub type FrameCallback = Arc<dyn Fn(FrameResult) + Send + Sync>;

/// Driver-side device: produces frame-ready notifications.
pub trait FrameSource: Send + Sync {
    /// Device serial number
    fn serial_number(&self) -> &str;

    /// Sync-in jack has a cable
    fn is_sync_in_connected(&self) -> bool;

    /// Sync-out jack has a cable
    fn is_sync_out_connected(&self) -> bool;

    /// Start streaming with the given configuration.
    ///
    /// Notifications for every enabled stream are delivered through `callback`
    /// until [`FrameSource::stop`] returns.
    fn start(
        &self,
        config: &DeviceConfiguration,
        callback: FrameCallback,
    ) -> Result<(), ContractError>;

    /// Stop streaming. No callbacks run after this returns.
    fn stop(&self);

    /// Check if currently streaming
    fn is_streaming(&self) -> bool;
}

/// Consumer-side device: a started camera handing out captures.
pub trait CaptureSource: Send + Sync {
    /// Device serial number
    fn serial_number(&self) -> &str;

    fn is_sync_in_connected(&self) -> bool;

    fn is_sync_out_connected(&self) -> bool;

    /// Start the cameras. Starting twice without stopping is an error.
    fn start_cameras(&self, config: &DeviceConfiguration) -> Result<(), ContractError>;

    /// Stop the cameras. A no-op on a device that is not started.
    fn stop_cameras(&self);

    /// Next capture, waiting at most `wait`
    fn get_capture(&self, wait: Wait) -> Result<Capture, WaitError>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Arc<T> {
    fn serial_number(&self) -> &str {
        (**self).serial_number()
    }

    fn is_sync_in_connected(&self) -> bool {
        (**self).is_sync_in_connected()
    }

    fn is_sync_out_connected(&self) -> bool {
        (**self).is_sync_out_connected()
    }

    fn start_cameras(&self, config: &DeviceConfiguration) -> Result<(), ContractError> {
        (**self).start_cameras(config)
    }

    fn stop_cameras(&self) {
        (**self).stop_cameras()
    }

    fn get_capture(&self, wait: Wait) -> Result<Capture, WaitError> {
        (**self).get_capture(wait)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn serial_number(&self) -> &str {
        (**self).serial_number()
    }

    fn is_sync_in_connected(&self) -> bool {
        (**self).is_sync_in_connected()
    }

    fn is_sync_out_connected(&self) -> bool {
        (**self).is_sync_out_connected()
    }

    fn start(
        &self,
        config: &DeviceConfiguration,
        callback: FrameCallback,
    ) -> Result<(), ContractError> {
        (**self).start(config, callback)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn is_streaming(&self) -> bool {
        (**self).is_streaming()
    }
}
