//! Layered error definitions
//!
//! Categorized by source: config / device / stream / data / sync

use thiserror::Error;

use crate::StreamKind;

/// Outcome of a bounded wait that did not produce data.
///
/// `Timeout` is transient and the caller may retry. `Failed` means the queue or
/// stream was disabled, stopped or faulted. `Eof` is reported by finite sources once
/// they are drained.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for data")]
    Timeout,

    #[error("source disabled, stopped or failed")]
    Failed,

    #[error("end of stream")]
    Eof,
}

/// Failure reported by a frame-ready notification
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{stream} stream failed: {message}")]
pub struct StreamFault {
    pub stream: StreamKind,
    pub message: String,
}

impl StreamFault {
    pub fn new(stream: StreamKind, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Sync cable required by the device's role is not connected
    #[error("device {serial}: {message}")]
    MissingSyncCable { serial: String, message: String },

    /// Number of configurations does not match number of devices
    #[error("device/config count mismatch: {devices} devices, {configs} configurations")]
    DeviceCountMismatch { devices: usize, configs: usize },

    // ===== Device Errors =====
    /// Operation not valid in the device's current lifecycle state
    #[error("device {serial}: {message}")]
    DeviceState { serial: String, message: String },

    // ===== Stream Errors =====
    /// A stream reported failure; terminal for that stream
    #[error(transparent)]
    StreamFailed(#[from] StreamFault),

    // ===== Data Errors =====
    /// A frame block violated the format's invariants and was discarded
    #[error("unexpected data on {stream} stream: {message}")]
    UnexpectedData { stream: StreamKind, message: String },

    /// Image geometry does not fit its buffer
    #[error("invalid image: {message}")]
    InvalidImage { message: String },

    /// Attempted to attach an image to an occupied capture slot
    #[error("capture already holds a {slot} image")]
    SlotOccupied { slot: &'static str },

    /// Timestamp arithmetic left the signed 64-bit range
    #[error("timestamp arithmetic overflow: {message}")]
    TimestampOverflow { message: String },

    // ===== Sync Errors =====
    /// Synchronization did not converge before the caller's deadline
    #[error("synchronization timed out after {waited_ms}ms ({passes} passes)")]
    SyncTimeout { waited_ms: u64, passes: u64 },

    /// Synchronization was cancelled by the caller
    #[error("synchronization cancelled")]
    Cancelled,

    /// A device could not deliver a capture; the whole multi-device fetch is aborted
    #[error("capture retrieval failed on device {device_index}: {reason}")]
    CaptureFailed {
        device_index: usize,
        #[source]
        reason: WaitError,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create missing sync cable error
    pub fn missing_sync_cable(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MissingSyncCable {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Create device state error
    pub fn device_state(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceState {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Create unexpected data error
    pub fn unexpected_data(stream: StreamKind, message: impl Into<String>) -> Self {
        Self::UnexpectedData {
            stream,
            message: message.into(),
        }
    }

    /// Create invalid image error
    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
        }
    }

    /// Whether this is a fatal configuration error (reported immediately, not retried)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::ConfigValidation { .. }
                | Self::MissingSyncCable { .. }
                | Self::DeviceCountMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(ContractError::config_validation("fps", "bad").is_configuration());
        assert!(ContractError::DeviceCountMismatch {
            devices: 2,
            configs: 1
        }
        .is_configuration());
        assert!(!ContractError::Cancelled.is_configuration());
    }

    #[test]
    fn test_stream_fault_display() {
        let err: ContractError = StreamFault::new(StreamKind::DepthIr, "usb reset").into();
        assert_eq!(err.to_string(), "depth_ir stream failed: usb reset");
    }
}
