//! # Sync Engine
//!
//! Capture synchronization for single devices and wired multi-device rigs.
//!
//! Responsibilities:
//! - pair color and depth/IR notifications of one device into captures
//!   ([`CaptureAssembler`], driven by a per-device pairing worker)
//! - device lifecycle and bounded capture retrieval ([`Device`])
//! - master/subordinate role ordering ([`order_devices`])
//! - iterative multi-device alignment ([`MultiDeviceSynchronizer`])
//! - per-subordinate drift tracking ([`DriftEstimator`])
//!
//! ## Usage
//!
//! ```ignore
//! use sync_engine::{Device, MultiDeviceSynchronizer, SyncOptions};
//!
//! let devices = vec![Device::open(master, 2)?, Device::open(subordinate, 2)?];
//! let mut sync = MultiDeviceSynchronizer::new(devices, SyncEngineConfig::default())?;
//! sync.start_cameras(&[master_config, subordinate_config])?;
//!
//! let options = SyncOptions::default().with_timeout(Duration::from_secs(1));
//! let synced = sync.get_synchronized_captures(false, &options)?;
//! ```

mod assembler;
mod device;
mod drift;
mod multi_device;
mod timestamp;
mod worker;

pub use assembler::{AssemblerConfig, CaptureAssembler};
pub use device::{Device, DEFAULT_FRAME_CHANNEL_CAPACITY};
pub use drift::DriftEstimator;
pub use multi_device::{order_devices, CancelToken, MultiDeviceSynchronizer, SyncOptions};
pub use timestamp::{to_signed, OffsetCheck, OffsetVerdict, TimestampModel};

// Re-export contracts types
pub use contracts::{
    AssemblerStats, Capture, CaptureSource, ContractError, DriftConfig, SubordinateAlignment,
    SyncEngineConfig, SyncReport, SyncedCaptures, Wait, WaitError,
};
