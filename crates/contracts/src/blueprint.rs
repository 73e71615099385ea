//! RigBlueprint - Config Loader output
//!
//! Describes a complete capture rig: devices, their wiring and configuration, the
//! synchronization policy and optional simulation parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{DeviceConfiguration, DriftConfig, SyncEngineConfig, WiredSyncMode};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete rig blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RigBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Rig-wide settings
    #[serde(default)]
    #[validate(nested)]
    pub rig: RigConfig,

    /// Devices in declaration order (the master need not come first)
    #[validate(length(min = 1, message = "at least one device is required"), nested)]
    pub devices: Vec<DeviceBlueprint>,

    /// Synchronization policy
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,
}

/// Rig-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RigConfig {
    /// Human-readable rig name
    #[serde(default = "default_rig_name")]
    pub name: String,

    /// Output capture queue depth per device
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1, max = 4096))]
    pub queue_capacity: usize,

    /// Per-stream frame channel depth feeding the pairing task
    #[serde(default = "default_frame_channel_capacity")]
    #[validate(range(min = 1, max = 4096))]
    pub frame_channel_capacity: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            name: default_rig_name(),
            queue_capacity: default_queue_capacity(),
            frame_channel_capacity: default_frame_channel_capacity(),
        }
    }
}

fn default_rig_name() -> String {
    "rig".to_string()
}

fn default_queue_capacity() -> usize {
    crate::DEFAULT_CAPTURE_QUEUE_CAPACITY
}

fn default_frame_channel_capacity() -> usize {
    4
}

/// One physical device
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceBlueprint {
    /// Device serial number
    #[validate(length(min = 1, message = "serial cannot be empty"))]
    pub serial: String,

    /// Sync-in cable connected
    #[serde(default)]
    pub sync_in: bool,

    /// Sync-out cable connected
    #[serde(default)]
    pub sync_out: bool,

    /// Camera configuration applied at start
    pub config: DeviceConfiguration,

    /// Simulated clock behavior, used when no hardware is attached
    #[serde(default)]
    #[validate(nested)]
    pub simulation: SimulationConfig,
}

impl DeviceBlueprint {
    pub fn role(&self) -> WiredSyncMode {
        self.config.wired_sync_mode
    }
}

/// Simulated device clock parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SimulationConfig {
    /// Offset of this device's clock from the shared trigger (µs)
    #[serde(default)]
    pub clock_offset_usec: i64,

    /// Maximum random timestamp jitter (µs)
    #[serde(default)]
    #[validate(range(max = 10000))]
    pub jitter_usec: u32,

    /// Drop every N-th color frame
    #[serde(default)]
    #[validate(range(min = 2))]
    pub drop_color_every: Option<u32>,

    /// Drop every N-th depth frame
    #[serde(default)]
    #[validate(range(min = 2))]
    pub drop_depth_every: Option<u32>,
}

/// Synchronization policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// Tolerance around each expected timestamp (µs)
    #[serde(default = "default_tolerance_usec")]
    #[validate(range(min = 0, max = 100000))]
    pub tolerance_usec: i64,

    /// Compare subordinates on depth instead of color
    #[serde(default)]
    pub compare_depth_for_subordinate: bool,

    /// Deadline for one synchronized retrieval in ms (absent = wait forever)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Blocking fetch slice in ms
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1, max = 10000))]
    pub poll_interval_ms: u64,

    /// Drift estimator tuning
    #[serde(default)]
    pub drift: DriftConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_usec: default_tolerance_usec(),
            compare_depth_for_subordinate: false,
            timeout_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
            drift: DriftConfig::default(),
        }
    }
}

fn default_tolerance_usec() -> i64 {
    crate::MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl RigBlueprint {
    /// Build the sync engine configuration
    pub fn to_sync_engine_config(&self) -> SyncEngineConfig {
        SyncEngineConfig {
            tolerance_usec: self.sync.tolerance_usec,
            compare_depth_for_subordinate: self.sync.compare_depth_for_subordinate,
            timeout: self.sync.timeout_ms.map(Duration::from_millis),
            poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
            queue_capacity: self.rig.queue_capacity,
            drift: self.sync.drift.clone(),
        }
    }

    /// Device declared as master, if any
    pub fn master(&self) -> Option<&DeviceBlueprint> {
        self.devices
            .iter()
            .find(|d| d.role() == WiredSyncMode::Master)
    }

    /// Devices declared as subordinates
    pub fn subordinates(&self) -> impl Iterator<Item = &DeviceBlueprint> {
        self.devices
            .iter()
            .filter(|d| d.role() == WiredSyncMode::Subordinate)
    }
}
