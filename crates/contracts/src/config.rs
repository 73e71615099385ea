//! Device configuration contracts shared by the device layer, the sync engine and
//! the config loader.

use serde::{Deserialize, Serialize};

use crate::{ContractError, ImageFormat};

/// Role of the device on the wired sync bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiredSyncMode {
    /// Free-running, not part of a synchronized rig
    #[default]
    Standalone,
    /// Drives the sync-out signal for the rig
    Master,
    /// Waits on the sync-in signal before each exposure
    Subordinate,
}

/// Color camera resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorResolution {
    #[default]
    Off,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "1440p")]
    R1440p,
    #[serde(rename = "1536p")]
    R1536p,
    #[serde(rename = "2160p")]
    R2160p,
    #[serde(rename = "3072p")]
    R3072p,
}

impl ColorResolution {
    /// Pixel dimensions `(width, height)`; `None` when off
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            ColorResolution::Off => None,
            ColorResolution::R720p => Some((1280, 720)),
            ColorResolution::R1080p => Some((1920, 1080)),
            ColorResolution::R1440p => Some((2560, 1440)),
            ColorResolution::R1536p => Some((2048, 1536)),
            ColorResolution::R2160p => Some((3840, 2160)),
            ColorResolution::R3072p => Some((4096, 3072)),
        }
    }
}

/// Depth sensor operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    #[default]
    Off,
    Nfov2x2Binned,
    NfovUnbinned,
    Wfov2x2Binned,
    WfovUnbinned,
    /// IR only, no depth image
    PassiveIr,
}

impl DepthMode {
    /// Pixel dimensions `(width, height)` of depth and IR images
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            DepthMode::Off => None,
            DepthMode::Nfov2x2Binned => Some((320, 288)),
            DepthMode::NfovUnbinned => Some((640, 576)),
            DepthMode::Wfov2x2Binned => Some((512, 512)),
            DepthMode::WfovUnbinned | DepthMode::PassiveIr => Some((1024, 1024)),
        }
    }

    pub fn produces_depth(self) -> bool {
        !matches!(self, DepthMode::Off | DepthMode::PassiveIr)
    }

    pub fn produces_ir(self) -> bool {
        self != DepthMode::Off
    }
}

/// Camera frame rate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fps {
    #[serde(rename = "5")]
    Fps5,
    #[serde(rename = "15")]
    Fps15,
    #[default]
    #[serde(rename = "30")]
    Fps30,
}

impl Fps {
    /// Frame period in microseconds
    pub fn period_usec(self) -> u32 {
        match self {
            Fps::Fps5 => 200_000,
            Fps::Fps15 => 66_666,
            Fps::Fps30 => 33_333,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            Fps::Fps5 => 5,
            Fps::Fps15 => 15,
            Fps::Fps30 => 30,
        }
    }
}

/// Device configuration, immutable once applied to a device.
///
/// `depth_delay_off_color_usec` and `subordinate_delay_off_master_usec` are
/// operator-declared contracts: the sync engine validates observed timestamps
/// against them, it never derives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfiguration {
    pub color_format: ImageFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub camera_fps: Fps,
    /// Only deliver captures holding both color and depth
    pub synchronized_images_only: bool,
    /// Signed delay of the depth capture relative to color (negative: depth first)
    pub depth_delay_off_color_usec: i32,
    pub wired_sync_mode: WiredSyncMode,
    /// Delay of this subordinate's color capture relative to the master's
    pub subordinate_delay_off_master_usec: u32,
    pub disable_streaming_indicator: bool,
}

impl Default for DeviceConfiguration {
    /// Everything disabled, mirroring an empty device configuration
    fn default() -> Self {
        Self {
            color_format: ImageFormat::ColorMjpg,
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::Off,
            camera_fps: Fps::Fps30,
            synchronized_images_only: false,
            depth_delay_off_color_usec: 0,
            wired_sync_mode: WiredSyncMode::Standalone,
            subordinate_delay_off_master_usec: 0,
            disable_streaming_indicator: false,
        }
    }
}

impl DeviceConfiguration {
    pub fn color_enabled(&self) -> bool {
        self.color_resolution != ColorResolution::Off
    }

    pub fn depth_enabled(&self) -> bool {
        self.depth_mode.produces_depth()
    }

    pub fn ir_enabled(&self) -> bool {
        self.depth_mode.produces_ir()
    }

    /// Depth/IR sensor running in any mode
    pub fn depth_sensor_enabled(&self) -> bool {
        self.depth_mode != DepthMode::Off
    }

    pub fn frame_period_usec(&self) -> u32 {
        self.camera_fps.period_usec()
    }

    /// Check the configuration against the device's supported combinations.
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ContractError> {
        if !self.color_enabled() && !self.depth_sensor_enabled() {
            return Err(ContractError::config_validation(
                "color_resolution / depth_mode",
                "neither color nor depth camera is enabled, at least one is required",
            ));
        }

        if self.color_enabled() {
            if !self.color_format.is_color() {
                return Err(ContractError::config_validation(
                    "color_format",
                    format!("{:?} is not a color format", self.color_format),
                ));
            }
            if matches!(
                self.color_format,
                ImageFormat::ColorNv12 | ImageFormat::ColorYuy2
            ) && self.color_resolution != ColorResolution::R720p
            {
                return Err(ContractError::config_validation(
                    "color_format",
                    format!(
                        "{:?} is only supported at 720p, got {:?}",
                        self.color_format, self.color_resolution
                    ),
                ));
            }
        }

        if self.camera_fps == Fps::Fps30 {
            if self.depth_mode == DepthMode::WfovUnbinned {
                return Err(ContractError::config_validation(
                    "camera_fps",
                    "wfov_unbinned depth mode does not support 30 fps",
                ));
            }
            if self.color_resolution == ColorResolution::R3072p {
                return Err(ContractError::config_validation(
                    "camera_fps",
                    "3072p color does not support 30 fps",
                ));
            }
        }

        if self.synchronized_images_only && !(self.color_enabled() && self.depth_sensor_enabled())
        {
            return Err(ContractError::config_validation(
                "synchronized_images_only",
                "requires both color and depth cameras to be enabled",
            ));
        }

        let period = i64::from(self.frame_period_usec());
        if self.color_enabled() && self.depth_sensor_enabled() {
            let delay = i64::from(self.depth_delay_off_color_usec);
            if delay.abs() > period {
                return Err(ContractError::config_validation(
                    "depth_delay_off_color_usec",
                    format!("{delay}us exceeds one frame period of {period}us"),
                ));
            }
        }

        if self.subordinate_delay_off_master_usec != 0 {
            if self.wired_sync_mode != WiredSyncMode::Subordinate {
                return Err(ContractError::config_validation(
                    "subordinate_delay_off_master_usec",
                    format!(
                        "must be 0 unless wired_sync_mode is subordinate (got {:?})",
                        self.wired_sync_mode
                    ),
                ));
            }
            if i64::from(self.subordinate_delay_off_master_usec) > period {
                return Err(ContractError::config_validation(
                    "subordinate_delay_off_master_usec",
                    format!(
                        "{}us exceeds one frame period of {period}us",
                        self.subordinate_delay_off_master_usec
                    ),
                ));
            }
        }

        Ok(())
    }
}
