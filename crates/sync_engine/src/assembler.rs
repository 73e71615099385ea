//! Single-device capture assembly.
//!
//! Color and depth/IR notifications arrive independently from the driver. When
//! both sensors are enabled the assembler holds at most one pending notification
//! per stream and pairs them when the depth timestamp lands within tolerance of
//! `color + depth_delay_off_color_usec`. Whichever side is too old gives way and
//! the newer one waits for its partner. With `synchronized_images_only` the stale
//! side is dropped, otherwise it goes out alone as a partial capture.

use contracts::{
    AssemblerStats, Capture, ContractError, DeviceConfiguration, FrameNotification,
    FrameResult, StreamFault, StreamKind,
};
use tracing::{debug, instrument, trace};

use crate::timestamp::{OffsetVerdict, TimestampModel};

/// Pairing parameters for one started device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    pub color_enabled: bool,
    pub depth_enabled: bool,
    pub ir_enabled: bool,
    pub synchronized_images_only: bool,
    pub depth_delay_off_color_usec: i64,
    pub tolerance_usec: i64,
}

impl AssemblerConfig {
    /// Derive from a device configuration; tolerance defaults to half a frame period
    pub fn from_device(config: &DeviceConfiguration) -> Self {
        Self {
            color_enabled: config.color_enabled(),
            depth_enabled: config.depth_enabled(),
            ir_enabled: config.ir_enabled(),
            synchronized_images_only: config.synchronized_images_only,
            depth_delay_off_color_usec: i64::from(config.depth_delay_off_color_usec),
            tolerance_usec: i64::from(config.frame_period_usec() / 2),
        }
    }

    pub fn with_tolerance(mut self, tolerance_usec: i64) -> Self {
        self.tolerance_usec = tolerance_usec;
        self
    }

    fn depth_sensor_enabled(&self) -> bool {
        self.depth_enabled || self.ir_enabled
    }

    pub fn stream_enabled(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Color => self.color_enabled,
            StreamKind::DepthIr => self.depth_sensor_enabled(),
        }
    }

    /// Both sensors run, so notifications wait for a partner
    pub fn pairs_streams(&self) -> bool {
        self.color_enabled && self.depth_sensor_enabled()
    }

    /// Only paired captures may leave the assembler
    pub fn requires_pairs(&self) -> bool {
        self.synchronized_images_only && self.pairs_streams()
    }
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Capture>,
    failed: bool,
}

/// Pairing state machine, owned by exactly one task
#[derive(Debug)]
pub struct CaptureAssembler {
    config: AssemblerConfig,
    model: TimestampModel,
    color: Slot,
    depth: Slot,
    stats: AssemblerStats,
}

impl CaptureAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        let model = TimestampModel::new(config.tolerance_usec);
        Self {
            config,
            model,
            color: Slot::default(),
            depth: Slot::default(),
            stats: AssemblerStats::default(),
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn has_pending(&self, stream: StreamKind) -> bool {
        self.slot(stream).pending.is_some()
    }

    pub fn is_failed(&self, stream: StreamKind) -> bool {
        self.slot(stream).failed
    }

    /// No more captures can be produced: a required stream failed, or every
    /// enabled stream did.
    pub fn is_starved(&self) -> bool {
        let failed = |stream| self.config.stream_enabled(stream) && self.is_failed(stream);
        let healthy =
            |stream| self.config.stream_enabled(stream) && !self.is_failed(stream);

        if self.config.requires_pairs() {
            failed(StreamKind::Color) || failed(StreamKind::DepthIr)
        } else {
            !healthy(StreamKind::Color) && !healthy(StreamKind::DepthIr)
        }
    }

    /// Process one frame-ready notification.
    ///
    /// * `Ok(Some(capture))` - a capture is ready for the output queue
    /// * `Ok(None)` - held, dropped or ignored
    /// * `Err(UnexpectedData)` - malformed block, discarded, state untouched
    /// * `Err(StreamFailed)` - first failure of a stream, its pending image is gone
    #[instrument(level = "trace", name = "assembler_push", skip_all)]
    pub fn push(&mut self, result: FrameResult) -> Result<Option<Capture>, ContractError> {
        match result {
            Ok(notification) => self.accept(notification),
            Err(fault) => self.fail(fault),
        }
    }

    fn accept(
        &mut self,
        notification: FrameNotification,
    ) -> Result<Option<Capture>, ContractError> {
        if let Err(e) = validate_block(&notification) {
            self.stats.malformed += 1;
            return Err(e);
        }

        let stream = notification.stream;
        if !self.config.stream_enabled(stream) || self.is_failed(stream) {
            self.stats.ignored += 1;
            trace!(%stream, "notification ignored");
            return Ok(None);
        }

        if !self.config.pairs_streams() {
            self.stats.captures_emitted += 1;
            return Ok(Some(notification.capture));
        }

        let partner = stream.other();
        if self.is_failed(partner) && !self.config.synchronized_images_only {
            // nothing left to pair with
            self.drop_pending(stream);
            self.stats.captures_emitted += 1;
            return Ok(Some(notification.capture));
        }

        // between pushes at most one slot is pending, so a replaced image
        // never had a partner waiting
        if let Some(stale) = self.slot_mut(stream).pending.replace(notification.capture) {
            trace!(%stream, "pending image replaced by a newer one");
            return Ok(self.release(stream, stale));
        }
        self.try_pair()
    }

    fn fail(&mut self, fault: StreamFault) -> Result<Option<Capture>, ContractError> {
        let stream = fault.stream;
        if !self.config.stream_enabled(stream) || self.is_failed(stream) {
            self.stats.ignored += 1;
            return Ok(None);
        }

        let slot = self.slot_mut(stream);
        slot.failed = true;
        if slot.pending.take().is_some() {
            self.count_drop(stream);
        }
        Err(ContractError::StreamFailed(fault))
    }

    fn try_pair(&mut self) -> Result<Option<Capture>, ContractError> {
        let (Some(color_ts), Some(depth_ts)) = (
            self.color.pending.as_ref().and_then(Capture::color_timestamp_usec),
            self.depth.pending.as_ref().and_then(Capture::depth_ir_timestamp_usec),
        ) else {
            return Ok(None);
        };

        let check = match self
            .model
            .check(color_ts, self.config.depth_delay_off_color_usec, depth_ts)
        {
            Ok(check) => check,
            Err(e) => {
                // neither side can ever pair against the other
                self.drop_pending(StreamKind::Color);
                self.drop_pending(StreamKind::DepthIr);
                return Err(e);
            }
        };

        match check.verdict {
            OffsetVerdict::InTolerance => {
                let (Some(mut capture), Some(mut depth)) =
                    (self.color.pending.take(), self.depth.pending.take())
                else {
                    return Ok(None);
                };
                if let Some(image) = depth.detach_depth() {
                    capture.attach_depth(image)?;
                }
                if let Some(image) = depth.detach_ir() {
                    capture.attach_ir(image)?;
                }
                capture.set_temperature(depth.temperature());

                self.stats.captures_emitted += 1;
                trace!(color_ts, depth_ts, error_usec = check.error_usec, "capture paired");
                Ok(Some(capture))
            }
            OffsetVerdict::TooEarly => {
                debug!(
                    color_ts,
                    depth_ts,
                    error_usec = check.error_usec,
                    "depth image too early for pending color"
                );
                Ok(self.release_pending(StreamKind::DepthIr))
            }
            OffsetVerdict::TooLate => {
                debug!(
                    color_ts,
                    depth_ts,
                    error_usec = check.error_usec,
                    "color image too early for pending depth"
                );
                Ok(self.release_pending(StreamKind::Color))
            }
        }
    }

    /// Hand out an image that lost its chance to pair: dropped in synchronized
    /// mode, a partial capture otherwise
    fn release(&mut self, stream: StreamKind, stale: Capture) -> Option<Capture> {
        if self.config.synchronized_images_only {
            self.count_drop(stream);
            None
        } else {
            self.stats.captures_emitted += 1;
            Some(stale)
        }
    }

    fn release_pending(&mut self, stream: StreamKind) -> Option<Capture> {
        let stale = self.slot_mut(stream).pending.take()?;
        self.release(stream, stale)
    }

    fn drop_pending(&mut self, stream: StreamKind) {
        if self.slot_mut(stream).pending.take().is_some() {
            self.count_drop(stream);
        }
    }

    fn count_drop(&mut self, stream: StreamKind) {
        match stream {
            StreamKind::Color => self.stats.color_dropped += 1,
            StreamKind::DepthIr => self.stats.depth_dropped += 1,
        }
    }

    fn slot(&self, stream: StreamKind) -> &Slot {
        match stream {
            StreamKind::Color => &self.color,
            StreamKind::DepthIr => &self.depth,
        }
    }

    fn slot_mut(&mut self, stream: StreamKind) -> &mut Slot {
        match stream {
            StreamKind::Color => &mut self.color,
            StreamKind::DepthIr => &mut self.depth,
        }
    }
}

/// A block must hold exactly one frame of images from its own stream
fn validate_block(notification: &FrameNotification) -> Result<(), ContractError> {
    let stream = notification.stream;
    if notification.frames_in_block != 1 {
        return Err(ContractError::unexpected_data(
            stream,
            format!(
                "expected 1 frame per block, got {}",
                notification.frames_in_block
            ),
        ));
    }

    let capture = &notification.capture;
    if capture.is_empty() {
        return Err(ContractError::unexpected_data(stream, "empty block"));
    }

    let foreign = match stream {
        StreamKind::Color => capture.depth().is_some() || capture.ir().is_some(),
        StreamKind::DepthIr => capture.color().is_some(),
    };
    if foreign {
        return Err(ContractError::unexpected_data(
            stream,
            "block carries images from another stream",
        ));
    }
    Ok(())
}
