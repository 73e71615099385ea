//! Single device: a frame source, its pairing worker and its capture queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use contracts::{
    AssemblerStats, Capture, CaptureSource, ContractError, DeviceConfiguration, FrameCallback,
    FrameResult, FrameSource, StreamFault, StreamKind, Wait, WaitError,
    DEFAULT_CAPTURE_QUEUE_CAPACITY,
};
use ingestion::{frame_channel, BoundedQueue, FrameSender};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, trace};

use crate::assembler::{AssemblerConfig, CaptureAssembler};
use crate::worker::{PairingWorker, WorkerShared};

/// Default frame channel depth per stream
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 4;

/// How often a blocked `get_capture` checks whether the source has ended
const END_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Opened,
    Started,
    Stopped,
    Closed,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

struct Inner {
    state: DeviceState,
    running: Option<Running>,
    shared: Option<Arc<WorkerShared>>,
    tolerance_usec: Option<i64>,
}

/// An opened device handing out assembled captures
pub struct Device<S: FrameSource> {
    source: S,
    serial: String,
    channel_capacity: usize,
    output: Arc<BoundedQueue<Capture>>,
    inner: Mutex<Inner>,
}

impl<S: FrameSource> Device<S> {
    /// Wrap a source; its output queue holds `queue_capacity` captures
    pub fn open(source: S, queue_capacity: usize) -> Result<Self, ContractError> {
        let serial = source.serial_number().to_string();
        let output = BoundedQueue::with_name(format!("{serial}-captures"), queue_capacity)?;
        debug!(%serial, queue_capacity, "device opened");

        Ok(Self {
            source,
            serial,
            channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            output: Arc::new(output),
            inner: Mutex::new(Inner {
                state: DeviceState::Opened,
                running: None,
                shared: None,
                tolerance_usec: None,
            }),
        })
    }

    /// Open with the default queue depth
    pub fn open_default(source: S) -> Result<Self, ContractError> {
        Self::open(source, DEFAULT_CAPTURE_QUEUE_CAPACITY)
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Override the depth/color pairing tolerance (default: half a frame period)
    pub fn with_pairing_tolerance(self, tolerance_usec: i64) -> Self {
        self.lock().tolerance_usec = Some(tolerance_usec);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn is_started(&self) -> bool {
        self.lock().state == DeviceState::Started
    }

    /// Captures waiting in the output queue
    pub fn queued(&self) -> usize {
        self.output.len()
    }

    /// Stream failure reported since the last start
    pub fn fault(&self) -> Option<StreamFault> {
        self.shared().and_then(|shared| shared.fault())
    }

    pub fn stats(&self) -> AssemblerStats {
        self.shared().map(|shared| shared.stats()).unwrap_or_default()
    }

    #[instrument(level = "debug", name = "device_start", skip(self, config), fields(serial = %self.serial))]
    pub fn start(&self, config: &DeviceConfiguration) -> Result<(), ContractError> {
        let mut inner = self.lock();
        match inner.state {
            DeviceState::Started => {
                return Err(ContractError::device_state(
                    &self.serial,
                    "cameras already started",
                ))
            }
            DeviceState::Closed => {
                return Err(ContractError::device_state(&self.serial, "device is closed"))
            }
            DeviceState::Opened | DeviceState::Stopped => {}
        }
        config.validate()?;

        let mut assembler_config = AssemblerConfig::from_device(config);
        if let Some(tolerance) = inner.tolerance_usec {
            assembler_config = assembler_config.with_tolerance(tolerance);
        }

        let (color_tx, color_rx) = self.channel(config.color_enabled(), StreamKind::Color);
        let (depth_tx, depth_rx) =
            self.channel(config.depth_sensor_enabled(), StreamKind::DepthIr);

        let shared = Arc::new(WorkerShared::default());
        let (shutdown, shutdown_rx) = oneshot::channel();
        self.output.enable();

        let worker = PairingWorker {
            serial: self.serial.clone(),
            assembler: CaptureAssembler::new(assembler_config),
            color: color_rx,
            depth: depth_rx,
            output: self.output.clone(),
            shared: shared.clone(),
        }
        .spawn(shutdown_rx);
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.output.stop();
                return Err(e);
            }
        };

        if let Err(e) = self.source.start(config, route(color_tx, depth_tx)) {
            self.output.stop();
            let _ = shutdown.send(());
            let _ = worker.join();
            return Err(e);
        }

        inner.running = Some(Running { shutdown, worker });
        inner.shared = Some(shared);
        inner.state = DeviceState::Started;
        info!(serial = %self.serial, fps = config.camera_fps.hz(), mode = ?config.wired_sync_mode, "cameras started");
        Ok(())
    }

    /// Stop streaming; a no-op unless started
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != DeviceState::Started {
            return;
        }

        // wake blocked consumers before tearing down the pipeline
        self.output.stop();
        self.source.stop();
        if let Some(running) = inner.running.take() {
            let _ = running.shutdown.send(());
            let _ = running.worker.join();
        }
        inner.state = DeviceState::Stopped;
        info!(serial = %self.serial, "cameras stopped");
    }

    /// Stop if needed and refuse any further start
    pub fn close(&self) {
        self.stop();
        self.lock().state = DeviceState::Closed;
        debug!(serial = %self.serial, "device closed");
    }

    /// Next capture, waiting at most `wait`.
    ///
    /// `Eof` once the source has ended and every queued capture was handed out.
    pub fn get_capture(&self, wait: Wait) -> Result<Capture, WaitError> {
        let shared = self.shared();
        let deadline = wait.deadline_from(Instant::now());

        loop {
            let slice = match deadline {
                None => END_CHECK_INTERVAL,
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(END_CHECK_INTERVAL),
            };

            match self.output.pop(Wait::For(slice)) {
                Err(WaitError::Timeout) => {
                    if shared.as_ref().is_some_and(|s| s.has_ended()) && self.output.is_empty() {
                        trace!(serial = %self.serial, "source exhausted");
                        return Err(WaitError::Eof);
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(WaitError::Timeout);
                    }
                }
                other => return other,
            }
        }
    }

    fn channel(
        &self,
        enabled: bool,
        stream: StreamKind,
    ) -> (Option<FrameSender>, Option<ingestion::FrameReceiver>) {
        if enabled {
            let (tx, rx) = frame_channel(stream, self.channel_capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        }
    }

    fn shared(&self) -> Option<Arc<WorkerShared>> {
        self.lock().shared.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callback handed to the driver: routes each notification to its stream's channel
fn route(color: Option<FrameSender>, depth: Option<FrameSender>) -> FrameCallback {
    Arc::new(move |result: FrameResult| {
        let stream = match &result {
            Ok(notification) => notification.stream,
            Err(fault) => fault.stream,
        };
        let sender = match stream {
            StreamKind::Color => color.as_ref(),
            StreamKind::DepthIr => depth.as_ref(),
        };
        match sender {
            Some(sender) => {
                sender.send(result);
            }
            None => trace!(%stream, "notification for a disabled stream dropped"),
        }
    })
}

impl<S: FrameSource> CaptureSource for Device<S> {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn is_sync_in_connected(&self) -> bool {
        self.source.is_sync_in_connected()
    }

    fn is_sync_out_connected(&self) -> bool {
        self.source.is_sync_out_connected()
    }

    fn start_cameras(&self, config: &DeviceConfiguration) -> Result<(), ContractError> {
        self.start(config)
    }

    fn stop_cameras(&self) {
        self.stop()
    }

    fn get_capture(&self, wait: Wait) -> Result<Capture, WaitError> {
        Device::get_capture(self, wait)
    }
}

impl<S: FrameSource> Drop for Device<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColorResolution, DepthMode, Fps, ImageFormat, WiredSyncMode};
    use ingestion::{MockCamera, PlaybackSource, SyncLine};

    fn config() -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ImageFormat::ColorBgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            camera_fps: Fps::Fps30,
            synchronized_images_only: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_synchronized_captures_from_mock() {
        let device = Device::open(MockCamera::standalone("dev-0"), 2).unwrap();
        device.start(&config()).unwrap();

        for _ in 0..3 {
            let capture = device.get_capture(Wait::For(Duration::from_secs(2))).unwrap();
            assert!(capture.color().is_some());
            assert!(capture.depth().is_some());
            assert!(capture.ir().is_some());
            assert_eq!(
                capture.color_timestamp_usec(),
                capture.depth_ir_timestamp_usec()
            );
        }
        device.stop();
        assert!(device.stats().captures_emitted >= 3);
    }

    #[test]
    fn test_double_start_is_rejected() {
        let device = Device::open(MockCamera::standalone("dev-1"), 2).unwrap();
        device.start(&config()).unwrap();
        assert!(matches!(
            device.start(&config()),
            Err(ContractError::DeviceState { .. })
        ));
        device.stop();
        // restart after stop is allowed
        device.start(&config()).unwrap();
        device.stop();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let device = Device::open(MockCamera::standalone("dev-2"), 2).unwrap();
        assert!(matches!(
            device.start(&DeviceConfiguration::default()),
            Err(ContractError::ConfigValidation { .. })
        ));
        assert!(!device.is_started());
    }

    #[test]
    fn test_get_capture_before_start_fails() {
        let device = Device::open(MockCamera::standalone("dev-3"), 2).unwrap();
        assert_eq!(device.get_capture(Wait::POLL).unwrap_err(), WaitError::Failed);
        device.stop();
    }

    #[test]
    fn test_closed_device_cannot_start() {
        let device = Device::open(MockCamera::standalone("dev-4"), 2).unwrap();
        device.close();
        assert!(matches!(
            device.start(&config()),
            Err(ContractError::DeviceState { .. })
        ));
    }

    #[test]
    fn test_stop_wakes_blocked_consumer() {
        // a subordinate whose trigger never fires produces nothing
        let source = MockCamera::subordinate("dev-5", &SyncLine::new());
        let device = Arc::new(Device::open(source, 2).unwrap());
        let config = DeviceConfiguration {
            wired_sync_mode: WiredSyncMode::Subordinate,
            ..config()
        };
        device.start(&config).unwrap();

        let consumer = {
            let device = device.clone();
            std::thread::spawn(move || device.get_capture(Wait::Forever))
        };
        std::thread::sleep(Duration::from_millis(50));
        device.stop();
        assert_eq!(consumer.join().unwrap().unwrap_err(), WaitError::Failed);
    }

    #[test]
    fn test_playback_reports_eof() {
        // recording fills the reader exactly; finishing must not evict anything
        let source = PlaybackSource::new("rec", 2).unwrap();
        for ts in [1_000u64, 34_333] {
            let image = contracts::Image::builder(ImageFormat::Depth16, 2, 2, 4)
                .device_timestamp_usec(ts)
                .build()
                .unwrap();
            source.load(&Capture::new().with_depth(image));
        }
        source.finish();

        let device = Device::open(source, 4).unwrap();
        let config = DeviceConfiguration {
            depth_mode: DepthMode::NfovUnbinned,
            ..Default::default()
        };
        device.start(&config).unwrap();

        let wait = Wait::For(Duration::from_secs(2));
        assert_eq!(device.get_capture(wait).unwrap().depth_ir_timestamp_usec(), Some(1_000));
        assert_eq!(device.get_capture(wait).unwrap().depth_ir_timestamp_usec(), Some(34_333));
        assert_eq!(device.get_capture(wait).unwrap_err(), WaitError::Eof);
        device.stop();
    }
}
