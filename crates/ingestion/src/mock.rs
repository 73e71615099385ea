//! Mock camera
//!
//! A simulated device for running the sync engine without hardware. Each enabled
//! stream gets its own OS producer thread that emits frames on a simulated device
//! clock, the same way a driver delivers frame-ready callbacks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    Capture, ContractError, DeviceConfiguration, FrameCallback, FrameNotification, FrameSource,
    Image, ImageBuilder, ImageFormat, StreamFault, StreamKind, WiredSyncMode,
};
use rand::Rng;
use tracing::{debug, trace, warn};

/// Shared sync cable between mock cameras.
///
/// Subordinates hold their first exposure until the master fires the line.
#[derive(Clone, Default)]
pub struct SyncLine {
    fired: Arc<(Mutex<bool>, Condvar)>,
}

impl SyncLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let (lock, cvar) = &*self.fired;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Lower the line so the next master start releases subordinates again
    pub fn reset(&self) {
        let (lock, _) = &*self.fired;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the line; returns whether it fired
    fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.fired;
        let fired = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (fired, _) = cvar
            .wait_timeout_while(fired, timeout, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
        *fired
    }
}

impl fmt::Debug for SyncLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLine")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Mock camera configuration
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    /// Device serial number
    pub serial: String,

    /// Sync-in jack connected
    pub sync_in: bool,

    /// Sync-out jack connected
    pub sync_out: bool,

    /// Device clock at the first frame (µs)
    pub start_usec: u64,

    /// Constant offset added to every timestamp (µs)
    pub clock_offset_usec: i64,

    /// Maximum symmetric random jitter per timestamp (µs)
    pub jitter_usec: u32,

    /// Wall-clock pause between frames; `None` runs at the configured frame rate
    pub frame_interval: Option<Duration>,

    /// Stop each stream after this many frames
    pub frame_limit: Option<u64>,

    /// Silently skip every N-th color frame
    pub drop_color_every: Option<u32>,

    /// Silently skip every N-th depth frame
    pub drop_depth_every: Option<u32>,

    /// Report a stream failure after this many frames
    pub fail_after: Option<(StreamKind, u64)>,

    /// Reported sensor temperature (°C)
    pub temperature_c: f32,
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            serial: "mock-000001".to_string(),
            sync_in: false,
            sync_out: false,
            start_usec: 1_000_000,
            clock_offset_usec: 0,
            jitter_usec: 0,
            frame_interval: None,
            frame_limit: None,
            drop_color_every: None,
            drop_depth_every: None,
            fail_after: None,
            temperature_c: 35.0,
        }
    }
}

/// Simulated camera implementing [`FrameSource`]
pub struct MockCamera {
    config: MockCameraConfig,
    sync_line: Option<SyncLine>,
    streaming: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    frames_released: Arc<AtomicU64>,
}

impl fmt::Debug for MockCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCamera")
            .field("serial", &self.config.serial)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

impl MockCamera {
    pub fn new(config: MockCameraConfig) -> Self {
        Self {
            config,
            sync_line: None,
            streaming: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            frames_released: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Free-running camera with no sync cables
    pub fn standalone(serial: &str) -> Self {
        Self::new(MockCameraConfig {
            serial: serial.to_string(),
            ..Default::default()
        })
    }

    /// Camera with its sync-out jack on `line`
    pub fn master(serial: &str, line: &SyncLine) -> Self {
        Self::new(MockCameraConfig {
            serial: serial.to_string(),
            sync_out: true,
            ..Default::default()
        })
        .with_sync_line(line)
    }

    /// Camera with its sync-in jack on `line`
    pub fn subordinate(serial: &str, line: &SyncLine) -> Self {
        Self::new(MockCameraConfig {
            serial: serial.to_string(),
            sync_in: true,
            ..Default::default()
        })
        .with_sync_line(line)
    }

    pub fn with_sync_line(mut self, line: &SyncLine) -> Self {
        self.sync_line = Some(line.clone());
        self
    }

    /// Adjust the simulation parameters
    pub fn configure(mut self, f: impl FnOnce(&mut MockCameraConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn config(&self) -> &MockCameraConfig {
        &self.config
    }

    /// Images whose last handle has been dropped
    pub fn frames_released(&self) -> u64 {
        self.frames_released.load(Ordering::Relaxed)
    }

    fn spawn_streams(
        &self,
        config: &DeviceConfiguration,
        plan: &FramePlan,
        callback: &FrameCallback,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), ContractError> {
        // only subordinates wait for the trigger
        let gated = config.wired_sync_mode == WiredSyncMode::Subordinate;
        if config.color_enabled() {
            workers.push(self.spawn_stream(StreamKind::Color, plan.gated(gated), callback.clone())?);
        }
        if config.depth_sensor_enabled() {
            workers.push(self.spawn_stream(StreamKind::DepthIr, plan.gated(gated), callback.clone())?);
        }
        Ok(())
    }

    fn spawn_stream(
        &self,
        stream: StreamKind,
        plan: FramePlan,
        callback: FrameCallback,
    ) -> Result<JoinHandle<()>, ContractError> {
        let name = format!("{}-{}", self.config.serial, stream);
        let producer = Producer {
            stream,
            plan,
            config: self.config.clone(),
            gate: self.sync_line.clone(),
            streaming: self.streaming.clone(),
            released: self.frames_released.clone(),
        };

        thread::Builder::new()
            .name(name)
            .spawn(move || producer.run(callback))
            .map_err(ContractError::from)
    }
}

impl FrameSource for MockCamera {
    fn serial_number(&self) -> &str {
        &self.config.serial
    }

    fn is_sync_in_connected(&self) -> bool {
        self.config.sync_in
    }

    fn is_sync_out_connected(&self) -> bool {
        self.config.sync_out
    }

    fn start(
        &self,
        config: &DeviceConfiguration,
        callback: FrameCallback,
    ) -> Result<(), ContractError> {
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(ContractError::device_state(
                &self.config.serial,
                "mock camera is already streaming",
            ));
        }

        let plan = FramePlan::new(config);
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = self.spawn_streams(config, &plan, &callback, &mut workers) {
            self.streaming.store(false, Ordering::SeqCst);
            for worker in workers.drain(..) {
                let _ = worker.join();
            }
            return Err(e);
        }

        if config.wired_sync_mode == WiredSyncMode::Master {
            if let Some(line) = &self.sync_line {
                line.fire();
            }
        }

        debug!(
            serial = %self.config.serial,
            mode = ?config.wired_sync_mode,
            fps = config.camera_fps.hz(),
            streams = workers.len(),
            "mock camera started"
        );
        Ok(())
    }

    fn stop(&self) {
        if !self.streaming.swap(false, Ordering::SeqCst) {
            return;
        }

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!(serial = %self.config.serial, "mock producer thread panicked");
            }
        }

        if self.config.sync_out {
            if let Some(line) = &self.sync_line {
                line.reset();
            }
        }

        debug!(serial = %self.config.serial, "mock camera stopped");
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-start frame geometry and timing derived from the device configuration
#[derive(Debug, Clone)]
struct FramePlan {
    period_usec: u64,
    color_format: ImageFormat,
    color_size: Option<(u32, u32)>,
    depth_size: Option<(u32, u32)>,
    depth: bool,
    ir: bool,
    depth_delay_usec: i64,
    subordinate_delay_usec: i64,
    gated: bool,
}

impl FramePlan {
    fn new(config: &DeviceConfiguration) -> Self {
        let subordinate_delay_usec = if config.wired_sync_mode == WiredSyncMode::Subordinate {
            i64::from(config.subordinate_delay_off_master_usec)
        } else {
            0
        };

        Self {
            period_usec: u64::from(config.frame_period_usec()),
            color_format: config.color_format,
            color_size: config.color_resolution.dimensions(),
            depth_size: config.depth_mode.dimensions(),
            depth: config.depth_enabled(),
            ir: config.ir_enabled(),
            depth_delay_usec: i64::from(config.depth_delay_off_color_usec),
            subordinate_delay_usec,
            gated: false,
        }
    }

    fn gated(&self, gated: bool) -> Self {
        Self {
            gated,
            ..self.clone()
        }
    }
}

/// State moved into one producer thread
struct Producer {
    stream: StreamKind,
    plan: FramePlan,
    config: MockCameraConfig,
    gate: Option<SyncLine>,
    streaming: Arc<AtomicBool>,
    released: Arc<AtomicU64>,
}

impl Producer {
    fn run(self, callback: FrameCallback) {
        if !self.wait_for_trigger() {
            return;
        }

        let interval = self
            .config
            .frame_interval
            .unwrap_or_else(|| Duration::from_micros(self.plan.period_usec));
        let drop_every = match self.stream {
            StreamKind::Color => self.config.drop_color_every,
            StreamKind::DepthIr => self.config.drop_depth_every,
        };
        let planes = self.planes();
        let mut rng = rand::rng();
        let mut frame: u64 = 0;
        // frames follow an absolute schedule so color and depth stay in step
        let origin = Instant::now();

        while self.streaming.load(Ordering::Relaxed) {
            if self.config.frame_limit.is_some_and(|limit| frame >= limit) {
                debug!(serial = %self.config.serial, stream = %self.stream, "frame limit reached");
                break;
            }

            if let Some((stream, after)) = self.config.fail_after {
                if stream == self.stream && frame >= after {
                    warn!(serial = %self.config.serial, stream = %self.stream, "injecting stream failure");
                    callback(Err(StreamFault::new(self.stream, "simulated sensor failure")));
                    break;
                }
            }

            let skipped = drop_every.is_some_and(|n| n > 0 && (frame + 1) % u64::from(n) == 0);
            if skipped {
                trace!(serial = %self.config.serial, stream = %self.stream, frame, "frame skipped");
            } else {
                let jitter = match self.config.jitter_usec {
                    0 => 0,
                    j => rng.random_range(-i64::from(j)..=i64::from(j)),
                };
                let ts = self.timestamp(frame, jitter);
                match self.build(frame, ts, &planes) {
                    Ok(capture) => {
                        trace!(serial = %self.config.serial, stream = %self.stream, frame, ts, "frame ready");
                        callback(Ok(FrameNotification::new(self.stream, capture)));
                    }
                    Err(e) => {
                        warn!(serial = %self.config.serial, stream = %self.stream, error = %e, "failed to build frame");
                    }
                }
            }

            frame += 1;
            let due = u32::try_from(frame)
                .ok()
                .and_then(|n| interval.checked_mul(n))
                .map(|offset| origin + offset);
            match due {
                Some(due) => {
                    if let Some(wait) = due.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                None => thread::sleep(interval),
            }
        }
    }

    /// Uncompressed pixel planes, built once per run and shared by every frame
    fn planes(&self) -> Planes {
        let (cw, ch) = self.plan.color_size.unwrap_or((0, 0));
        let (dw, dh) = self.plan.depth_size.unwrap_or((0, 0));
        match self.stream {
            StreamKind::Color => Planes {
                color: raw_color_plane(self.plan.color_format, cw, ch),
                ..Planes::default()
            },
            StreamKind::DepthIr => Planes {
                color: None,
                depth: self.plan.depth.then(|| pixels16(dw, dh, 500)),
                ir: self.plan.ir.then(|| pixels16(dw, dh, 120)),
            },
        }
    }

    fn wait_for_trigger(&self) -> bool {
        let Some(line) = self.gate.as_ref().filter(|_| self.plan.gated) else {
            return true;
        };

        while self.streaming.load(Ordering::Relaxed) {
            if line.wait(Duration::from_millis(20)) {
                return true;
            }
        }
        false
    }

    fn timestamp(&self, frame: u64, jitter: i64) -> u64 {
        let stream_delay = match self.stream {
            StreamKind::Color => 0,
            StreamKind::DepthIr => self.plan.depth_delay_usec,
        };
        let base = self.config.start_usec as i64
            + (frame * self.plan.period_usec) as i64
            + self.plan.subordinate_delay_usec
            + self.config.clock_offset_usec
            + stream_delay
            + jitter;
        base.max(0) as u64
    }

    fn build(&self, frame: u64, ts: u64, planes: &Planes) -> Result<Capture, ContractError> {
        let system_ns = ts.saturating_mul(1000);
        match self.stream {
            StreamKind::Color => {
                let (w, h) = self.plan.color_size.unwrap_or((0, 0));
                let payload = planes.color.clone().unwrap_or_else(|| mjpg_payload(frame));
                let image = self
                    .image(self.plan.color_format, w, h, payload)
                    .device_timestamp_usec(ts)
                    .system_timestamp_nsec(system_ns)
                    .exposure_usec(self.plan.period_usec / 2)
                    .white_balance(4500)
                    .iso_speed(400)
                    .build()?;
                Ok(Capture::new().with_color(image))
            }
            StreamKind::DepthIr => {
                let (w, h) = self.plan.depth_size.unwrap_or((0, 0));
                let mut capture = Capture::new().with_temperature(self.config.temperature_c);
                if let Some(plane) = &planes.depth {
                    let depth = self
                        .image(ImageFormat::Depth16, w, h, plane.clone())
                        .device_timestamp_usec(ts)
                        .system_timestamp_nsec(system_ns)
                        .build()?;
                    capture.attach_depth(depth)?;
                }
                if let Some(plane) = &planes.ir {
                    let ir = self
                        .image(ImageFormat::Ir16, w, h, plane.clone())
                        .device_timestamp_usec(ts)
                        .system_timestamp_nsec(system_ns)
                        .build()?;
                    capture.attach_ir(ir)?;
                }
                Ok(capture)
            }
        }
    }

    fn image(&self, format: ImageFormat, w: u32, h: u32, payload: Bytes) -> ImageBuilder {
        let stride = format.bytes_per_pixel().map_or(0, |bpp| w * bpp);
        let released = self.released.clone();
        Image::builder(format, w, h, stride)
            .buffer(payload)
            .on_release(move |_| {
                released.fetch_add(1, Ordering::Relaxed);
            })
    }
}

/// 16-bit pixel plane filled with `value`
fn pixels16(w: u32, h: u32, value: u16) -> Bytes {
    let plane = vec![value; w as usize * h as usize];
    Bytes::copy_from_slice(bytemuck::cast_slice(&plane))
}

#[derive(Default)]
struct Planes {
    color: Option<Bytes>,
    depth: Option<Bytes>,
    ir: Option<Bytes>,
}

/// `None` for compressed formats
fn raw_color_plane(format: ImageFormat, w: u32, h: u32) -> Option<Bytes> {
    let bpp = format.bytes_per_pixel()?;
    Some(Bytes::from(vec![0x80u8; format.min_buffer_size(h, w * bpp)]))
}

/// JPEG start/end markers around the frame number
fn mjpg_payload(frame: u64) -> Bytes {
    let mut payload = vec![0xFF, 0xD8];
    payload.extend_from_slice(&frame.to_le_bytes());
    payload.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColorResolution, DepthMode, FrameResult};
    use std::sync::mpsc;

    fn config(mode: WiredSyncMode) -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ImageFormat::ColorMjpg,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::Nfov2x2Binned,
            wired_sync_mode: mode,
            ..Default::default()
        }
    }

    fn collect() -> (FrameCallback, mpsc::Receiver<FrameResult>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: FrameCallback = Arc::new(move |result| {
            let _ = tx.lock().unwrap().send(result);
        });
        (callback, rx)
    }

    fn fast(camera: MockCamera) -> MockCamera {
        camera.configure(|c| {
            c.frame_interval = Some(Duration::from_millis(1));
            c.frame_limit = Some(4);
        })
    }

    #[test]
    fn test_streams_follow_device_clock() {
        let camera = fast(MockCamera::standalone("cam"));
        let (callback, rx) = collect();

        let mut cfg = config(WiredSyncMode::Standalone);
        cfg.depth_delay_off_color_usec = -100;
        camera.start(&cfg, callback).unwrap();
        assert!(camera.start(&cfg, Arc::new(|_: FrameResult| {})).is_err());

        let mut color = Vec::new();
        let mut depth = Vec::new();
        for _ in 0..8 {
            let notification = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
            match notification.stream {
                StreamKind::Color => color.push(notification.capture.color_timestamp_usec().unwrap()),
                StreamKind::DepthIr => {
                    assert!(notification.capture.depth().is_some());
                    assert!(notification.capture.ir().is_some());
                    assert_eq!(notification.capture.temperature(), Some(35.0));
                    depth.push(notification.capture.depth_ir_timestamp_usec().unwrap());
                }
            }
        }
        camera.stop();

        assert_eq!(color, vec![1_000_000, 1_033_333, 1_066_666, 1_099_999]);
        assert_eq!(depth, vec![999_900, 1_033_233, 1_066_566, 1_099_899]);
    }

    #[test]
    fn test_release_hook_counts_dropped_images() {
        let camera = fast(MockCamera::standalone("cam"));
        let (callback, rx) = collect();
        let mut cfg = config(WiredSyncMode::Standalone);
        cfg.depth_mode = DepthMode::Off;
        camera.start(&cfg, callback).unwrap();

        for _ in 0..4 {
            drop(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        camera.stop();
        assert_eq!(camera.frames_released(), 4);
    }

    #[test]
    fn test_subordinate_waits_for_master() {
        let line = SyncLine::new();
        let master = fast(MockCamera::master("m", &line));
        let subordinate = fast(MockCamera::subordinate("s", &line));
        let (callback, rx) = collect();

        let mut sub_cfg = config(WiredSyncMode::Subordinate);
        sub_cfg.depth_mode = DepthMode::Off;
        sub_cfg.subordinate_delay_off_master_usec = 1000;
        subordinate.start(&sub_cfg, callback).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let mut master_cfg = config(WiredSyncMode::Master);
        master_cfg.depth_mode = DepthMode::Off;
        master.start(&master_cfg, Arc::new(|_: FrameResult| {})).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(first.capture.color_timestamp_usec(), Some(1_001_000));

        subordinate.stop();
        master.stop();
    }

    #[test]
    fn test_injected_failure() {
        let camera = fast(MockCamera::standalone("cam")).configure(|c| {
            c.fail_after = Some((StreamKind::DepthIr, 1));
        });
        let (callback, rx) = collect();
        let mut cfg = config(WiredSyncMode::Standalone);
        cfg.color_resolution = ColorResolution::Off;
        camera.start(&cfg, callback).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
        let fault = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap_err();
        assert_eq!(fault.stream, StreamKind::DepthIr);
        camera.stop();
    }

    #[test]
    fn test_periodic_drops() {
        let camera = fast(MockCamera::standalone("cam")).configure(|c| {
            c.drop_color_every = Some(2);
        });
        let (callback, rx) = collect();
        let mut cfg = config(WiredSyncMode::Standalone);
        cfg.depth_mode = DepthMode::Off;
        camera.start(&cfg, callback).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        camera.stop();

        assert_eq!(first.capture.color_timestamp_usec(), Some(1_000_000));
        assert_eq!(second.capture.color_timestamp_usec(), Some(1_066_666));
    }

    #[test]
    fn test_pixels16_is_little_endian_plane() {
        let plane = pixels16(2, 1, 0x0102);
        assert_eq!(plane.len(), 4);
        assert_eq!(u16::from_ne_bytes([plane[0], plane[1]]), 0x0102);
    }
}
