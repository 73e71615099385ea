//! Playback source: replays recorded images through the frame-ready path.
//!
//! Images are queued on a [`StreamReader`]; one producer thread per physical
//! stream drains it and raises notifications until the reader reports end of
//! stream. Dropping the callback at that point is what tells the consumer the
//! source is exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use contracts::{
    Capture, ContractError, DeviceConfiguration, FrameCallback, FrameNotification, FrameSource,
    StreamKind, Wait, WaitError,
};
use tracing::{debug, trace};

use crate::reader::{ImageStream, StreamReader};

/// Slice used by producer threads so `stop` is observed promptly
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Finite [`FrameSource`] backed by a [`StreamReader`]
pub struct PlaybackSource {
    serial: String,
    sync_in: bool,
    sync_out: bool,
    reader: Arc<StreamReader>,
    streaming: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackSource {
    /// Create a source with `capacity` buffered images per stream
    pub fn new(serial: impl Into<String>, capacity: usize) -> Result<Self, ContractError> {
        let reader = StreamReader::new(capacity)?;
        reader.enable(&ImageStream::ALL);

        Ok(Self {
            serial: serial.into(),
            sync_in: false,
            sync_out: false,
            reader: Arc::new(reader),
            streaming: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Report sync jacks as if the recording came from a wired rig
    pub fn with_sync_jacks(mut self, sync_in: bool, sync_out: bool) -> Self {
        self.sync_in = sync_in;
        self.sync_out = sync_out;
        self
    }

    /// Reader the recording is loaded into
    pub fn reader(&self) -> &Arc<StreamReader> {
        &self.reader
    }

    /// Queue a recorded capture
    pub fn load(&self, capture: &Capture) {
        self.reader.push_capture(capture);
    }

    /// Mark the recording complete on every stream
    pub fn finish(&self) {
        for stream in ImageStream::ALL {
            self.reader.finish(stream);
        }
    }

    fn spawn(
        &self,
        stream: StreamKind,
        streams: Vec<ImageStream>,
        callback: FrameCallback,
    ) -> Result<JoinHandle<()>, ContractError> {
        let reader = self.reader.clone();
        let streaming = self.streaming.clone();
        let serial = self.serial.clone();

        thread::Builder::new()
            .name(format!("{serial}-playback-{stream}"))
            .spawn(move || {
                while streaming.load(Ordering::Relaxed) {
                    match next_block(&reader, &streams) {
                        Ok(Some(capture)) => {
                            trace!(%serial, %stream, "replaying frame");
                            callback(Ok(FrameNotification::new(stream, capture)));
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            debug!(%serial, %stream, reason = %e, "playback stream ended");
                            break;
                        }
                    }
                }
            })
            .map_err(ContractError::from)
    }
}

/// One notification worth of images, `None` when nothing arrived within the slice
fn next_block(
    reader: &StreamReader,
    streams: &[ImageStream],
) -> Result<Option<Capture>, WaitError> {
    let mut capture = Capture::new();
    for (i, stream) in streams.iter().enumerate() {
        // the first image paces the block; companions are already queued
        let wait = if i == 0 { Wait::For(POLL_SLICE) } else { Wait::POLL };
        let image = match reader.next(*stream, wait) {
            Ok(image) => image,
            Err(WaitError::Timeout) if i == 0 => return Ok(None),
            Err(WaitError::Timeout) => continue,
            Err(e) if capture.is_empty() => return Err(e),
            Err(_) => break,
        };
        let attached = match stream {
            ImageStream::Color => capture.attach_color(image),
            ImageStream::Depth => capture.attach_depth(image),
            ImageStream::Ir => capture.attach_ir(image),
        };
        if attached.is_err() {
            return Err(WaitError::Failed);
        }
    }
    Ok(Some(capture))
}

impl FrameSource for PlaybackSource {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn is_sync_in_connected(&self) -> bool {
        self.sync_in
    }

    fn is_sync_out_connected(&self) -> bool {
        self.sync_out
    }

    fn start(
        &self,
        config: &DeviceConfiguration,
        callback: FrameCallback,
    ) -> Result<(), ContractError> {
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(ContractError::device_state(
                &self.serial,
                "playback is already running",
            ));
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if config.color_enabled() {
            workers.push(self.spawn(StreamKind::Color, vec![ImageStream::Color], callback.clone())?);
        }

        let mut depth_ir = Vec::new();
        if config.depth_enabled() {
            depth_ir.push(ImageStream::Depth);
        }
        if config.ir_enabled() {
            depth_ir.push(ImageStream::Ir);
        }
        if !depth_ir.is_empty() {
            workers.push(self.spawn(StreamKind::DepthIr, depth_ir, callback)?);
        }

        debug!(serial = %self.serial, streams = workers.len(), "playback started");
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
            let _ = worker.join();
        }
        debug!(serial = %self.serial, "playback stopped");
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColorResolution, DepthMode, FrameResult, Image, ImageFormat};
    use std::sync::mpsc;

    fn image(format: ImageFormat, ts: u64) -> Image {
        Image::builder(format, 2, 2, 4)
            .device_timestamp_usec(ts)
            .build()
            .unwrap()
    }

    #[test]
    fn test_replays_recording_then_drops_callback() {
        let source = PlaybackSource::new("rec", 8).unwrap();
        for ts in [100u64, 200, 300] {
            source.load(
                &Capture::new()
                    .with_depth(image(ImageFormat::Depth16, ts))
                    .with_ir(image(ImageFormat::Ir16, ts)),
            );
        }
        source.finish();

        let (tx, rx) = mpsc::channel::<FrameResult>();
        let tx = Mutex::new(tx);
        let config = DeviceConfiguration {
            depth_mode: DepthMode::NfovUnbinned,
            color_resolution: ColorResolution::Off,
            ..Default::default()
        };
        source
            .start(
                &config,
                Arc::new(move |result| {
                    let _ = tx.lock().unwrap().send(result);
                }),
            )
            .unwrap();

        let mut timestamps = Vec::new();
        // the channel disconnects once the producer thread drops the callback
        while let Ok(result) = rx.recv_timeout(Duration::from_secs(2)) {
            let notification = result.unwrap();
            assert_eq!(notification.stream, StreamKind::DepthIr);
            assert!(notification.capture.ir().is_some());
            timestamps.push(notification.capture.depth_ir_timestamp_usec().unwrap());
        }
        assert_eq!(timestamps, vec![100, 200, 300]);
        source.stop();
    }
}
