//! Per-stream image queues with end-of-stream signalling

use std::fmt;

use contracts::{Capture, ContractError, DeviceConfiguration, Image, Wait, WaitError};
use tracing::{debug, trace};

use crate::queue::BoundedQueue;

/// Image stream held by a [`StreamReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageStream {
    Color,
    Depth,
    Ir,
}

impl ImageStream {
    pub const ALL: [ImageStream; 3] = [ImageStream::Color, ImageStream::Depth, ImageStream::Ir];

    /// Streams a device produces under `config`
    pub fn enabled_by(config: &DeviceConfiguration) -> Vec<ImageStream> {
        let mut streams = Vec::with_capacity(3);
        if config.color_enabled() {
            streams.push(ImageStream::Color);
        }
        if config.depth_enabled() {
            streams.push(ImageStream::Depth);
        }
        if config.ir_enabled() {
            streams.push(ImageStream::Ir);
        }
        streams
    }

    fn index(self) -> usize {
        match self {
            ImageStream::Color => 0,
            ImageStream::Depth => 1,
            ImageStream::Ir => 2,
        }
    }
}

impl fmt::Display for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageStream::Color => f.write_str("color"),
            ImageStream::Depth => f.write_str("depth"),
            ImageStream::Ir => f.write_str("ir"),
        }
    }
}

/// One bounded image queue per physical stream.
///
/// A finite source calls [`StreamReader::finish`] once exhausted. End of stream
/// is a flag on the queue rather than an entry in it, so readers drain every
/// remaining image first and then see [`WaitError::Eof`] on every later call.
pub struct StreamReader {
    queues: [BoundedQueue<Image>; 3],
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("color", &self.queues[0].len())
            .field("depth", &self.queues[1].len())
            .field("ir", &self.queues[2].len())
            .finish()
    }
}

impl StreamReader {
    /// Create a reader with `capacity` slots per stream; all streams start stopped
    pub fn new(capacity: usize) -> Result<Self, ContractError> {
        Ok(Self {
            queues: [
                BoundedQueue::with_name("reader_color", capacity)?,
                BoundedQueue::with_name("reader_depth", capacity)?,
                BoundedQueue::with_name("reader_ir", capacity)?,
            ],
        })
    }

    fn queue(&self, stream: ImageStream) -> &BoundedQueue<Image> {
        &self.queues[stream.index()]
    }

    pub fn is_finished(&self, stream: ImageStream) -> bool {
        self.queue(stream).is_finished()
    }

    /// Enable the listed streams; the others are left as they are
    pub fn enable(&self, streams: &[ImageStream]) {
        for stream in streams {
            self.queue(*stream).enable();
        }
        debug!(?streams, "stream reader enabled");
    }

    /// Disable every stream, purging queued images
    pub fn disable(&self) {
        for queue in &self.queues {
            queue.disable();
        }
    }

    /// Stop every stream, purging queued images and waking blocked readers
    pub fn stop(&self) {
        for queue in &self.queues {
            queue.stop();
        }
    }

    /// Queue an image on its stream, dropping the oldest when full.
    ///
    /// Images pushed after [`StreamReader::finish`] are released.
    pub fn push(&self, stream: ImageStream, image: Image) {
        let queue = self.queue(stream);
        if queue.is_finished() {
            trace!(%stream, "push after end of stream ignored");
            return;
        }
        queue.push(image);
    }

    /// Split a capture into its per-stream queues
    pub fn push_capture(&self, capture: &Capture) {
        if let Some(color) = capture.color() {
            self.push(ImageStream::Color, color.clone());
        }
        if let Some(depth) = capture.depth() {
            self.push(ImageStream::Depth, depth.clone());
        }
        if let Some(ir) = capture.ir() {
            self.push(ImageStream::Ir, ir.clone());
        }
    }

    /// Mark a stream as exhausted and wake blocked readers. Idempotent.
    pub fn finish(&self, stream: ImageStream) {
        if !self.is_finished(stream) {
            debug!(%stream, "end of stream");
        }
        self.queue(stream).finish();
    }

    /// Next image of `stream`, waiting as allowed by `wait`
    pub fn next(&self, stream: ImageStream, wait: Wait) -> Result<Image, WaitError> {
        self.queue(stream).pop(wait)
    }

    /// Images currently buffered for `stream`
    pub fn buffered(&self, stream: ImageStream) -> usize {
        self.queue(stream).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColorResolution, DepthMode, ImageFormat};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn image(format: ImageFormat, ts: u64) -> Image {
        Image::builder(format, 2, 2, 4)
            .device_timestamp_usec(ts)
            .build()
            .unwrap()
    }

    fn reader() -> StreamReader {
        let reader = StreamReader::new(4).unwrap();
        reader.enable(&ImageStream::ALL);
        reader
    }

    #[test]
    fn test_streams_are_routed_separately() {
        let reader = reader();
        let capture = Capture::new()
            .with_depth(image(ImageFormat::Depth16, 10))
            .with_ir(image(ImageFormat::Ir16, 10));
        reader.push_capture(&capture);

        assert_eq!(reader.buffered(ImageStream::Color), 0);
        assert_eq!(
            reader
                .next(ImageStream::Ir, Wait::POLL)
                .unwrap()
                .device_timestamp_usec(),
            10
        );
        assert_eq!(
            reader.next(ImageStream::Color, Wait::POLL).unwrap_err(),
            WaitError::Timeout
        );
    }

    #[test]
    fn test_eof_after_drain_and_sticky() {
        let reader = reader();
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 1));
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 2));
        reader.finish(ImageStream::Depth);
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 3));

        assert_eq!(reader.buffered(ImageStream::Depth), 2);
        let ts: Vec<u64> = (0..2)
            .map(|_| {
                reader
                    .next(ImageStream::Depth, Wait::POLL)
                    .unwrap()
                    .device_timestamp_usec()
            })
            .collect();
        assert_eq!(ts, vec![1, 2]);

        for _ in 0..3 {
            assert_eq!(
                reader.next(ImageStream::Depth, Wait::Forever).unwrap_err(),
                WaitError::Eof
            );
        }
    }

    #[test]
    fn test_finish_on_full_stream_keeps_every_image() {
        let reader = StreamReader::new(2).unwrap();
        reader.enable(&[ImageStream::Depth]);
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 1_000));
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 34_333));
        reader.finish(ImageStream::Depth);

        assert_eq!(reader.buffered(ImageStream::Depth), 2);
        let first = reader.next(ImageStream::Depth, Wait::POLL).unwrap();
        let second = reader.next(ImageStream::Depth, Wait::POLL).unwrap();
        assert_eq!(first.device_timestamp_usec(), 1_000);
        assert_eq!(second.device_timestamp_usec(), 34_333);
        assert_eq!(
            reader.next(ImageStream::Depth, Wait::POLL).unwrap_err(),
            WaitError::Eof
        );
    }

    #[test]
    fn test_finish_wakes_blocked_reader() {
        let reader = Arc::new(reader());
        let waiter = {
            let reader = reader.clone();
            thread::spawn(move || reader.next(ImageStream::Color, Wait::Forever))
        };
        thread::sleep(Duration::from_millis(30));
        reader.finish(ImageStream::Color);
        assert_eq!(waiter.join().unwrap().unwrap_err(), WaitError::Eof);
    }

    #[test]
    fn test_disabled_stream_fails() {
        let reader = StreamReader::new(2).unwrap();
        reader.enable(&[ImageStream::Color]);
        reader.push(ImageStream::Depth, image(ImageFormat::Depth16, 1));
        assert_eq!(
            reader.next(ImageStream::Depth, Wait::POLL).unwrap_err(),
            WaitError::Failed
        );

        reader.push(ImageStream::Color, image(ImageFormat::ColorMjpg, 5));
        reader.disable();
        assert_eq!(
            reader.next(ImageStream::Color, Wait::POLL).unwrap_err(),
            WaitError::Failed
        );
    }

    #[test]
    fn test_enabled_by_config() {
        let config = DeviceConfiguration {
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::PassiveIr,
            ..Default::default()
        };
        assert_eq!(
            ImageStream::enabled_by(&config),
            vec![ImageStream::Color, ImageStream::Ir]
        );
    }
}
