//! Image - buffer plus capture metadata
//!
//! `Image` is a cheap-to-clone handle. The backing buffer is either owned here or
//! borrowed from an external allocator that registered a release hook; the hook runs
//! exactly once, when the last handle is dropped.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Release hook invoked with the backing buffer when the last handle goes away
pub type ReleaseFn = Box<dyn FnOnce(Bytes) + Send + Sync>;

/// Pixel / payload format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    ColorMjpg,
    ColorNv12,
    ColorYuy2,
    ColorBgra32,
    Depth16,
    Ir16,
    Custom8,
    Custom16,
    Custom,
}

impl ImageFormat {
    /// Bytes per pixel on the first plane; `None` for compressed or opaque payloads
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            ImageFormat::ColorBgra32 => Some(4),
            ImageFormat::ColorYuy2
            | ImageFormat::Depth16
            | ImageFormat::Ir16
            | ImageFormat::Custom16 => Some(2),
            ImageFormat::ColorNv12 | ImageFormat::Custom8 => Some(1),
            ImageFormat::ColorMjpg | ImageFormat::Custom => None,
        }
    }

    /// Minimum buffer size for a `stride * height` image of this format
    pub fn min_buffer_size(self, height: u32, stride_bytes: u32) -> usize {
        let plane = height as usize * stride_bytes as usize;
        match self {
            // interleaved UV plane at half height
            ImageFormat::ColorNv12 => plane + plane / 2,
            _ => plane,
        }
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            ImageFormat::ColorMjpg
                | ImageFormat::ColorNv12
                | ImageFormat::ColorYuy2
                | ImageFormat::ColorBgra32
        )
    }
}

struct ImageBuffer {
    data: Bytes,
    release: Option<ReleaseFn>,
}

impl Drop for ImageBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(std::mem::take(&mut self.data));
        }
    }
}

struct ImageInner {
    format: ImageFormat,
    width: u32,
    height: u32,
    stride_bytes: u32,
    device_timestamp_usec: u64,
    system_timestamp_nsec: u64,
    exposure_usec: Option<u64>,
    white_balance: Option<u32>,
    iso_speed: Option<u32>,
    buffer: ImageBuffer,
}

/// Reference-counted image handle
#[derive(Clone)]
pub struct Image(Arc<ImageInner>);

impl Image {
    /// Allocate a zeroed image sized for `stride_bytes * height`
    pub fn new(
        format: ImageFormat,
        width: u32,
        height: u32,
        stride_bytes: u32,
    ) -> Result<Self, ContractError> {
        Self::builder(format, width, height, stride_bytes).build()
    }

    /// Start building an image
    pub fn builder(format: ImageFormat, width: u32, height: u32, stride_bytes: u32) -> ImageBuilder {
        ImageBuilder {
            format,
            width,
            height,
            stride_bytes,
            device_timestamp_usec: 0,
            system_timestamp_nsec: 0,
            exposure_usec: None,
            white_balance: None,
            iso_speed: None,
            data: None,
            release: None,
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.0.format
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn stride_bytes(&self) -> u32 {
        self.0.stride_bytes
    }

    /// Device clock timestamp (microseconds)
    pub fn device_timestamp_usec(&self) -> u64 {
        self.0.device_timestamp_usec
    }

    /// Host clock timestamp (nanoseconds)
    pub fn system_timestamp_nsec(&self) -> u64 {
        self.0.system_timestamp_nsec
    }

    pub fn exposure_usec(&self) -> Option<u64> {
        self.0.exposure_usec
    }

    pub fn white_balance(&self) -> Option<u32> {
        self.0.white_balance
    }

    pub fn iso_speed(&self) -> Option<u32> {
        self.0.iso_speed
    }

    pub fn buffer(&self) -> &[u8] {
        &self.0.buffer.data
    }

    /// Zero-copy view of the buffer
    pub fn bytes(&self) -> Bytes {
        self.0.buffer.data.clone()
    }

    pub fn size(&self) -> usize {
        self.0.buffer.data.len()
    }

    /// Number of live handles to this image
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles refer to the same image
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.0.format)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("stride_bytes", &self.0.stride_bytes)
            .field("device_timestamp_usec", &self.0.device_timestamp_usec)
            .field("size", &self.size())
            .finish()
    }
}

/// Builder for [`Image`]
pub struct ImageBuilder {
    format: ImageFormat,
    width: u32,
    height: u32,
    stride_bytes: u32,
    device_timestamp_usec: u64,
    system_timestamp_nsec: u64,
    exposure_usec: Option<u64>,
    white_balance: Option<u32>,
    iso_speed: Option<u32>,
    data: Option<Bytes>,
    release: Option<ReleaseFn>,
}

impl ImageBuilder {
    pub fn device_timestamp_usec(mut self, ts: u64) -> Self {
        self.device_timestamp_usec = ts;
        self
    }

    pub fn system_timestamp_nsec(mut self, ts: u64) -> Self {
        self.system_timestamp_nsec = ts;
        self
    }

    pub fn exposure_usec(mut self, exposure: u64) -> Self {
        self.exposure_usec = Some(exposure);
        self
    }

    pub fn white_balance(mut self, kelvin: u32) -> Self {
        self.white_balance = Some(kelvin);
        self
    }

    pub fn iso_speed(mut self, iso: u32) -> Self {
        self.iso_speed = Some(iso);
        self
    }

    /// Use caller-provided memory instead of allocating
    pub fn buffer(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Register a hook that receives the buffer back when the image is destroyed
    pub fn on_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce(Bytes) + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    /// Validate geometry and produce the image.
    ///
    /// On failure a registered release hook still runs with the rejected buffer.
    pub fn build(self) -> Result<Image, ContractError> {
        let min_size = self.format.min_buffer_size(self.height, self.stride_bytes);
        let data = self
            .data
            .unwrap_or_else(|| Bytes::from(vec![0u8; min_size]));
        let buffer = ImageBuffer {
            data,
            release: self.release,
        };

        if let Some(bpp) = self.format.bytes_per_pixel() {
            let min_stride = self.width as u64 * bpp as u64;
            if (self.stride_bytes as u64) < min_stride {
                return Err(ContractError::invalid_image(format!(
                    "{:?} stride {} smaller than width {} x {} bytes",
                    self.format, self.stride_bytes, self.width, bpp
                )));
            }
            if buffer.data.len() < min_size {
                return Err(ContractError::invalid_image(format!(
                    "{:?} buffer of {} bytes cannot hold {} rows of {} bytes",
                    self.format,
                    buffer.data.len(),
                    self.height,
                    self.stride_bytes
                )));
            }
        }

        Ok(Image(Arc::new(ImageInner {
            format: self.format,
            width: self.width,
            height: self.height,
            stride_bytes: self.stride_bytes,
            device_timestamp_usec: self.device_timestamp_usec,
            system_timestamp_nsec: self.system_timestamp_nsec,
            exposure_usec: self.exposure_usec,
            white_balance: self.white_balance,
            iso_speed: self.iso_speed,
            buffer,
        })))
    }
}
