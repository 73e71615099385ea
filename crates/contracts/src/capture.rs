//! Capture - what the sensors recorded at approximately one instant

use crate::{ContractError, Image};

/// Bundle of zero or one color, depth and IR image plus an optional temperature.
///
/// Cloning is cheap and shares the underlying images. An attached image is never
/// replaced in place: detach the old one first.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    color: Option<Image>,
    depth: Option<Image>,
    ir: Option<Image>,
    temperature_c: Option<f32>,
}

impl Capture {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(&self) -> Option<&Image> {
        self.color.as_ref()
    }

    pub fn depth(&self) -> Option<&Image> {
        self.depth.as_ref()
    }

    pub fn ir(&self) -> Option<&Image> {
        self.ir.as_ref()
    }

    /// Sensor temperature in degrees Celsius
    pub fn temperature(&self) -> Option<f32> {
        self.temperature_c
    }

    pub fn set_temperature(&mut self, temperature_c: Option<f32>) {
        self.temperature_c = temperature_c;
    }

    pub fn attach_color(&mut self, image: Image) -> Result<(), ContractError> {
        attach(&mut self.color, image, "color")
    }

    pub fn attach_depth(&mut self, image: Image) -> Result<(), ContractError> {
        attach(&mut self.depth, image, "depth")
    }

    pub fn attach_ir(&mut self, image: Image) -> Result<(), ContractError> {
        attach(&mut self.ir, image, "ir")
    }

    pub fn detach_color(&mut self) -> Option<Image> {
        self.color.take()
    }

    pub fn detach_depth(&mut self) -> Option<Image> {
        self.depth.take()
    }

    pub fn detach_ir(&mut self) -> Option<Image> {
        self.ir.take()
    }

    /// Builder-style color attach for freshly created captures
    pub fn with_color(mut self, image: Image) -> Self {
        self.color = Some(image);
        self
    }

    pub fn with_depth(mut self, image: Image) -> Self {
        self.depth = Some(image);
        self
    }

    pub fn with_ir(mut self, image: Image) -> Self {
        self.ir = Some(image);
        self
    }

    pub fn with_temperature(mut self, temperature_c: f32) -> Self {
        self.temperature_c = Some(temperature_c);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.image_count() == 0
    }

    pub fn image_count(&self) -> usize {
        [&self.color, &self.depth, &self.ir]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Timestamp of the depth/IR sensor: depth image if present, else IR
    pub fn depth_ir_timestamp_usec(&self) -> Option<u64> {
        self.depth
            .as_ref()
            .or(self.ir.as_ref())
            .map(Image::device_timestamp_usec)
    }

    pub fn color_timestamp_usec(&self) -> Option<u64> {
        self.color.as_ref().map(Image::device_timestamp_usec)
    }
}

fn attach(slot: &mut Option<Image>, image: Image, name: &'static str) -> Result<(), ContractError> {
    if slot.is_some() {
        return Err(ContractError::SlotOccupied { slot: name });
    }
    *slot = Some(image);
    Ok(())
}
