//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Every image carries a device timestamp in microseconds; it is the only clock
//!   used for pairing and multi-device alignment
//! - Host timestamps (nanoseconds) are informational
//! - Expected-vs-observed comparisons happen in signed 64-bit arithmetic

mod blueprint;
mod capture;
mod config;
mod device;
mod error;
mod image;
mod sync;
mod sync_engine_config;
mod wait;

pub use blueprint::*;
pub use capture::Capture;
pub use config::*;
pub use device::*;
pub use error::*;
pub use image::{Image, ImageBuilder, ImageFormat, ReleaseFn};
pub use sync::*;
pub use sync_engine_config::*;
pub use wait::Wait;
