//! Simulated rig sessions.

mod orchestrator;
mod rig;
mod stats;

pub use orchestrator::{Session, SessionConfig};
pub use stats::RunStats;
