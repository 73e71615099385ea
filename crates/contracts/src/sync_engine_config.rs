//! Sync engine configuration contracts that can be shared across crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reference tolerance between expected and observed timestamps (µs)
pub const MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC: i64 = 50;

/// Default depth of each device's output capture queue
pub const DEFAULT_CAPTURE_QUEUE_CAPACITY: usize = 2;

/// Multi-device sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEngineConfig {
    /// Symmetric tolerance around each expected timestamp (µs)
    #[serde(default = "default_tolerance")]
    pub tolerance_usec: i64,

    /// Compare subordinate depth images instead of color
    #[serde(default)]
    pub compare_depth_for_subordinate: bool,

    /// Deadline for one synchronized retrieval; `None` waits indefinitely
    #[serde(default, with = "opt_millis")]
    pub timeout: Option<Duration>,

    /// Slice used for blocking fetches so deadlines and cancellation are observed
    #[serde(default = "default_poll_interval", with = "millis")]
    pub poll_interval: Duration,

    /// Output queue depth per device
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Drift estimator tuning
    #[serde(default)]
    pub drift: DriftConfig,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            tolerance_usec: MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC,
            compare_depth_for_subordinate: false,
            timeout: None,
            poll_interval: default_poll_interval(),
            queue_capacity: DEFAULT_CAPTURE_QUEUE_CAPACITY,
            drift: DriftConfig::default(),
        }
    }
}

/// Kalman drift estimator configuration (µs domain)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Process noise (Q), µs²
    pub process_noise: f64,
    /// Measurement noise (R), µs²
    pub measurement_noise: f64,
    /// Residual window size for adaptive tuning
    pub residual_window: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 100.0,
            residual_window: 30,
        }
    }
}

fn default_tolerance() -> i64 {
    MAX_ALLOWABLE_TIME_OFFSET_ERROR_USEC
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_queue_capacity() -> usize {
    DEFAULT_CAPTURE_QUEUE_CAPACITY
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncEngineConfig::default();
        assert_eq!(config.tolerance_usec, 50);
        assert!(config.timeout.is_none());
        assert_eq!(config.queue_capacity, 2);
    }

    #[test]
    fn test_millis_fields() {
        let config: SyncEngineConfig =
            serde_json::from_str(r#"{ "timeout": 1500, "poll_interval": 20 }"#).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.tolerance_usec, 50);
    }
}
