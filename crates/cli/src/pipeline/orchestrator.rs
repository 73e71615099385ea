//! Session orchestrator: opens the rig, runs the capture loop, tears it down.
//!
//! The loop is blocking; callers on an async runtime run it through
//! `spawn_blocking` and stop it with the [`CancelToken`].

use std::time::{Duration, Instant};

use contracts::{ContractError, RigBlueprint};
use ingestion::MockCamera;
use sync_engine::{CancelToken, Device, MultiDeviceSynchronizer, SyncOptions};
use tracing::{debug, info, warn};

use super::{rig, RunStats};
use crate::error::CliError;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Validated rig blueprint
    pub blueprint: RigBlueprint,

    /// Synchronized sets to retrieve (None = until cancelled)
    pub captures: Option<u64>,

    /// Pause between simulated frames (None = the configured frame rate)
    pub frame_interval: Option<Duration>,

    /// Continue after a failed retrieval
    pub keep_going: bool,
}

/// One run of a simulated rig
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Open, start and drain the rig until the capture count, a failure or cancellation
    pub fn run(self, cancel: &CancelToken) -> Result<RunStats, CliError> {
        let blueprint = &self.config.blueprint;

        let devices =
            rig::build_devices(blueprint, self.config.frame_interval).map_err(CliError::RigSetup)?;
        let mut synchronizer =
            MultiDeviceSynchronizer::new(devices, blueprint.to_sync_engine_config())
                .map_err(CliError::RigSetup)?;

        let configs =
            rig::configs_in_order(blueprint, synchronizer.serials()).map_err(CliError::RigSetup)?;
        synchronizer
            .start_cameras(&configs)
            .map_err(CliError::RigSetup)?;

        info!(
            rig = %blueprint.rig.name,
            devices = ?synchronizer.serials(),
            compare_depth = blueprint.sync.compare_depth_for_subordinate,
            "rig started"
        );

        let mut stats = RunStats {
            devices: synchronizer.serials().to_vec(),
            ..Default::default()
        };
        let started = Instant::now();
        let result = self.capture_loop(&mut synchronizer, cancel, &mut stats);
        stats.duration = started.elapsed();

        synchronizer.stop_cameras();
        collect_pairing_stats(&synchronizer, &mut stats);

        info!(
            synced = stats.captures_synced,
            failures = stats.failures,
            duration_secs = stats.duration.as_secs_f64(),
            "rig stopped"
        );

        result.map(|()| stats)
    }

    fn capture_loop(
        &self,
        synchronizer: &mut MultiDeviceSynchronizer<Device<MockCamera>>,
        cancel: &CancelToken,
        stats: &mut RunStats,
    ) -> Result<(), CliError> {
        let compare_depth = synchronizer.config().compare_depth_for_subordinate;
        let mut index: u64 = 0;

        while self.config.captures.is_none_or(|max| index < max) {
            let options = SyncOptions::from_config(synchronizer.config()).with_cancel(cancel.clone());

            match synchronizer.get_synchronized_captures(compare_depth, &options) {
                Ok(synced) => {
                    stats.captures_synced += 1;
                    stats.sync_metrics.update(&synced.report);
                    debug!(
                        index,
                        reference_ts = synced.report.reference_timestamp_usec,
                        passes = synced.report.passes,
                        refetches = ?synced.report.refetches,
                        "synchronized set"
                    );
                }
                Err(ContractError::Cancelled) => {
                    info!(index, "capture loop cancelled");
                    stats.cancelled = true;
                    return Ok(());
                }
                Err(e) => {
                    stats.failures += 1;
                    stats.sync_metrics.record_failure(failure_label(&e));
                    if !self.config.keep_going || !is_transient(&e) {
                        return Err(CliError::Sync { index, source: e });
                    }
                    warn!(index, error = %e, "synchronized retrieval failed, continuing");
                }
            }
            index += 1;
        }

        Ok(())
    }
}

fn collect_pairing_stats(
    synchronizer: &MultiDeviceSynchronizer<Device<MockCamera>>,
    stats: &mut RunStats,
) {
    for device in synchronizer.devices() {
        stats
            .sync_metrics
            .set_assembler_stats(device.serial(), device.stats());
    }
}

/// Failures a later retrieval may recover from
fn is_transient(error: &ContractError) -> bool {
    matches!(error, ContractError::SyncTimeout { .. })
}

fn failure_label(error: &ContractError) -> &'static str {
    match error {
        ContractError::SyncTimeout { .. } => "timeout",
        ContractError::CaptureFailed { .. } => "capture_failed",
        ContractError::TimestampOverflow { .. } => "timestamp_overflow",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ColorResolution, DepthMode, DeviceBlueprint, DeviceConfiguration, RigConfig,
        SimulationConfig, SyncConfig, WiredSyncMode,
    };

    fn device(serial: &str, mode: WiredSyncMode, delay: u32) -> DeviceBlueprint {
        DeviceBlueprint {
            serial: serial.into(),
            sync_in: mode == WiredSyncMode::Subordinate,
            sync_out: mode == WiredSyncMode::Master,
            config: DeviceConfiguration {
                color_resolution: ColorResolution::R720p,
                depth_mode: DepthMode::NfovUnbinned,
                synchronized_images_only: true,
                wired_sync_mode: mode,
                subordinate_delay_off_master_usec: delay,
                ..Default::default()
            },
            simulation: SimulationConfig::default(),
        }
    }

    fn session(devices: Vec<DeviceBlueprint>, captures: u64) -> Session {
        Session::new(SessionConfig {
            blueprint: RigBlueprint {
                version: Default::default(),
                rig: RigConfig::default(),
                devices,
                sync: SyncConfig {
                    timeout_ms: Some(5_000),
                    ..Default::default()
                },
            },
            captures: Some(captures),
            frame_interval: Some(Duration::from_millis(2)),
            keep_going: false,
        })
    }

    #[test]
    fn test_two_device_rig_converges() {
        let session = session(
            vec![
                device("sub", WiredSyncMode::Subordinate, 160),
                device("master", WiredSyncMode::Master, 0),
            ],
            5,
        );
        let stats = session.run(&CancelToken::new()).unwrap();

        assert_eq!(stats.devices, ["master", "sub"]);
        assert_eq!(stats.captures_synced, 5);
        assert_eq!(stats.failures, 0);
        assert!(!stats.cancelled);
        assert_eq!(stats.sync_metrics.summary().total_synced, 5);
        assert!(stats.sync_metrics.assembler.contains_key("sub"));
    }

    #[test]
    fn test_cancelled_before_first_set() {
        let session = session(vec![device("solo", WiredSyncMode::Standalone, 0)], 10);
        let cancel = CancelToken::new();
        cancel.cancel();

        let stats = session.run(&cancel).unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.captures_synced, 0);
    }

    #[test]
    fn test_missing_sync_cable_is_setup_error() {
        let mut sub = device("sub", WiredSyncMode::Subordinate, 0);
        sub.sync_in = false;
        let session = session(vec![sub, device("master", WiredSyncMode::Master, 0)], 1);

        let err = session.run(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, CliError::RigSetup(_)));
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(
            failure_label(&ContractError::SyncTimeout {
                waited_ms: 1,
                passes: 1
            }),
            "timeout"
        );
        assert!(is_transient(&ContractError::SyncTimeout {
            waited_ms: 1,
            passes: 1
        }));
        assert!(!is_transient(&ContractError::Cancelled));
    }
}
