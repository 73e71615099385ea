//! Simulated rig construction from a blueprint.

use std::time::Duration;

use contracts::{ContractError, DeviceBlueprint, DeviceConfiguration, RigBlueprint};
use ingestion::{MockCamera, MockCameraConfig, SyncLine};
use sync_engine::Device;
use tracing::debug;

/// Camera parameters for one blueprint device
pub fn mock_config(device: &DeviceBlueprint, frame_interval: Option<Duration>) -> MockCameraConfig {
    let simulation = &device.simulation;
    MockCameraConfig {
        serial: device.serial.clone(),
        sync_in: device.sync_in,
        sync_out: device.sync_out,
        clock_offset_usec: simulation.clock_offset_usec,
        jitter_usec: simulation.jitter_usec,
        drop_color_every: simulation.drop_color_every,
        drop_depth_every: simulation.drop_depth_every,
        frame_interval,
        ..Default::default()
    }
}

/// Open one simulated device per blueprint entry, all sharing one sync line
pub fn build_devices(
    blueprint: &RigBlueprint,
    frame_interval: Option<Duration>,
) -> Result<Vec<Device<MockCamera>>, ContractError> {
    let line = SyncLine::new();

    blueprint
        .devices
        .iter()
        .map(|device| {
            debug!(
                serial = %device.serial,
                role = ?device.role(),
                sync_in = device.sync_in,
                sync_out = device.sync_out,
                "opening simulated device"
            );
            let camera = MockCamera::new(mock_config(device, frame_interval)).with_sync_line(&line);
            Ok(Device::open(camera, blueprint.rig.queue_capacity)?
                .with_channel_capacity(blueprint.rig.frame_channel_capacity))
        })
        .collect()
}

/// Camera configurations matching the synchronizer's device order
pub fn configs_in_order(
    blueprint: &RigBlueprint,
    serials: &[String],
) -> Result<Vec<DeviceConfiguration>, ContractError> {
    serials
        .iter()
        .map(|serial| {
            blueprint
                .devices
                .iter()
                .find(|d| &d.serial == serial)
                .map(|d| d.config.clone())
                .ok_or_else(|| {
                    ContractError::config_validation("devices", format!("no device with serial {serial}"))
                })
        })
        .collect()
}
