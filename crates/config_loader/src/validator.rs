//! Configuration validation
//!
//! Rules:
//! - field ranges and non-empty values (`validator` derive on the blueprint)
//! - serial numbers unique
//! - rig wiring consistent: one master with sync-out, subordinates with sync-in
//! - every device configuration supported by the device
//! - depth comparison only when every subordinate streams depth or IR
//! - drift estimator noise terms positive

use std::collections::HashSet;

use ::validator::Validate;
use contracts::{ContractError, DeviceBlueprint, RigBlueprint, WiredSyncMode};

/// Validate a RigBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    validate_structure(blueprint)?;
    validate_serials(blueprint)?;
    validate_roles(blueprint)?;
    validate_device_configs(blueprint)?;
    validate_sync_config(blueprint)?;
    Ok(())
}

/// Derived range/length checks
fn validate_structure(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", e.to_string()))
}

/// Serial numbers identify devices and must be unique
fn validate_serials(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for device in &blueprint.devices {
        if !seen.insert(device.serial.as_str()) {
            return Err(ContractError::config_validation(
                format!("devices[serial={}]", device.serial),
                "duplicate serial",
            ));
        }
    }
    Ok(())
}

/// Declared roles must match the wiring
fn validate_roles(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    if let [device] = blueprint.devices.as_slice() {
        if device.role() == WiredSyncMode::Subordinate {
            return Err(ContractError::config_validation(
                field(device, "config.wired_sync_mode"),
                "a single device cannot be a subordinate",
            ));
        }
        return Ok(());
    }

    let masters: Vec<_> = blueprint
        .devices
        .iter()
        .filter(|d| d.role() == WiredSyncMode::Master)
        .collect();
    match masters.as_slice() {
        [] => {
            return Err(ContractError::config_validation(
                "devices",
                "a multi-device rig needs exactly one master, found none",
            ))
        }
        [master] => {
            if !master.sync_out {
                return Err(ContractError::missing_sync_cable(
                    &master.serial,
                    "master camera missing sync-out",
                ));
            }
        }
        _ => {
            return Err(ContractError::config_validation(
                "devices",
                format!(
                    "a multi-device rig needs exactly one master, found {}",
                    masters.len()
                ),
            ))
        }
    }

    for device in &blueprint.devices {
        match device.role() {
            WiredSyncMode::Master => {}
            WiredSyncMode::Subordinate => {
                if !device.sync_in {
                    return Err(ContractError::missing_sync_cable(
                        &device.serial,
                        "non-master camera missing sync-in",
                    ));
                }
            }
            WiredSyncMode::Standalone => {
                return Err(ContractError::config_validation(
                    field(device, "config.wired_sync_mode"),
                    "standalone devices cannot join a multi-device rig",
                ));
            }
        }
    }
    Ok(())
}

/// Each camera configuration on its own
fn validate_device_configs(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    for device in &blueprint.devices {
        device.config.validate().map_err(|e| match e {
            ContractError::ConfigValidation { field: name, message } => {
                ContractError::config_validation(field(device, &format!("config.{name}")), message)
            }
            other => other,
        })?;
    }
    Ok(())
}

fn validate_sync_config(blueprint: &RigBlueprint) -> Result<(), ContractError> {
    let sync = &blueprint.sync;

    if sync.compare_depth_for_subordinate {
        if let Some(device) = blueprint
            .subordinates()
            .find(|d| !d.config.depth_sensor_enabled())
        {
            return Err(ContractError::config_validation(
                "sync.compare_depth_for_subordinate",
                format!(
                    "subordinate '{}' has its depth camera disabled",
                    device.serial
                ),
            ));
        }
    }

    let drift = &sync.drift;
    for (name, value) in [
        ("process_noise", drift.process_noise),
        ("measurement_noise", drift.measurement_noise),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(ContractError::config_validation(
                format!("sync.drift.{name}"),
                format!("must be a positive number, got {value}"),
            ));
        }
    }

    if sync.timeout_ms == Some(0) {
        return Err(ContractError::config_validation(
            "sync.timeout_ms",
            "timeout must be > 0, omit it to wait indefinitely",
        ));
    }
    Ok(())
}

fn field(device: &DeviceBlueprint, name: &str) -> String {
    format!("devices[{}].{name}", device.serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ColorResolution, ConfigVersion, DepthMode, DeviceConfiguration, ImageFormat, RigConfig,
        SimulationConfig, SyncConfig,
    };

    fn device(serial: &str, mode: WiredSyncMode) -> DeviceBlueprint {
        DeviceBlueprint {
            serial: serial.into(),
            sync_in: mode == WiredSyncMode::Subordinate,
            sync_out: mode == WiredSyncMode::Master,
            config: DeviceConfiguration {
                color_format: ImageFormat::ColorBgra32,
                color_resolution: ColorResolution::R720p,
                depth_mode: DepthMode::NfovUnbinned,
                wired_sync_mode: mode,
                subordinate_delay_off_master_usec: if mode == WiredSyncMode::Subordinate {
                    160
                } else {
                    0
                },
                ..Default::default()
            },
            simulation: SimulationConfig::default(),
        }
    }

    fn minimal_blueprint() -> RigBlueprint {
        RigBlueprint {
            version: ConfigVersion::V1,
            rig: RigConfig::default(),
            devices: vec![
                device("master", WiredSyncMode::Master),
                device("sub-1", WiredSyncMode::Subordinate),
            ],
            sync: SyncConfig::default(),
        }
    }

    fn error(bp: &RigBlueprint) -> String {
        validate(bp).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_single_standalone_device() {
        let mut bp = minimal_blueprint();
        bp.devices = vec![device("solo", WiredSyncMode::Standalone)];
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_single_subordinate_rejected() {
        let mut bp = minimal_blueprint();
        bp.devices = vec![device("solo", WiredSyncMode::Subordinate)];
        assert!(error(&bp).contains("single device"));
    }

    #[test]
    fn test_duplicate_serial() {
        let mut bp = minimal_blueprint();
        bp.devices.push(device("sub-1", WiredSyncMode::Subordinate));
        let err = error(&bp);
        assert!(err.contains("duplicate serial"), "got: {err}");
    }

    #[test]
    fn test_structural_errors_surface() {
        let mut bp = minimal_blueprint();
        bp.rig.queue_capacity = 0;
        let err = error(&bp);
        assert!(err.contains("queue_capacity"), "got: {err}");
    }

    #[test]
    fn test_missing_master() {
        let mut bp = minimal_blueprint();
        bp.devices[0] = device("sub-0", WiredSyncMode::Subordinate);
        let err = error(&bp);
        assert!(err.contains("found none"), "got: {err}");
    }

    #[test]
    fn test_two_masters() {
        let mut bp = minimal_blueprint();
        bp.devices[1] = device("master-2", WiredSyncMode::Master);
        let err = error(&bp);
        assert!(err.contains("found 2"), "got: {err}");
    }

    #[test]
    fn test_master_without_sync_out() {
        let mut bp = minimal_blueprint();
        bp.devices[0].sync_out = false;
        assert!(matches!(
            validate(&bp),
            Err(ContractError::MissingSyncCable { .. })
        ));
    }

    #[test]
    fn test_subordinate_without_sync_in() {
        let mut bp = minimal_blueprint();
        bp.devices[1].sync_in = false;
        let err = error(&bp);
        assert!(err.contains("missing sync-in"), "got: {err}");
    }

    #[test]
    fn test_standalone_in_rig() {
        let mut bp = minimal_blueprint();
        bp.devices.push(device("loose", WiredSyncMode::Standalone));
        let err = error(&bp);
        assert!(err.contains("standalone"), "got: {err}");
    }

    #[test]
    fn test_device_config_error_names_device() {
        let mut bp = minimal_blueprint();
        bp.devices[1].config.depth_delay_off_color_usec = 100_000;
        let err = error(&bp);
        assert!(
            err.contains("devices[sub-1].config.depth_delay_off_color_usec"),
            "got: {err}"
        );
    }

    #[test]
    fn test_depth_comparison_needs_depth() {
        let mut bp = minimal_blueprint();
        bp.sync.compare_depth_for_subordinate = true;
        assert!(validate(&bp).is_ok());

        bp.devices[1].config.depth_mode = DepthMode::Off;
        let err = error(&bp);
        assert!(err.contains("depth camera disabled"), "got: {err}");
    }

    #[test]
    fn test_invalid_drift_noise() {
        let mut bp = minimal_blueprint();
        bp.sync.drift.measurement_noise = 0.0;
        let err = error(&bp);
        assert!(err.contains("measurement_noise"), "got: {err}");
    }

    #[test]
    fn test_zero_timeout() {
        let mut bp = minimal_blueprint();
        bp.sync.timeout_ms = Some(0);
        assert!(error(&bp).contains("timeout"));
    }
}
