//! `info` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{DeviceBlueprint, RigBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Rig info for JSON output
#[derive(Serialize)]
struct RigInfo {
    version: String,
    name: String,
    queue_capacity: usize,
    frame_channel_capacity: usize,
    devices: Vec<DeviceInfo>,
    sync: SyncInfo,
}

#[derive(Serialize)]
struct DeviceInfo {
    serial: String,
    role: String,
    sync_in: bool,
    sync_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    camera: Option<CameraInfo>,
}

#[derive(Serialize)]
struct CameraInfo {
    color: String,
    depth: String,
    fps: u32,
    synchronized_images_only: bool,
    depth_delay_off_color_usec: i32,
    subordinate_delay_off_master_usec: u32,
}

#[derive(Serialize)]
struct SyncInfo {
    tolerance_usec: i64,
    compare_depth_for_subordinate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    poll_interval_ms: u64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading rig configuration info");

    let blueprint = super::load_blueprint(&args.config)?;

    if args.normalized {
        let format = if args.json { ConfigFormat::Json } else { ConfigFormat::Toml };
        let text = ConfigLoader::render(&blueprint, format).map_err(CliError::Config)?;
        println!("{}", text);
    } else if args.json {
        let info = build_rig_info(&blueprint, args.devices);
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize rig info")?;
        println!("{}", json);
    } else {
        print_blueprint(&blueprint, args.devices);
    }

    Ok(())
}

fn build_rig_info(blueprint: &RigBlueprint, with_camera: bool) -> RigInfo {
    let devices = blueprint
        .devices
        .iter()
        .map(|d| DeviceInfo {
            serial: d.serial.clone(),
            role: format!("{:?}", d.role()),
            sync_in: d.sync_in,
            sync_out: d.sync_out,
            camera: with_camera.then(|| camera_info(d)),
        })
        .collect();

    RigInfo {
        version: format!("{:?}", blueprint.version),
        name: blueprint.rig.name.clone(),
        queue_capacity: blueprint.rig.queue_capacity,
        frame_channel_capacity: blueprint.rig.frame_channel_capacity,
        devices,
        sync: SyncInfo {
            tolerance_usec: blueprint.sync.tolerance_usec,
            compare_depth_for_subordinate: blueprint.sync.compare_depth_for_subordinate,
            timeout_ms: blueprint.sync.timeout_ms,
            poll_interval_ms: blueprint.sync.poll_interval_ms,
        },
    }
}

fn camera_info(device: &DeviceBlueprint) -> CameraInfo {
    let config = &device.config;
    CameraInfo {
        color: format!("{:?} {:?}", config.color_resolution, config.color_format),
        depth: format!("{:?}", config.depth_mode),
        fps: config.camera_fps.hz(),
        synchronized_images_only: config.synchronized_images_only,
        depth_delay_off_color_usec: config.depth_delay_off_color_usec,
        subordinate_delay_off_master_usec: config.subordinate_delay_off_master_usec,
    }
}

/// Human-readable rig overview
pub(super) fn print_blueprint(blueprint: &RigBlueprint, with_camera: bool) {
    println!("\n=== Rig: {} ===\n", blueprint.rig.name);
    println!("Version: {:?}", blueprint.version);
    println!(
        "Queues: capture={} frame_channel={}",
        blueprint.rig.queue_capacity, blueprint.rig.frame_channel_capacity
    );

    println!("\nDevices ({}):", blueprint.devices.len());
    for (i, device) in blueprint.devices.iter().enumerate() {
        let is_last = i == blueprint.devices.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child = if is_last { "   " } else { "│  " };

        let cables = match (device.sync_in, device.sync_out) {
            (true, true) => "sync-in, sync-out",
            (true, false) => "sync-in",
            (false, true) => "sync-out",
            (false, false) => "no sync cables",
        };
        println!("  {} {} ({:?}, {})", prefix, device.serial, device.role(), cables);

        if with_camera {
            let camera = camera_info(device);
            println!("  {}  color: {}", child, camera.color);
            println!("  {}  depth: {} @ {} fps", child, camera.depth, camera.fps);
            println!(
                "  {}  depth delay: {}us, subordinate delay: {}us",
                child, camera.depth_delay_off_color_usec, camera.subordinate_delay_off_master_usec
            );
        }
    }

    let sync = &blueprint.sync;
    println!("\nSync:");
    println!("  Tolerance: {}us", sync.tolerance_usec);
    println!(
        "  Comparison image: {}",
        if sync.compare_depth_for_subordinate { "depth" } else { "color" }
    );
    match sync.timeout_ms {
        Some(ms) => println!("  Timeout: {}ms", ms),
        None => println!("  Timeout: none"),
    }
    println!("  Poll interval: {}ms", sync.poll_interval_ms);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIG: &str = r#"
[rig]
name = "bench"

[[devices]]
serial = "master"
sync_out = true
[devices.config]
color_resolution = "1080p"
color_format = "color_bgra32"
depth_mode = "nfov_unbinned"
camera_fps = "15"
wired_sync_mode = "master"
"#;

    #[test]
    fn test_rig_info_json_shape() {
        let blueprint = ConfigLoader::load_from_str(RIG, ConfigFormat::Toml).unwrap();

        let info = build_rig_info(&blueprint, true);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "bench");
        assert_eq!(json["devices"][0]["role"], "Master");
        assert_eq!(json["devices"][0]["camera"]["fps"], 15);
        assert!(json["sync"].get("timeout_ms").is_none());

        let brief = serde_json::to_value(build_rig_info(&blueprint, false)).unwrap();
        assert!(brief["devices"][0].get("camera").is_none());
    }

    #[test]
    fn test_normalized_output_for_both_formats() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(RIG.as_bytes()).unwrap();
        for json in [false, true] {
            let args = InfoArgs {
                config: file.path().to_path_buf(),
                json,
                devices: false,
                normalized: true,
            };
            run_info(&args).unwrap();
        }
    }
}
