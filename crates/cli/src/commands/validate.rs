//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{RigBlueprint, WiredSyncMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    rig: String,
    device_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    master: Option<String>,
    subordinates: Vec<String>,
    tolerance_usec: i64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating rig configuration");

    let result = match super::load_blueprint(&args.config) {
        Ok(blueprint) => valid_result(&args.config.display().to_string(), &blueprint),
        Err(e) => ValidationResult {
            valid: false,
            config_path: args.config.display().to_string(),
            error: Some(e.to_string()),
            warnings: Vec::new(),
            summary: None,
        },
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    match result.error {
        None => Ok(()),
        Some(message) => Err(CliError::Config(contracts::ContractError::Other(message)).into()),
    }
}

fn valid_result(config_path: &str, blueprint: &RigBlueprint) -> ValidationResult {
    ValidationResult {
        valid: true,
        config_path: config_path.to_string(),
        error: None,
        warnings: collect_warnings(blueprint),
        summary: Some(ConfigSummary {
            version: format!("{:?}", blueprint.version),
            rig: blueprint.rig.name.clone(),
            device_count: blueprint.devices.len(),
            master: blueprint.master().map(|d| d.serial.clone()),
            subordinates: blueprint.subordinates().map(|d| d.serial.clone()).collect(),
            tolerance_usec: blueprint.sync.tolerance_usec,
        }),
    }
}

/// Non-fatal issues worth pointing out
fn collect_warnings(blueprint: &RigBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.devices.len() > 1 && blueprint.sync.timeout_ms.is_none() {
        warnings.push(
            "sync.timeout_ms is unset - synchronized retrieval waits indefinitely".to_string(),
        );
    }

    for device in &blueprint.devices {
        let simulation = &device.simulation;
        if i64::from(simulation.jitter_usec) > blueprint.sync.tolerance_usec {
            warnings.push(format!(
                "Device '{}' jitter ({}us) exceeds the sync tolerance ({}us)",
                device.serial, simulation.jitter_usec, blueprint.sync.tolerance_usec
            ));
        }
        if device.role() == WiredSyncMode::Subordinate && !device.config.synchronized_images_only {
            warnings.push(format!(
                "Subordinate '{}' may deliver captures without a comparison image",
                device.serial
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Rig: {}", summary.rig);
            println!("  Devices: {}", summary.device_count);
            if let Some(ref master) = summary.master {
                println!("  Master: {}", master);
            }
            if !summary.subordinates.is_empty() {
                println!("  Subordinates: {}", summary.subordinates.join(", "));
            }
            println!("  Tolerance: {}us", summary.tolerance_usec);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RIG: &str = r#"
[[devices]]
serial = "master"
sync_out = true
[devices.config]
color_resolution = "720p"
depth_mode = "nfov_unbinned"
wired_sync_mode = "master"

[[devices]]
serial = "sub"
sync_in = true
[devices.config]
color_resolution = "720p"
depth_mode = "nfov_unbinned"
wired_sync_mode = "subordinate"
subordinate_delay_off_master_usec = 160
[devices.simulation]
jitter_usec = 80
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_rig_with_warnings() {
        let file = write_config(RIG);
        let blueprint = config_loader::ConfigLoader::load_from_path(file.path()).unwrap();
        let result = valid_result("rig.toml", &blueprint);

        let summary = result.summary.as_ref().unwrap();
        assert_eq!(summary.master.as_deref(), Some("master"));
        assert_eq!(summary.subordinates, ["sub"]);
        assert!(result.warnings.iter().any(|w| w.contains("waits indefinitely")));
        assert!(result.warnings.iter().any(|w| w.contains("jitter")));
        assert!(result.warnings.iter().any(|w| w.contains("without a comparison image")));
    }

    #[test]
    fn test_missing_file_fails() {
        let args = ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: true,
        };
        let err = run_validate(&args).unwrap_err();
        assert_eq!(err.downcast_ref::<CliError>().unwrap().exit_code(), 2);
    }

    #[test]
    fn test_invalid_rig_fails() {
        let file = write_config(&RIG.replace("sync_in = true", "sync_in = false"));
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        };
        assert!(run_validate(&args).is_err());
    }
}
