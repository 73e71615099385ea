//! # Config Loader
//!
//! Reads rig files (TOML or JSON) into a validated [`RigBlueprint`], applies
//! command-line overrides on top, and renders the normalized rig back out.
//!
//! ```no_run
//! use config_loader::{ConfigLoader, RigOverrides};
//! use std::path::Path;
//!
//! let mut rig = ConfigLoader::load_from_path(Path::new("rig.toml")).unwrap();
//! let overrides = RigOverrides { timeout_ms: Some(500), ..Default::default() };
//! ConfigLoader::apply_overrides(&mut rig, &overrides).unwrap();
//! ```

mod parser;
mod validator;

pub use contracts::RigBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;
use tracing::{debug, info};

/// Adjustments layered over a loaded rig file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RigOverrides {
    /// Retrieval timeout; `Some(0)` clears it
    pub timeout_ms: Option<u64>,
    pub tolerance_usec: Option<i64>,
    /// Force depth comparison for subordinates
    pub compare_depth: bool,
}

impl RigOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a rig file; the format follows the extension.
    ///
    /// # Errors
    /// `Io` when the file cannot be read, `ConfigParse` for unknown formats and
    /// malformed content, validation errors for inconsistent rigs.
    pub fn load_from_path(path: &Path) -> Result<RigBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let blueprint = Self::load_from_str(&content, format)?;
        debug!(
            path = %path.display(),
            rig = %blueprint.rig.name,
            devices = blueprint.devices.len(),
            "rig file loaded"
        );
        Ok(blueprint)
    }

    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<RigBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Apply `overrides` and validate the result. The blueprint is left
    /// untouched when the overridden rig is invalid.
    pub fn apply_overrides(
        blueprint: &mut RigBlueprint,
        overrides: &RigOverrides,
    ) -> Result<(), ContractError> {
        if overrides.is_empty() {
            return Ok(());
        }

        let mut candidate = blueprint.clone();
        if let Some(timeout_ms) = overrides.timeout_ms {
            info!(timeout_ms, "overriding retrieval timeout");
            candidate.sync.timeout_ms = (timeout_ms != 0).then_some(timeout_ms);
        }
        if let Some(tolerance_usec) = overrides.tolerance_usec {
            info!(tolerance_usec, "overriding sync tolerance");
            candidate.sync.tolerance_usec = tolerance_usec;
        }
        if overrides.compare_depth {
            info!("comparing subordinates on depth images");
            candidate.sync.compare_depth_for_subordinate = true;
        }

        validator::validate(&candidate)?;
        *blueprint = candidate;
        Ok(())
    }

    /// Normalized rig text with every default filled in
    pub fn render(blueprint: &RigBlueprint, format: ConfigFormat) -> Result<String, ContractError> {
        parser::render(blueprint, format)
    }
}
