//! Command implementations.

mod info;
mod run;
mod validate;

use std::path::Path;

use contracts::RigBlueprint;

use crate::error::CliError;

pub use info::run_info;
pub use run::run_pipeline;
pub use validate::run_validate;

/// Load and validate a rig configuration file
fn load_blueprint(path: &Path) -> Result<RigBlueprint, CliError> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    config_loader::ConfigLoader::load_from_path(path).map_err(CliError::Config)
}
