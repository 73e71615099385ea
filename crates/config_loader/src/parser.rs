//! Rig file parsing and rendering.
//!
//! Parse errors carry the line and column of the offending input so a rig file
//! can be fixed without guessing which device block is wrong.

use std::path::Path;

use contracts::{ContractError, RigBlueprint};

/// Rig file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Format named by the file extension of `path`
    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse(format!(
                "{}: cannot determine rig file format without an extension",
                path.display()
            ))
        })?;
        Self::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}

/// Line and column (1-based) of a byte offset
fn locate(content: &str, offset: usize) -> (usize, usize) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    (line, column)
}

fn parse_toml(content: &str) -> Result<RigBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| {
        let message = match e.span() {
            Some(span) => {
                let (line, column) = locate(content, span.start);
                format!("TOML parse error at line {line}, column {column}: {}", e.message())
            }
            None => format!("TOML parse error: {}", e.message()),
        };
        ContractError::ConfigParse {
            message,
            source: Some(Box::new(e)),
        }
    })
}

fn parse_json(content: &str) -> Result<RigBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!(
            "JSON parse error at line {}, column {}: {e}",
            e.line(),
            e.column()
        ),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<RigBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

/// Write a blueprint back out with every default spelled out
pub fn render(blueprint: &RigBlueprint, format: ConfigFormat) -> Result<String, ContractError> {
    match format {
        ConfigFormat::Toml => toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("cannot render rig as TOML: {e}"))),
        ConfigFormat::Json => serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("cannot render rig as JSON: {e}"))),
    }
}
