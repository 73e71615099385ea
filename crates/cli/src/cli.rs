//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// capsync - multi-camera capture synchronization
#[derive(Parser, Debug)]
#[command(
    name = "capsync",
    author,
    version,
    about = "Multi-camera capture synchronization",
    long_about = "Pairs color and depth/IR images per device and aligns captures across a \n\
                  wired master/subordinate rig.\n\n\
                  Without attached hardware the `run` command drives simulated cameras \n\
                  built from the rig configuration."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CAPSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CAPSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", global = true, env = "CAPSYNC_METRICS_PORT")]
    pub metrics_port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Filter directive used when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated rig through the synchronizer
    Run(RunArgs),

    /// Validate a rig configuration without running
    Validate(ValidateArgs),

    /// Display rig configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to rig configuration file (TOML or JSON)
    #[arg(short, long, default_value = "rig.toml", env = "CAPSYNC_CONFIG")]
    pub config: PathBuf,

    /// Number of synchronized capture sets to retrieve (0 = until interrupted)
    #[arg(short = 'n', long, default_value = "100", env = "CAPSYNC_CAPTURES")]
    pub captures: u64,

    /// Override the per-retrieval timeout in milliseconds (0 = wait forever)
    #[arg(long, env = "CAPSYNC_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Override the sync tolerance in microseconds
    #[arg(long, env = "CAPSYNC_TOLERANCE_USEC")]
    pub tolerance_usec: Option<i64>,

    /// Compare subordinates on their depth images instead of color
    #[arg(long)]
    pub compare_depth: bool,

    /// Pause between simulated frames in milliseconds (default: the configured frame rate)
    #[arg(long, env = "CAPSYNC_FRAME_INTERVAL_MS")]
    pub frame_interval_ms: Option<u64>,

    /// Keep going after a failed retrieval instead of stopping
    #[arg(long)]
    pub keep_going: bool,

    /// Validate configuration and exit without starting the rig
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to rig configuration file to validate
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to rig configuration file
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-device camera configuration
    #[arg(long)]
    pub devices: bool,

    /// Print the rig file with every default filled in (TOML, or JSON with --json)
    #[arg(long, conflicts_with = "devices")]
    pub normalized: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["capsync", "run"]).unwrap();
        let Commands::Run(ref args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("rig.toml"));
        assert_eq!(args.captures, 100);
        assert_eq!(args.timeout_ms, None);
        assert!(!args.compare_depth);
        assert_eq!(cli.metrics_port, 0);
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["capsync", "-vv", "validate"]).unwrap();
        assert_eq!(cli.log_level(), "trace");

        let cli = Cli::try_parse_from(["capsync", "--quiet", "info"]).unwrap();
        assert_eq!(cli.log_level(), "warn");

        assert!(Cli::try_parse_from(["capsync", "-q", "-v", "info"]).is_err());
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "capsync",
            "--log-format",
            "json",
            "run",
            "-c",
            "lab.toml",
            "-n",
            "5",
            "--timeout-ms",
            "250",
            "--compare-depth",
            "--tolerance-usec",
            "120",
            "--frame-interval-ms",
            "2",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, LogFormat::Json));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("lab.toml"));
        assert_eq!(args.captures, 5);
        assert_eq!(args.timeout_ms, Some(250));
        assert!(args.compare_depth);
        assert_eq!(args.tolerance_usec, Some(120));
        assert_eq!(args.frame_interval_ms, Some(2));
    }

    #[test]
    fn test_normalized_conflicts_with_devices() {
        assert!(Cli::try_parse_from(["capsync", "info", "--normalized", "--devices"]).is_err());
        let cli = Cli::try_parse_from(["capsync", "info", "--normalized", "--json"]).unwrap();
        let Commands::Info(args) = cli.command else {
            panic!("expected info");
        };
        assert!(args.normalized && args.json);
    }
}
