//! Run statistics.

use std::time::Duration;

use observability::SyncMetricsAggregator;

/// Statistics from one `run`
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Device serials in rig order (master first)
    pub devices: Vec<String>,

    /// Synchronized capture sets retrieved
    pub captures_synced: u64,

    /// Retrievals that failed
    pub failures: u64,

    /// Whether the run ended through cancellation
    pub cancelled: bool,

    /// Wall-clock duration of the capture loop
    pub duration: Duration,

    /// Aggregated sync reports and pairing counters
    pub sync_metrics: SyncMetricsAggregator,
}

impl RunStats {
    /// Synchronized sets per second
    pub fn rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.captures_synced as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== capsync run ===\n");
        println!("Devices (master first): {}", self.devices.join(", "));
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Synchronized sets: {}", self.captures_synced);
        println!("Failed retrievals: {}", self.failures);
        println!("Rate: {:.2}/s", self.rate());
        if self.cancelled {
            println!("Stopped: interrupted");
        }

        println!("\n{}", self.sync_metrics.summary());

        if !self.sync_metrics.assembler.is_empty() {
            println!("Pairing per device:");
            for serial in &self.devices {
                if let Some(stats) = self.sync_metrics.assembler.get(serial) {
                    println!(
                        "  {serial}: emitted={} color_dropped={} depth_dropped={} malformed={}",
                        stats.captures_emitted, stats.color_dropped, stats.depth_dropped, stats.malformed
                    );
                }
            }
        }
        println!();
    }
}
