//! Sync engine metrics
//!
//! Exports counters, gauges and histograms through the `metrics` facade and keeps
//! an in-memory aggregate for end-of-run summaries.

use std::collections::HashMap;

use contracts::{AssemblerStats, SyncReport};
use metrics::{counter, gauge, histogram};

/// Record one successful synchronized retrieval.
///
/// `serials` is in rig order (index 0 is the master) and labels per-device series.
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_sync_report;
///
/// let synced = synchronizer.get_synchronized_captures(false, &options)?;
/// record_sync_report(&synced.report, &serials);
/// ```
pub fn record_sync_report(report: &SyncReport, serials: &[String]) {
    counter!("capsync_synchronized_captures_total").increment(1);

    histogram!("capsync_sync_passes").record(report.passes as f64);
    histogram!("capsync_sync_refetches").record(report.total_refetches() as f64);
    histogram!("capsync_sync_elapsed_ms").record(report.elapsed_usec as f64 / 1000.0);
    gauge!("capsync_sync_reference_timestamp_usec").set(report.reference_timestamp_usec as f64);

    for (index, refetches) in report.refetches.iter().enumerate() {
        if *refetches > 0 {
            counter!("capsync_device_refetches_total", "device" => device_label(serials, index))
                .increment(*refetches);
        }
    }

    for (index, alignment) in report.alignments.iter().enumerate() {
        let Some(alignment) = alignment else {
            continue;
        };
        let device = device_label(serials, index);
        gauge!("capsync_subordinate_error_usec", "device" => device.clone())
            .set(alignment.error_usec as f64);
        histogram!("capsync_subordinate_abs_error_usec", "device" => device.clone())
            .record(alignment.error_usec.unsigned_abs() as f64);
        gauge!("capsync_subordinate_drift_offset_usec", "device" => device.clone())
            .set(alignment.drift_offset_usec);
        gauge!("capsync_subordinate_drift_rate_usec_per_s", "device" => device)
            .set(alignment.drift_rate_usec_per_s);
    }
}

/// Record a synchronized retrieval that ended without a result
pub fn record_sync_failure(reason: &str) {
    counter!("capsync_sync_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record a capture handed out by a device's pairing task
pub fn record_capture_emitted(serial: &str, image_count: usize) {
    counter!("capsync_captures_emitted_total", "device" => serial.to_string()).increment(1);
    histogram!("capsync_capture_images", "device" => serial.to_string())
        .record(image_count as f64);
}

/// Record a pending image discarded while pairing
pub fn record_image_dropped(serial: &str, stream: &str) {
    counter!(
        "capsync_images_dropped_total",
        "device" => serial.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a frame block rejected as malformed
pub fn record_malformed_block(serial: &str, stream: &str) {
    counter!(
        "capsync_malformed_blocks_total",
        "device" => serial.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a terminal stream failure
pub fn record_stream_failure(serial: &str, stream: &str) {
    counter!(
        "capsync_stream_failures_total",
        "device" => serial.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a device's output queue depth
pub fn record_queue_depth(serial: &str, depth: usize) {
    gauge!("capsync_capture_queue_depth", "device" => serial.to_string()).set(depth as f64);
}

fn device_label(serials: &[String], index: usize) -> String {
    serials
        .get(index)
        .cloned()
        .unwrap_or_else(|| index.to_string())
}

/// Sync metrics aggregator
///
/// Aggregates reports in memory for statistics and summaries.
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    /// Successful synchronized retrievals
    pub total_synced: u64,

    /// Retrievals that converged without any re-fetch
    pub first_attempt: u64,

    /// Re-fetches across all devices
    pub total_refetches: u64,

    /// Failed retrievals by reason
    pub failures: HashMap<String, u64>,

    /// Re-fetches per retrieval
    pub refetch_stats: RunningStats,

    /// Convergence time per retrieval (ms)
    pub elapsed_stats: RunningStats,

    /// Absolute timestamp error per subordinate index (µs)
    pub error_stats: HashMap<usize, RunningStats>,

    /// Latest pairing counters per device serial
    pub assembler: HashMap<String, AssemblerStats>,
}

impl SyncMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one report into the aggregate
    pub fn update(&mut self, report: &SyncReport) {
        self.total_synced += 1;
        let refetches = report.total_refetches();
        self.total_refetches += refetches;
        if refetches == 0 {
            self.first_attempt += 1;
        }

        self.refetch_stats.push(refetches as f64);
        self.elapsed_stats.push(report.elapsed_usec as f64 / 1000.0);

        for (index, alignment) in report.alignments.iter().enumerate() {
            if let Some(alignment) = alignment {
                self.error_stats
                    .entry(index)
                    .or_default()
                    .push(alignment.error_usec.unsigned_abs() as f64);
            }
        }
    }

    pub fn record_failure(&mut self, reason: &str) {
        *self.failures.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Replace the pairing counters reported for a device
    pub fn set_assembler_stats(&mut self, serial: &str, stats: AssemblerStats) {
        self.assembler.insert(serial.to_string(), stats);
    }

    /// Generate summary report
    pub fn summary(&self) -> MetricsSummary {
        let failed: u64 = self.failures.values().sum();
        let attempts = self.total_synced + failed;

        let mut subordinate_error_usec: Vec<(usize, StatsSummary)> = self
            .error_stats
            .iter()
            .map(|(index, stats)| (*index, StatsSummary::from(stats)))
            .collect();
        subordinate_error_usec.sort_by_key(|(index, _)| *index);

        MetricsSummary {
            total_synced: self.total_synced,
            total_failed: failed,
            total_refetches: self.total_refetches,
            first_attempt_rate: percent(self.first_attempt, self.total_synced),
            failure_rate: percent(failed, attempts),
            refetches_per_sync: StatsSummary::from(&self.refetch_stats),
            elapsed_ms: StatsSummary::from(&self.elapsed_stats),
            subordinate_error_usec,
            failures: self.failures.clone(),
            images_dropped: self
                .assembler
                .values()
                .map(|s| s.color_dropped + s.depth_dropped)
                .sum(),
        }
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_synced: u64,
    pub total_failed: u64,
    pub total_refetches: u64,
    pub first_attempt_rate: f64,
    pub failure_rate: f64,
    pub refetches_per_sync: StatsSummary,
    pub elapsed_ms: StatsSummary,
    pub subordinate_error_usec: Vec<(usize, StatsSummary)>,
    pub failures: HashMap<String, u64>,
    pub images_dropped: u64,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Metrics Summary ===")?;
        writeln!(f, "Synchronized captures: {}", self.total_synced)?;
        writeln!(
            f,
            "Failed retrievals: {} ({:.2}%)",
            self.total_failed, self.failure_rate
        )?;
        writeln!(
            f,
            "Re-fetches: {} ({:.2}% converged on first attempt)",
            self.total_refetches, self.first_attempt_rate
        )?;
        writeln!(f, "Re-fetches per capture: {}", self.refetches_per_sync)?;
        writeln!(f, "Convergence time (ms): {}", self.elapsed_ms)?;
        writeln!(f, "Images dropped while pairing: {}", self.images_dropped)?;

        for (index, stats) in &self.subordinate_error_usec {
            writeln!(f, "Subordinate {} |error| (us): {}", index, stats)?;
        }

        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for (reason, count) in &self.failures {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
