//! Multi-device synchronizer.
//!
//! Devices are wired in a daisy chain: the master drives sync-out, every
//! subordinate listens on sync-in and exposes `subordinate_delay_off_master_usec`
//! after the master. A synchronized set is reached by comparing each
//! subordinate's image timestamp with the master's color timestamp plus the
//! declared delays, re-fetching whichever side is behind and restarting the scan
//! until every subordinate lands inside the tolerance window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    Capture, CaptureSource, ContractError, DeviceConfiguration, SubordinateAlignment,
    SyncEngineConfig, SyncReport, SyncedCaptures, Wait, WaitError, WiredSyncMode,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::drift::DriftEstimator;
use crate::timestamp::{OffsetCheck, OffsetVerdict, TimestampModel};

/// Smallest fetch slice, so a zero poll interval cannot spin
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Cooperative cancellation flag shared with other threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounds for one synchronized retrieval.
///
/// The default waits indefinitely and cannot be cancelled.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
    /// Slice for each blocking fetch; deadline and cancellation are checked between slices
    pub poll_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            cancel: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl SyncOptions {
    /// Options for one call under `config`: its timeout starts counting now
    pub fn from_config(config: &SyncEngineConfig) -> Self {
        let options = Self {
            poll_interval: config.poll_interval,
            ..Self::default()
        };
        match config.timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Put the master first.
///
/// The head of the sync chain (sync-out connected, sync-in not) becomes the
/// master and is swapped into slot 0. Daisy-chained subordinates report both
/// jacks. Every other device must report sync-in. A single device is its own
/// master whatever its cables say.
pub fn order_devices<D: CaptureSource>(mut devices: Vec<D>) -> Result<Vec<D>, ContractError> {
    if devices.len() <= 1 {
        return Ok(devices);
    }

    let master = devices
        .iter()
        .position(|d| d.is_sync_out_connected() && !d.is_sync_in_connected())
        .ok_or_else(|| {
            ContractError::missing_sync_cable(
                devices[0].serial_number(),
                "no device has sync-out without sync-in to act as master",
            )
        })?;
    devices.swap(0, master);

    if let Some(device) = devices[1..].iter().find(|d| !d.is_sync_in_connected()) {
        return Err(ContractError::missing_sync_cable(
            device.serial_number(),
            "non-master camera missing sync-in",
        ));
    }

    debug!(master = devices[0].serial_number(), count = devices.len(), "device roles assigned");
    Ok(devices)
}

/// Declared offsets of one started device
#[derive(Debug, Clone, Copy, Default)]
struct DeclaredDelays {
    subordinate_delay_usec: i64,
    depth_delay_usec: i64,
}

/// Synchronizer over a master-first set of devices
pub struct MultiDeviceSynchronizer<D: CaptureSource> {
    devices: Vec<D>,
    serials: Vec<String>,
    model: TimestampModel,
    config: SyncEngineConfig,
    delays: Vec<DeclaredDelays>,
    drift: Vec<DriftEstimator>,
    last_reference_usec: Option<u64>,
    started: bool,
}

impl<D: CaptureSource> MultiDeviceSynchronizer<D> {
    /// Order `devices` master-first and wrap them
    pub fn new(devices: Vec<D>, config: SyncEngineConfig) -> Result<Self, ContractError> {
        if devices.is_empty() {
            return Err(ContractError::config_validation(
                "devices",
                "at least one device is required",
            ));
        }
        let devices = order_devices(devices)?;
        let serials = devices
            .iter()
            .map(|d| d.serial_number().to_string())
            .collect();
        let drift = devices.iter().map(|_| DriftEstimator::new(&config.drift)).collect();

        Ok(Self {
            serials,
            model: TimestampModel::new(config.tolerance_usec),
            delays: vec![DeclaredDelays::default(); devices.len()],
            drift,
            devices,
            config,
            last_reference_usec: None,
            started: false,
        })
    }

    /// Devices in rig order, master first
    pub fn devices(&self) -> &[D] {
        &self.devices
    }

    pub fn serials(&self) -> &[String] {
        &self.serials
    }

    pub fn master(&self) -> &D {
        &self.devices[0]
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Drift estimator of a subordinate, `None` for the master or out of range
    pub fn drift(&self, index: usize) -> Option<&DriftEstimator> {
        if index == 0 {
            return None;
        }
        self.drift.get(index)
    }

    /// Start every device; `configs` follow rig order (master first).
    ///
    /// Subordinates start before the master so none of them misses its first
    /// trigger. On failure the devices already started are stopped again.
    #[instrument(name = "multi_device_start", skip_all, fields(devices = self.devices.len()))]
    pub fn start_cameras(&mut self, configs: &[DeviceConfiguration]) -> Result<(), ContractError> {
        if configs.len() != self.devices.len() {
            return Err(ContractError::DeviceCountMismatch {
                devices: self.devices.len(),
                configs: configs.len(),
            });
        }
        if self.started {
            return Err(ContractError::device_state(
                &self.serials[0],
                "synchronizer already started",
            ));
        }
        self.check_roles(configs)?;
        for config in configs {
            config.validate()?;
        }

        let mut started = Vec::<usize>::with_capacity(self.devices.len());
        let order = (1..self.devices.len()).chain(std::iter::once(0));
        for index in order {
            if let Err(e) = self.devices[index].start_cameras(&configs[index]) {
                warn!(serial = %self.serials[index], error = %e, "device failed to start");
                for &running in started.iter().rev() {
                    self.devices[running].stop_cameras();
                }
                return Err(e);
            }
            started.push(index);
        }

        self.delays = configs
            .iter()
            .map(|c| DeclaredDelays {
                subordinate_delay_usec: i64::from(c.subordinate_delay_off_master_usec),
                depth_delay_usec: i64::from(c.depth_delay_off_color_usec),
            })
            .collect();
        self.drift = configs
            .iter()
            .map(|_| DriftEstimator::new(&self.config.drift))
            .collect();
        self.last_reference_usec = None;
        self.started = true;
        info!(master = %self.serials[0], devices = self.devices.len(), "rig started");
        Ok(())
    }

    /// Stop the master first so subordinates see no further triggers
    pub fn stop_cameras(&mut self) {
        for device in &self.devices {
            device.stop_cameras();
        }
        if self.started {
            info!(master = %self.serials[0], "rig stopped");
        }
        self.started = false;
    }

    fn check_roles(&self, configs: &[DeviceConfiguration]) -> Result<(), ContractError> {
        if configs.len() == 1 {
            if configs[0].wired_sync_mode == WiredSyncMode::Subordinate {
                return Err(ContractError::config_validation(
                    "wired_sync_mode",
                    format!("{}: a single device cannot be a subordinate", self.serials[0]),
                ));
            }
            return Ok(());
        }

        if configs[0].wired_sync_mode != WiredSyncMode::Master {
            return Err(ContractError::config_validation(
                "wired_sync_mode",
                format!(
                    "{}: master device must run in master mode, got {:?}",
                    self.serials[0], configs[0].wired_sync_mode
                ),
            ));
        }
        for (serial, config) in self.serials.iter().zip(configs).skip(1) {
            if config.wired_sync_mode != WiredSyncMode::Subordinate {
                return Err(ContractError::config_validation(
                    "wired_sync_mode",
                    format!(
                        "{serial}: subordinate device must run in subordinate mode, got {:?}",
                        config.wired_sync_mode
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Retrieve one capture per device, all aligned to the master.
    ///
    /// Either every device contributes a capture or the call fails; a partial
    /// set is never returned.
    #[instrument(
        name = "get_synchronized_captures",
        skip(self, options),
        fields(devices = self.devices.len())
    )]
    pub fn get_synchronized_captures(
        &mut self,
        compare_depth_for_subordinate: bool,
        options: &SyncOptions,
    ) -> Result<SyncedCaptures, ContractError> {
        let mut attempt = Attempt::new(self.devices.len(), options);
        let result = self.converge(compare_depth_for_subordinate, &mut attempt);

        match &result {
            Ok(synced) => observability::record_sync_report(&synced.report, &self.serials),
            Err(e) => {
                debug!(error = %e, passes = attempt.passes, "synchronized retrieval failed");
                observability::record_sync_failure(failure_reason(e));
            }
        }
        result
    }

    fn converge(
        &mut self,
        compare_depth: bool,
        attempt: &mut Attempt<'_>,
    ) -> Result<SyncedCaptures, ContractError> {
        let mut captures = Vec::with_capacity(self.devices.len());
        for index in 0..self.devices.len() {
            captures.push(attempt.fetch(&self.devices[index], index)?);
        }

        'scan: loop {
            attempt.passes += 1;
            attempt.check_interrupt()?;

            let Some(master_ts) = captures[0].color_timestamp_usec() else {
                trace!("master capture has no color image, re-fetching master");
                captures[0] = attempt.refetch(&self.devices[0], 0)?;
                continue 'scan;
            };

            let mut checks = Vec::with_capacity(self.devices.len());
            for index in 1..self.devices.len() {
                let observed = if compare_depth {
                    captures[index].depth_ir_timestamp_usec()
                } else {
                    captures[index].color_timestamp_usec()
                };
                let Some(observed) = observed else {
                    trace!(subordinate = index, "comparison image missing, re-fetching subordinate");
                    captures[index] = attempt.refetch(&self.devices[index], index)?;
                    continue 'scan;
                };

                let delays = self.delays[index];
                let mut offset = delays.subordinate_delay_usec;
                if compare_depth {
                    offset = offset.checked_add(delays.depth_delay_usec).ok_or_else(|| {
                        ContractError::TimestampOverflow {
                            message: format!("{offset} + {}", delays.depth_delay_usec),
                        }
                    })?;
                }

                let check = self.model.check(master_ts, offset, observed)?;
                match check.verdict {
                    OffsetVerdict::TooEarly => {
                        trace!(
                            subordinate = index,
                            error_usec = check.error_usec,
                            "subordinate lagging, re-fetching subordinate"
                        );
                        captures[index] = attempt.refetch(&self.devices[index], index)?;
                        continue 'scan;
                    }
                    OffsetVerdict::TooLate => {
                        trace!(
                            subordinate = index,
                            error_usec = check.error_usec,
                            "master lagging, re-fetching master"
                        );
                        captures[0] = attempt.refetch(&self.devices[0], 0)?;
                        continue 'scan;
                    }
                    OffsetVerdict::InTolerance => checks.push((index, check)),
                }
            }

            let report = self.accept(master_ts, compare_depth, attempt, &checks);
            debug!(
                reference_ts = master_ts,
                passes = report.passes,
                refetches = report.total_refetches(),
                "synchronized captures ready"
            );
            return Ok(SyncedCaptures { captures, report });
        }
    }

    fn accept(
        &mut self,
        master_ts: u64,
        compare_depth: bool,
        attempt: &Attempt<'_>,
        checks: &[(usize, OffsetCheck)],
    ) -> SyncReport {
        let dt = self
            .last_reference_usec
            .map(|last| master_ts.saturating_sub(last) as f64 / 1e6)
            .unwrap_or(0.0);
        self.last_reference_usec = Some(master_ts);

        let mut alignments = vec![None; self.devices.len()];
        for (index, check) in checks {
            let filter = &mut self.drift[*index];
            filter.update(check.error_usec as f64, dt);
            metrics::gauge!(
                "capsync_drift_offset_usec",
                "serial" => self.serials[*index].clone()
            )
            .set(filter.offset());
            alignments[*index] = Some(SubordinateAlignment {
                expected_usec: check.expected_usec,
                error_usec: check.error_usec,
                drift_offset_usec: filter.offset(),
                drift_rate_usec_per_s: filter.drift(),
            });
        }

        SyncReport {
            reference_timestamp_usec: master_ts,
            passes: attempt.passes,
            refetches: attempt.refetches.clone(),
            alignments,
            compared_depth: compare_depth,
            elapsed_usec: attempt.started.elapsed().as_micros() as u64,
        }
    }
}

impl<D: CaptureSource> Drop for MultiDeviceSynchronizer<D> {
    fn drop(&mut self) {
        if self.started {
            self.stop_cameras();
        }
    }
}

/// Bookkeeping for one call to `get_synchronized_captures`
struct Attempt<'a> {
    options: &'a SyncOptions,
    started: Instant,
    passes: u64,
    refetches: Vec<u64>,
}

impl<'a> Attempt<'a> {
    fn new(devices: usize, options: &'a SyncOptions) -> Self {
        Self {
            options,
            started: Instant::now(),
            passes: 0,
            refetches: vec![0; devices],
        }
    }

    fn check_interrupt(&self) -> Result<(), ContractError> {
        if self.options.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        if self
            .options
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(self.timed_out());
        }
        Ok(())
    }

    fn timed_out(&self) -> ContractError {
        ContractError::SyncTimeout {
            waited_ms: self.started.elapsed().as_millis() as u64,
            passes: self.passes,
        }
    }

    fn refetch<D: CaptureSource>(
        &mut self,
        device: &D,
        index: usize,
    ) -> Result<Capture, ContractError> {
        self.refetches[index] += 1;
        self.fetch(device, index)
    }

    /// Blocking fetch in poll-interval slices until a capture, a hard failure,
    /// the deadline or cancellation
    fn fetch<D: CaptureSource>(&self, device: &D, index: usize) -> Result<Capture, ContractError> {
        let poll = self.options.poll_interval.max(MIN_POLL_INTERVAL);
        loop {
            self.check_interrupt()?;
            let slice = match self.options.deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(poll),
                None => poll,
            };

            match device.get_capture(Wait::For(slice)) {
                Ok(capture) => return Ok(capture),
                Err(WaitError::Timeout) => {
                    trace!(device = index, "no capture within slice, retrying");
                }
                Err(reason) => {
                    warn!(
                        device = index,
                        serial = device.serial_number(),
                        %reason,
                        "capture retrieval failed, aborting synchronized fetch"
                    );
                    return Err(ContractError::CaptureFailed {
                        device_index: index,
                        reason,
                    });
                }
            }
        }
    }
}

/// Metric label for a failed retrieval
fn failure_reason(error: &ContractError) -> &'static str {
    match error {
        ContractError::SyncTimeout { .. } => "timeout",
        ContractError::Cancelled => "cancelled",
        ContractError::CaptureFailed { .. } => "capture_failed",
        ContractError::TimestampOverflow { .. } => "timestamp_overflow",
        _ => "other",
    }
}
