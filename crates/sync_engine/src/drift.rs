//! Adaptive Kalman filter tracking a subordinate's residual clock offset.
//!
//! Lightweight 2-state (offset + drift) filter with EWMA-based measurement noise
//! tuning. Observations are the accepted timestamp errors of a subordinate
//! (observed minus expected, µs); the filter never feeds back into acceptance, it
//! only reports how the wired sync is holding up.

use std::collections::VecDeque;

use contracts::DriftConfig;

/// Smallest reference interval fed to the predict step (seconds)
const MIN_DT: f64 = 1e-3;
const DEFAULT_ALPHA: f64 = 0.85;
/// Interval assumed when the reference timestamp did not advance (30 fps)
const FALLBACK_INTERVAL: f64 = 0.033_333;

/// Drift estimator for one subordinate
///
/// State vector x = [offset, drift]^T where:
/// - `offset` is the residual error (µs) left after the declared delays
/// - `drift` is its rate of change (µs per second)
///
/// Transition matrix F = [[1, Δt], [0, 1]]
/// Observation matrix H = [1, 0]
#[derive(Debug, Clone)]
pub struct DriftEstimator {
    state: [f64; 2],
    covariance: [[f64; 2]; 2],
    q_offset: f64,
    q_drift: f64,
    base_r: f64,
    r: f64,
    ewma_variance: f64,
    residuals: VecDeque<f64>,
    window_size: usize,
    alpha: f64,
    updates: u64,
}

impl DriftEstimator {
    pub fn new(config: &DriftConfig) -> Self {
        let window_size = config.residual_window.max(3);
        let base_r = config.measurement_noise.max(1e-9);

        Self {
            state: [0.0, 0.0],
            covariance: [[base_r, 0.0], [0.0, 1.0]],
            q_offset: config.process_noise.max(1e-9),
            q_drift: (config.process_noise * 0.1).max(1e-9),
            base_r,
            r: base_r,
            ewma_variance: base_r,
            residuals: VecDeque::with_capacity(window_size),
            window_size,
            alpha: DEFAULT_ALPHA,
            updates: 0,
        }
    }

    /// Feed one accepted error.
    ///
    /// * `error_usec` - observed minus expected subordinate timestamp
    /// * `dt` - master clock time since the previous update (seconds)
    ///
    /// Returns the filtered offset and the innovation.
    pub fn update(&mut self, error_usec: f64, dt: f64) -> (f64, f64) {
        let dt = if dt.is_finite() && dt > 0.0 {
            dt
        } else {
            FALLBACK_INTERVAL
        }
        .max(MIN_DT);

        if self.updates == 0 {
            // seed from the first observation instead of converging from zero
            self.state[0] = error_usec;
        }
        self.updates += 1;

        // ===== Predict step =====
        let offset_pred = self.state[0] + dt * self.state[1];
        let drift_pred = self.state[1];

        let p00 = self.covariance[0][0];
        let p01 = self.covariance[0][1];
        let p11 = self.covariance[1][1];

        let pred00 = p00 + 2.0 * dt * p01 + dt * dt * p11 + self.q_offset;
        let pred01 = p01 + dt * p11;
        let pred11 = p11 + self.q_drift;

        // ===== Update step =====
        let residual = error_usec - offset_pred;
        let s = pred00 + self.r;
        let k0 = pred00 / s;
        let k1 = pred01 / s;

        self.state = [offset_pred + k0 * residual, drift_pred + k1 * residual];

        let new_p00 = (1.0 - k0) * pred00;
        let new_p01 = (1.0 - k0) * pred01;
        let new_p11 = pred11 - k1 * pred01;
        self.covariance = [[new_p00.max(0.0), new_p01], [new_p01, new_p11.max(0.0)]];

        self.record_residual(residual);
        self.update_measurement_noise(residual);

        (self.state[0], residual)
    }

    /// Filtered residual offset (µs)
    pub fn offset(&self) -> f64 {
        self.state[0]
    }

    /// Offset rate of change (µs per second)
    pub fn drift(&self) -> f64 {
        self.state[1]
    }

    pub fn uncertainty(&self) -> f64 {
        self.covariance[0][0]
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn recent_residuals(&self) -> impl Iterator<Item = &f64> {
        self.residuals.iter()
    }

    fn record_residual(&mut self, residual: f64) {
        self.residuals.push_back(residual);
        if self.residuals.len() > self.window_size {
            self.residuals.pop_front();
        }
    }

    fn update_measurement_noise(&mut self, residual: f64) {
        self.ewma_variance =
            self.alpha * self.ewma_variance + (1.0 - self.alpha) * residual.powi(2);
        self.r = self
            .ewma_variance
            .clamp(self.base_r * 0.1, self.base_r * 10.0);
    }
}
