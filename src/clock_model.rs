//! Trend-corrected wall-clock estimate from a baseline-subtracted regression.

use crate::estimator::{RollingEstimator, DEFAULT_CAPACITY};

const DEFAULT_SYNC_PERIOD: u32 = 30;

/// Warm-up threshold: `modelled_wall_clock` only trusts the regression once
/// the window holds more than this many points.
const WARMUP_THRESHOLD: usize = 5;

/// Wraps a [`RollingEstimator`] with a baseline wall-clock/kernel-timestamp
/// pair, producing a modelled wall clock for a given sequence number.
///
/// An instance starts uninitialised; [`ClockModel::initialise`] is
/// idempotent, so the baseline and `(P, L)` configuration are fixed for the
/// life of the instance by whichever call reaches it first.
#[derive(Debug, Clone)]
pub struct ClockModel {
    window: RollingEstimator,
    baseline: Option<(i64, u64)>,
    sync_period: u32,
    initialised: bool,
}

impl Default for ClockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockModel {
    pub fn new() -> Self {
        Self {
            window: RollingEstimator::new(DEFAULT_CAPACITY),
            baseline: None,
            sync_period: DEFAULT_SYNC_PERIOD,
            initialised: false,
        }
    }

    /// Sets the baseline `(W0, K0)` and `(P, L)` configuration, but only on
    /// the first call; later calls are no-ops.
    pub fn initialise(&mut self, wall_clock_us: i64, kernel_ns: u64, sync_period: u32, capacity: usize) {
        if self.initialised {
            return;
        }
        self.initialised = true;
        self.baseline = Some((wall_clock_us, kernel_ns));
        self.sync_period = sync_period;
        self.window.set_capacity(capacity);
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Empties the window, preserving the baseline and `(P, L)`
    /// configuration.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Computes the modelled wall clock for `(wall_clock_us, kernel_ns,
    /// sequence)`, pushing the derived residual into the window first.
    ///
    /// Returns `wall_clock_us` unchanged during warm-up (fewer than
    /// [`WARMUP_THRESHOLD`] + 1 points held).
    pub fn modelled_wall_clock(&mut self, wall_clock_us: i64, kernel_ns: u64, sequence: u64) -> i64 {
        let (w0, k0) = self.baseline.unwrap_or((wall_clock_us, kernel_ns));

        let y = (wall_clock_us - w0) - (kernel_ns as i64 - k0 as i64) / 1000;
        self.window.push(sequence, y);

        if self.window.len() > WARMUP_THRESHOLD {
            let (_, front_y) = self.window.front().expect("non-empty after push");
            let kernel_term = (kernel_ns as i64 - k0 as i64) / 1000;
            let trending = front_y as f64
                + self.window.slope() * (self.window.len() - 1) as f64 * self.sync_period as f64
                + kernel_term as f64;
            trending as i64 + w0
        } else {
            wall_clock_us
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_passthrough_returns_raw_wall_clock() {
        let mut model = ClockModel::new();
        model.initialise(1_000_000, 0, 30, 100);
        for i in 0..5u64 {
            let w = 1_000_000 + i as i64 * 33_333;
            let out = model.modelled_wall_clock(w, i * 33_333_000, i);
            assert_eq!(out, w, "expected passthrough on sample {i}");
        }
    }

    #[test]
    fn initialise_is_idempotent() {
        let mut model = ClockModel::new();
        model.initialise(1_000_000, 42, 30, 100);
        model.initialise(999, 1, 7, 3);
        assert_eq!(model.baseline, Some((1_000_000, 42)));
        assert_eq!(model.sync_period, 30);
        assert_eq!(model.window.capacity(), 100);
    }

    #[test]
    fn clear_preserves_baseline_and_config() {
        let mut model = ClockModel::new();
        model.initialise(1_000_000, 42, 30, 100);
        model.modelled_wall_clock(1_000_100, 100_000, 1);
        model.clear();
        assert_eq!(model.window.len(), 0);
        assert_eq!(model.baseline, Some((1_000_000, 42)));
        assert_eq!(model.sync_period, 30);
    }

    #[test]
    fn stable_kernel_rate_tracks_wall_clock_after_warmup() {
        let mut model = ClockModel::new();
        let frame_us = 33_333i64;
        model.initialise(1_000_000, 0, 30, 100);
        let mut out = 1_000_000;
        for i in 0..20u64 {
            let w = 1_000_000 + i as i64 * frame_us;
            let k = i * (frame_us as u64) * 1000;
            out = model.modelled_wall_clock(w, k, i);
        }
        // kernel and wall clock advance in lockstep here, so the modelled
        // value should track the true wall clock closely.
        assert!((out - (1_000_000 + 19 * frame_us)).abs() < 50);
    }
}
