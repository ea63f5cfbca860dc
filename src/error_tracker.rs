//! Tracks a modulo-frame timing residual between leader and follower, used
//! by the follower's correction state machine.

use crate::estimator::{RollingEstimator, DEFAULT_CAPACITY};
use crate::math::modulo_frame_reduce;

const DEFAULT_SYNC_PERIOD: u32 = 30;

/// A [`RollingEstimator`] configured with `(P, L)` but no baseline. This is
/// a deliberately separate type from [`crate::clock_model::ClockModel`]:
/// each role (clock model vs. error model) owns its own window rather than
/// sharing one between two regressions with different update rules.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    window: RollingEstimator,
    sync_period: u32,
    initialised: bool,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self {
            window: RollingEstimator::new(DEFAULT_CAPACITY),
            sync_period: DEFAULT_SYNC_PERIOD,
            initialised: false,
        }
    }

    /// Sets `(P, L)`, but only on the first call; later calls are no-ops.
    pub fn initialise(&mut self, sync_period: u32, capacity: usize) {
        if self.initialised {
            return;
        }
        self.initialised = true;
        self.sync_period = sync_period;
        self.window.set_capacity(capacity);
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Shifts every stored residual by `delta`, absorbing a just-applied
    /// correction so the window stays consistent with the new frame
    /// duration.
    pub fn shift_y(&mut self, delta: i64) {
        self.window.shift_y(delta);
    }

    /// Strips the integer-frame-count component from
    /// `client_wall_clock_us - last_wall_clock_us`, pushes the remaining
    /// sub-frame residual against `sequence`, and returns the regression's
    /// forecast of the trending residual.
    pub fn trending_error(
        &mut self,
        last_wall_clock_us: i64,
        client_wall_clock_us: i64,
        last_payload_frame_duration_us: i64,
        sequence: u64,
    ) -> i64 {
        let delta = client_wall_clock_us - last_wall_clock_us;
        let (_, residual) = modulo_frame_reduce(delta, last_payload_frame_duration_us);

        self.window.push(sequence, residual);

        let (_, front_y) = self.window.front().expect("non-empty after push");
        let trending = front_y as f64
            + self.window.slope() * (self.window.len() - 1) as f64 * self.sync_period as f64;
        trending as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialise_is_idempotent() {
        let mut t = ErrorTracker::new();
        t.initialise(30, 100);
        t.initialise(1, 2);
        assert_eq!(t.sync_period, 30);
        assert_eq!(t.window.capacity(), 100);
    }

    #[test]
    fn converges_toward_zero_for_perfectly_aligned_clocks() {
        let mut t = ErrorTracker::new();
        t.initialise(30, 100);
        let frame_duration = 33_333i64;
        let mut last_forecast = 0;
        for seq in 0..20u64 {
            let last_wall = 1_000_000 + seq as i64 * frame_duration;
            let client_wall = last_wall; // no drift at all
            last_forecast = t.trending_error(last_wall, client_wall, frame_duration, seq);
        }
        assert!(last_forecast.abs() < 5, "forecast={last_forecast}");
    }

    #[test]
    fn shift_y_reduces_subsequent_forecast() {
        let mut t = ErrorTracker::new();
        t.initialise(30, 100);
        let frame_duration = 33_333i64;
        for seq in 0..10u64 {
            let last_wall = 1_000_000 + seq as i64 * frame_duration;
            let client_wall = last_wall + 80; // constant 80us drift
            t.trending_error(last_wall, client_wall, frame_duration, seq);
        }
        let forecast_before = {
            let (_, front_y) = t.window.front().unwrap();
            front_y as f64 + t.window.slope() * (t.window.len() - 1) as f64 * t.sync_period as f64
        };
        t.shift_y(forecast_before.round() as i64);
        let (_, front_y_after) = t.window.front().unwrap();
        assert!((front_y_after as f64).abs() < (forecast_before).abs());
    }
}
