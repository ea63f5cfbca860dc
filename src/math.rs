//! Small numeric helpers shared by the clock model and error tracker.

/// Splits `delta` into an integer number of `frame_duration`-sized steps
/// plus a sub-frame residual, rounding the step count to the nearest
/// integer (ties away from zero).
///
/// Returns `(steps, residual)` such that
/// `delta == steps * frame_duration + residual` and
/// `residual.abs() <= frame_duration / 2` (up to rounding at the `D/2`
/// boundary itself).
pub fn modulo_frame_reduce(delta: i64, frame_duration: i64) -> (i64, i64) {
    debug_assert!(frame_duration > 0, "frame duration must be positive");
    let steps = (delta as f64 / frame_duration as f64).round() as i64;
    let residual = delta - steps * frame_duration;
    (steps, residual)
}
