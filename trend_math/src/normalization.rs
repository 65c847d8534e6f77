//! Min-max normalization
//!
//! Ranges are always derived from the data passed in; nothing is cached, so
//! a new extreme immediately moves every normalized value.

use crate::statistics::min_max;
use crate::Result;

/// Value returned when the observed range is degenerate (a single point or
/// a constant history).
pub const DEGENERATE_MIDPOINT: f64 = 0.5;

/// Rescale `value` to [0, 1] using the range of `history`.
///
/// The value is clamped into the range, and a zero-width range yields
/// [`DEGENERATE_MIDPOINT`].
pub fn min_max_scale(value: f64, history: &[f64]) -> Result<f64> {
    let (lo, hi) = min_max(history)?;
    let span = hi - lo;

    if !span.is_finite() || span <= f64::EPSILON * hi.abs().max(1.0) {
        return Ok(DEGENERATE_MIDPOINT);
    }

    Ok(((value - lo) / span).clamp(0.0, 1.0))
}

/// Normalize every point against the range of all data up to and including
/// that point.
pub fn expanding_min_max(values: &[f64]) -> Result<Vec<f64>> {
    (0..values.len())
        .map(|i| min_max_scale(values[i], &values[..=i]))
        .collect()
}
