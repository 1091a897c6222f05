//! Scalar guards for schedule arithmetic
//!
//! Noise schedules routinely evaluate expressions like `ln(0)`, `x / 0` or
//! `sqrt(-1e-9)` at their endpoints. These helpers give each of those a
//! defined, finite result.

/// Smallest magnitude substituted for an exactly-zero denominator
pub const EPSILON: f32 = 1e-8;

/// Replace NaN with zero
#[inline]
pub fn zero_if_nan(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value }
}

/// Substitute [`EPSILON`] (with the sign of zero) for an exactly-zero value
#[inline]
pub fn non_zero(value: f32) -> f32 {
    if value == 0.0 {
        EPSILON.copysign(value)
    } else {
        value
    }
}

/// Divide, defining `x / 0 = 0`
#[inline]
pub fn safe_div(numerator: f32, denominator: f32) -> f32 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Square root that keeps the sign of its argument
///
/// `signed_sqrt(-4.0) == -2.0`. Tiny negative residues from cancellation
/// stay tiny instead of becoming NaN.
#[inline]
pub fn signed_sqrt(value: f32) -> f32 {
    let root = value.abs().sqrt();
    if value < 0.0 { -root } else { root }
}

/// Natural log that maps `ln(0)` and negative inputs to `f32::NEG_INFINITY`
/// rather than NaN
#[inline]
pub fn ln_or_neg_inf(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        value.ln()
    }
}
