/// Tolerance used when comparing quota amounts.
pub const QUOTA_EPSILON: f64 = 1e-6;

#[inline]
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

/// Replaces negative values and NaN with zero.
#[inline]
pub fn non_negative(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}
