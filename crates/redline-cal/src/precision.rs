//! Scale-aware display rounding.
//!
//! Decoded physical values carry float noise (13.000000000001); printing
//! them at the precision their scale factor can actually express keeps
//! output clean without touching the stored values.

/// Decimal places needed to print values produced by a scale factor.
///
/// scale 1.0 → 0, 0.1 → 1, 0.25 → 2, 0.001 → 3; capped at 6.
pub fn precision_from_scale(scale: f64) -> u8 {
    if scale <= 0.0 {
        return 4;
    }
    if scale >= 1.0 {
        return 0;
    }

    // Multiply by 10 until the scale is (numerically) an integer
    let mut value = scale;
    let mut precision = 0u8;
    while precision < 6 && (value - value.round()).abs() >= 1e-9 {
        value *= 10.0;
        precision += 1;
    }
    precision
}

pub fn round_to_precision(value: f64, precision: u8) -> f64 {
    if precision == 0 {
        value.round()
    } else {
        let factor = 10_f64.powi(precision as i32);
        (value * factor).round() / factor
    }
}

/// Round a physical value for display based on the scale that produced it
pub fn round_for_scale(value: f64, scale: f64) -> f64 {
    round_to_precision(value, precision_from_scale(scale))
}

/// Fixed-precision string for tables and logs
pub fn format_physical(value: f64, scale: f64) -> String {
    let precision = precision_from_scale(scale);
    format!("{:.*}", precision as usize, round_to_precision(value, precision))
}
