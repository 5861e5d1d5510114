//! Safe casting utilities between sample counts and floating-point rates

use crate::{Error, Result};

/// Safely convert a non-negative, finite f64 to usize, truncating toward zero
///
/// # Errors
///
/// Returns an error if the value is not finite, negative, or exceeds usize::MAX
#[allow(clippy::cast_possible_truncation)] // Truncation after bounds check is intended
#[allow(clippy::cast_sign_loss)] // Sign checked above
#[allow(clippy::cast_precision_loss)] // MAX bound checking is approximate
pub fn f64_to_usize(value: f64) -> Result<usize> {
    if value.is_finite() && value >= 0.0 && value < usize::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(Error::InvalidInput(format!(
            "Value {value} cannot be safely converted to usize"
        )))
    }
}

/// Convert a count to f64 for averaging
///
/// Counts in this crate (channels, samples, points) are far below 2^53, so the
/// conversion is exact in practice.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

/// Number of samples needed for one localization
///
/// # Errors
///
/// Returns an error if either rate is not positive or the result is zero
pub fn samples_per_cycle(sample_rate: f64, localizations_per_second: f64) -> Result<usize> {
    if !(sample_rate > 0.0) || !(localizations_per_second > 0.0) {
        return Err(Error::InvalidInput(format!(
            "Sample rate ({sample_rate}) and localization rate ({localizations_per_second}) must be positive"
        )));
    }
    let samples = f64_to_usize(sample_rate / localizations_per_second)?;
    if samples == 0 {
        return Err(Error::InvalidInput(format!(
            "Localization rate {localizations_per_second} exceeds sample rate {sample_rate}"
        )));
    }
    Ok(samples)
}
