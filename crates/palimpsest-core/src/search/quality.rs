//! Quality Filtering and Boosting
//!
//! Extraction quality scores live on a 0-5 scale. Filtering is strict:
//! a NULL quality never passes a threshold, because an unassessed chunk
//! cannot claim to meet a quality bar. Boosting is gentle: NULL stays
//! neutral and the multiplier is clamped so quality can reorder results
//! but never drown out relevance.

use crate::error::{EngineError, Result};

/// Upper bound of the quality scale
pub const MAX_QUALITY: f64 = 5.0;

/// Quality value at which the boost multiplier is exactly 1.0
const NEUTRAL_QUALITY: f64 = 2.5;

/// Clamp bounds for the boost multiplier
const MIN_BOOST: f64 = 0.5;
const MAX_BOOST: f64 = 2.0;

/// Validate a minimum-quality threshold. The valid domain is (0, 5]:
/// zero is rejected because "at least zero" filters nothing and is always
/// a caller mistake.
pub fn validate_min_quality(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > MAX_QUALITY {
        return Err(EngineError::InvalidInput(format!(
            "min_quality must be in (0, {}], got {}",
            MAX_QUALITY, threshold
        )));
    }
    Ok(())
}

/// Threshold predicate: NULL quality always fails, boundary-equal passes
pub fn passes(quality: Option<f64>, threshold: f64) -> bool {
    match quality {
        Some(q) => q >= threshold,
        None => false,
    }
}

/// Boost multiplier for a quality score: quality / 2.5, clamped to
/// [0.5, 2.0]. NULL quality is neutral (1.0); filtering, not boosting,
/// is where NULL is penalized.
pub fn boost_factor(quality: Option<f64>) -> f64 {
    match quality {
        Some(q) => (q / NEUTRAL_QUALITY).clamp(MIN_BOOST, MAX_BOOST),
        None => 1.0,
    }
}

/// Apply the quality boost to a relevance score
pub fn apply_boost(score: f64, quality: Option<f64>) -> f64 {
    score * boost_factor(quality)
}
