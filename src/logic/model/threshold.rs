//! Threshold Calibration
//!
//! Derives the anomaly threshold from the trained model's own per-window
//! reconstruction errors: a percentile of the finite errors, optionally
//! blended with a compatible prior threshold.

use serde::{Deserialize, Serialize};

use crate::logic::config::{ErrorMetric, PipelineConfig};
use crate::logic::error::{PipelineError, PipelineResult};

/// Summary of a reconstruction error distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorStats {
    pub mean_error: f64,
    pub std_error: f64,
    pub min_error: f64,
    pub max_error: f64,
    pub percentile_90: f64,
    pub percentile_95: f64,
    pub percentile_99: f64,
    /// Finite errors the stats were computed over
    pub samples: usize,
    /// NaN/Inf errors dropped before computing
    pub non_finite: usize,
}

impl ErrorStats {
    /// Stats over the finite values of `errors`; None if there are none
    pub fn from_errors(errors: &[f64]) -> Option<(Self, Vec<f64>)> {
        let mut finite: Vec<f64> = errors.iter().copied().filter(|e| e.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        finite.sort_by(f64::total_cmp);

        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let var = finite.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        let stats = Self {
            mean_error: mean,
            std_error: var.sqrt(),
            min_error: finite[0],
            max_error: finite[finite.len() - 1],
            percentile_90: percentile(&finite, 90.0),
            percentile_95: percentile(&finite, 95.0),
            percentile_99: percentile(&finite, 99.0),
            samples: finite.len(),
            non_finite: errors.len() - finite.len(),
        };
        Some((stats, finite))
    }
}

/// Persisted threshold plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDescriptor {
    /// Final threshold used for flagging
    pub threshold: f64,

    /// Percentile threshold before any blending
    #[serde(default)]
    pub calibrated_threshold: Option<f64>,

    #[serde(default = "default_percentile")]
    pub percentile: f64,

    #[serde(default)]
    pub metric: ErrorMetric,

    /// Score normalization denominator
    #[serde(default)]
    pub reference_error: Option<f64>,

    #[serde(flatten)]
    pub stats: ErrorStats,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained_threshold: Option<f64>,

    /// Final minus prior threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_improvement: Option<f64>,

    #[serde(default)]
    pub blended: bool,
}

fn default_percentile() -> f64 {
    crate::constants::DEFAULT_THRESHOLD_PERCENTILE
}

impl ThresholdDescriptor {
    /// Stored reference, or 2 × threshold for descriptors that lack one
    pub fn reference_error(&self) -> f64 {
        self.reference_error.unwrap_or(self.threshold * 2.0)
    }

    /// `score / reference`, clipped to [0, 1]
    pub fn normalize(&self, score: f64) -> f64 {
        let reference = self.reference_error();
        if !score.is_finite() {
            return 1.0;
        }
        if reference <= 0.0 {
            return if score > 0.0 { 1.0 } else { 0.0 };
        }
        (score / reference).clamp(0.0, 1.0)
    }

    pub fn is_anomaly(&self, score: f64) -> bool {
        score > self.threshold
    }

    pub fn check_consistency(&self) -> Result<(), String> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("threshold must be finite and non-negative, got {}", self.threshold));
        }
        Ok(())
    }
}

// ============================================================================
// CALIBRATION
// ============================================================================

/// Linear interpolation between closest ranks. `sorted` must be ascending and non-empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Blend toward `prior` when `new` is within `tolerance` relative difference.
/// Returns (threshold, blended).
pub fn blend_with_prior(new: f64, prior: f64, weight: f64, tolerance: f64) -> (f64, bool) {
    if !(prior.is_finite() && prior > 0.0) {
        return (new, false);
    }
    if (new - prior).abs() < prior * tolerance {
        (weight * prior + (1.0 - weight) * new, true)
    } else {
        (new, false)
    }
}

/// Build the descriptor from per-window errors
pub fn calibrate(
    errors: &[f64],
    config: &PipelineConfig,
    prior_threshold: Option<f64>,
) -> PipelineResult<ThresholdDescriptor> {
    let (stats, finite) = ErrorStats::from_errors(errors).ok_or(PipelineError::DegenerateErrorDistribution)?;
    if stats.non_finite > 0 {
        log::warn!("Dropped {} non-finite reconstruction errors", stats.non_finite);
    }

    let calibrated = percentile(&finite, config.threshold_percentile);
    log::info!(
        "Calibrated threshold {:.6} (p{} of {} errors, mean {:.6}, max {:.6})",
        calibrated,
        config.threshold_percentile,
        stats.samples,
        stats.mean_error,
        stats.max_error
    );

    let (threshold, blended) = match prior_threshold {
        Some(prior) => {
            let (t, blended) = blend_with_prior(calibrated, prior, config.blend_weight, config.blend_tolerance);
            if blended {
                log::info!("Blended with prior threshold {:.6} -> {:.6}", prior, t);
            } else {
                log::warn!(
                    "New threshold {:.6} too far from prior {:.6}, not blending",
                    calibrated,
                    prior
                );
            }
            (t, blended)
        }
        None => (calibrated, false),
    };

    Ok(ThresholdDescriptor {
        threshold,
        calibrated_threshold: Some(calibrated),
        percentile: config.threshold_percentile,
        metric: config.error_metric,
        reference_error: Some(threshold * 2.0),
        stats,
        pretrained_threshold: prior_threshold,
        threshold_improvement: prior_threshold.map(|p| threshold - p),
        blended,
    })
}
