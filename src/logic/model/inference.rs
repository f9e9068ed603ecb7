//! Scorer
//!
//! Scores telemetry against a loaded `ModelBundle`:
//! reindex → scale → window → reconstruct → per-window error →
//! per-timestamp smoothing over every covering window.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};
use serde::Serialize;

use super::autoencoder::Reconstructor;
use super::threshold::{ErrorStats, ThresholdDescriptor};
use crate::logic::bundle::ModelBundle;
use crate::logic::config::{ErrorMetric, PipelineConfig};
use crate::logic::dataset::TelemetryFrame;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::features::{build_windows, covering_windows};

/// Confidence floor when the error spread says nothing
const MIN_CONFIDENCE: f64 = 0.5;

/// Stand-in for a window error that overflowed; above any threshold
pub const SATURATED_ERROR: f64 = f64::MAX;

fn saturate(error: f64) -> f64 {
    if error.is_finite() {
        error
    } else {
        SATURATED_ERROR
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampScore {
    pub index: usize,
    pub label: String,
    /// Mean error of all covering windows; `SATURATED_ERROR` if any overflowed
    pub score: f64,
    /// `score / reference_error`, clipped to [0, 1]
    pub normalized_score: f64,
    pub is_anomaly: bool,
    /// Covering windows that contributed
    pub windows: usize,
}

/// Batch scoring result
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    /// Mean window error; `SATURATED_ERROR` if any window overflowed
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub confidence: f64,
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    pub total_windows: usize,
    pub total_rows: usize,
    pub flagged_timestamps: usize,
    /// Windows whose error was not finite
    pub saturated_windows: usize,
    pub error_stats: Option<ErrorStats>,
    pub metric: ErrorMetric,
    pub timestamps: Vec<TimestampScore>,
    pub sensor_columns: Vec<String>,
    pub missing_columns: Vec<String>,
    pub model_type: String,
    pub sequence_length: usize,
    pub approximation: bool,
}

/// Single-reading scoring result
#[derive(Debug, Clone, Serialize)]
pub struct ReadingScore {
    pub anomaly_score: f64,
    pub normalized_score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub confidence: f64,
    pub missing_columns: Vec<String>,
    pub ignored_fields: Vec<String>,
    pub model_type: String,
    /// Always true: the window is one reading repeated L times
    pub approximation: bool,
    pub note: String,
}

// ============================================================================
// SMOOTHING / SUMMARY
// ============================================================================

/// Per-row (mean error, contributing windows). Rows no window covers score 0;
/// a row covered by any non-finite window error saturates.
pub fn smooth_scores(window_errors: &[f64], rows: usize, len: usize) -> Vec<(f64, usize)> {
    let count = window_errors.len();
    (0..rows)
        .map(|t| {
            if count == 0 {
                return (0.0, 0);
            }
            let (sum, n, overflowed) = covering_windows(t, len, count)
                .map(|w| window_errors[w])
                .fold((0.0, 0usize, false), |(s, n, o), e| {
                    (s + e, n + 1, o || !e.is_finite())
                });
            if n == 0 {
                return (0.0, 0);
            }
            let mean = sum / n as f64;
            if overflowed || !mean.is_finite() {
                (SATURATED_ERROR, n)
            } else {
                (mean, n)
            }
        })
        .collect()
}

/// `clamp(1 - std/mean, 0.5, 1)`; 0.5 with no errors or a zero mean
pub fn batch_confidence(errors: &[f64]) -> f64 {
    let finite: Vec<f64> = errors.iter().copied().filter(|e| e.is_finite()).collect();
    if finite.is_empty() {
        return MIN_CONFIDENCE;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return MIN_CONFIDENCE;
    }
    let std = (finite.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();
    (1.0 - std / mean).clamp(MIN_CONFIDENCE, 1.0)
}

/// `min(1, |error - threshold| / threshold)`
pub fn reading_confidence(error: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 || !error.is_finite() {
        return 1.0;
    }
    ((error - threshold).abs() / threshold).min(1.0)
}

// ============================================================================
// SCORING
// ============================================================================

/// Score a whole frame. `on_batch(done, total)` fires after each error batch.
pub fn score_frame(
    bundle: &ModelBundle,
    frame: &TelemetryFrame,
    config: &PipelineConfig,
    on_batch: &mut dyn FnMut(usize, usize),
) -> PipelineResult<ScoreReport> {
    let (raw, missing) = frame.reindex(&bundle.columns);
    if !missing.is_empty() {
        log::warn!("Columns missing from input, filled with 0: {:?}", missing);
    }
    let scaled = bundle.scaler.apply(raw.view())?;

    let len = bundle.sequence_length();
    let rows = scaled.nrows();
    log::debug!("Scoring {} rows with {} model", rows, bundle.model.name());
    let errors = if rows < len {
        log::warn!("{} rows is shorter than one window ({}), every row scores 0", rows, len);
        Vec::new()
    } else {
        let windows = build_windows(scaled.view(), len)?;
        bundle
            .model
            .window_errors(windows.view(), bundle.threshold.metric, config.error_batch_size, on_batch)?
    };

    let threshold = &bundle.threshold;
    let timestamps: Vec<TimestampScore> = smooth_scores(&errors, rows, len)
        .into_iter()
        .enumerate()
        .map(|(index, (score, windows))| TimestampScore {
            index,
            label: frame.label(index),
            score,
            normalized_score: threshold.normalize(score),
            is_anomaly: windows > 0 && threshold.is_anomaly(score),
            windows,
        })
        .collect();

    Ok(summarize(bundle, errors, timestamps, rows, missing))
}

fn summarize(
    bundle: &ModelBundle,
    errors: Vec<f64>,
    timestamps: Vec<TimestampScore>,
    rows: usize,
    missing: Vec<String>,
) -> ScoreReport {
    let threshold: &ThresholdDescriptor = &bundle.threshold;
    let stats = ErrorStats::from_errors(&errors).map(|(s, _)| s);
    let saturated_windows = errors.iter().filter(|e| !e.is_finite()).count();
    if saturated_windows > 0 {
        log::warn!("{} window errors overflowed and were saturated", saturated_windows);
    }
    let anomaly_score = if saturated_windows > 0 {
        SATURATED_ERROR
    } else {
        stats.as_ref().map(|s| s.mean_error).unwrap_or(0.0)
    };
    let anomaly_count = errors.iter().filter(|e| threshold.is_anomaly(saturate(**e))).count();
    let anomaly_percentage = if errors.is_empty() {
        0.0
    } else {
        anomaly_count as f64 / errors.len() as f64 * 100.0
    };
    let flagged_timestamps = timestamps.iter().filter(|t| t.is_anomaly).count();

    log::info!(
        "Scored {} rows / {} windows: mean error {:.6}, {} anomalous windows ({:.1}%), threshold {:.6}",
        rows,
        errors.len(),
        anomaly_score,
        anomaly_count,
        anomaly_percentage,
        threshold.threshold
    );

    ScoreReport {
        anomaly_score,
        is_anomaly: !errors.is_empty() && threshold.is_anomaly(anomaly_score),
        threshold: threshold.threshold,
        confidence: batch_confidence(&errors),
        anomaly_count,
        anomaly_percentage,
        total_windows: errors.len(),
        total_rows: rows,
        flagged_timestamps,
        saturated_windows,
        error_stats: stats,
        metric: threshold.metric,
        timestamps,
        sensor_columns: bundle.columns.names().to_vec(),
        missing_columns: missing,
        model_type: bundle.model.model_type.clone(),
        sequence_length: bundle.sequence_length(),
        approximation: false,
    }
}

/// Score one reading by repeating it into a full window
pub fn score_reading(bundle: &ModelBundle, reading: &BTreeMap<String, f64>) -> PipelineResult<ReadingScore> {
    let columns = bundle.columns.names();
    let mut missing = Vec::new();
    let mut row = Vec::with_capacity(columns.len());
    for name in columns {
        match reading.get(name) {
            Some(v) if v.is_finite() => row.push(*v),
            Some(v) => {
                return Err(PipelineError::Malformed(format!("reading value for '{}' is not finite: {}", name, v)))
            }
            None => {
                missing.push(name.clone());
                row.push(0.0);
            }
        }
    }
    let ignored: Vec<String> = reading
        .keys()
        .filter(|k| !bundle.columns.contains(k))
        .cloned()
        .collect();
    if missing.len() == columns.len() {
        return Err(PipelineError::EmptyColumnSet {
            requested: columns.to_vec(),
            available: reading.keys().cloned().collect(),
        });
    }
    if !missing.is_empty() {
        log::warn!("Reading lacks {:?}, filled with 0", missing);
    }
    if !ignored.is_empty() {
        log::warn!("Reading fields not in the model ignored: {:?}", ignored);
    }

    let raw = Array2::from_shape_vec((1, row.len()), row).map_err(|e| PipelineError::ShapeMismatch(e.to_string()))?;
    let scaled = bundle.scaler.apply(raw.view())?;

    let len = bundle.sequence_length();
    let window: Array3<f64> = scaled
        .broadcast((len, scaled.ncols()))
        .ok_or_else(|| PipelineError::ShapeMismatch("cannot replicate reading".into()))?
        .to_owned()
        .insert_axis(Axis(0));

    let errors = bundle
        .model
        .window_errors(window.view(), bundle.threshold.metric, 1, &mut |_, _| {})?;
    let raw_error = errors
        .first()
        .copied()
        .ok_or_else(|| PipelineError::ShapeMismatch("no window built from reading".into()))?;
    if !raw_error.is_finite() {
        log::warn!("Reading error overflowed, saturated");
    }
    let error = saturate(raw_error);

    let threshold = &bundle.threshold;
    Ok(ReadingScore {
        anomaly_score: error,
        normalized_score: threshold.normalize(error),
        is_anomaly: threshold.is_anomaly(error),
        threshold: threshold.threshold,
        confidence: reading_confidence(error, threshold.threshold),
        missing_columns: missing,
        ignored_fields: ignored,
        model_type: bundle.model.model_type.clone(),
        approximation: true,
        note: format!("single reading repeated {} times to fill one window", len),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothing_averages_covering_windows() {
        // 5 rows, L=3 → windows cover rows 0-2, 1-3, 2-4
        let scores = smooth_scores(&[1.0, 2.0, 3.0], 5, 3);
        assert_eq!(scores[0], (1.0, 1));
        assert_eq!(scores[1], (1.5, 2));
        assert_eq!(scores[2], (2.0, 3));
        assert_eq!(scores[3], (2.5, 2));
        assert_eq!(scores[4], (3.0, 1));
    }

    #[test]
    fn test_short_frame_scores_zero() {
        let scores = smooth_scores(&[], 4, 10);
        assert_eq!(scores, vec![(0.0, 0); 4]);
    }

    #[test]
    fn test_non_finite_errors_saturate_covered_rows() {
        // 4 rows, L=2 → windows cover rows 0-1, 1-2, 2-3
        let scores = smooth_scores(&[1.0, f64::INFINITY, 3.0], 4, 2);
        assert_eq!(scores[0], (1.0, 1));
        assert_eq!(scores[1], (SATURATED_ERROR, 2));
        assert_eq!(scores[2], (SATURATED_ERROR, 2));
        assert_eq!(scores[3], (3.0, 1));

        let scores = smooth_scores(&[f64::NAN], 2, 2);
        assert!(scores.iter().all(|s| *s == (SATURATED_ERROR, 1)));
    }

    #[test]
    fn test_huge_finite_errors_saturate_instead_of_overflowing() {
        let scores = smooth_scores(&[f64::MAX, f64::MAX], 3, 2);
        assert_eq!(scores[1], (SATURATED_ERROR, 2));
        assert!(scores.iter().all(|(s, _)| s.is_finite()));
    }

    #[test]
    fn test_batch_confidence() {
        assert_eq!(batch_confidence(&[]), 0.5);
        assert_eq!(batch_confidence(&[0.0, 0.0]), 0.5);
        assert_eq!(batch_confidence(&[2.0, 2.0, 2.0]), 1.0);
        // std/mean = 1 → floor
        assert_eq!(batch_confidence(&[0.0, 2.0]), 0.5);
        assert!((batch_confidence(&[1.0, 3.0]) - 0.5).abs() < 1e-12);
        assert!((batch_confidence(&[9.0, 11.0]) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_reading_confidence() {
        assert_eq!(reading_confidence(1.5, 1.0), 0.5);
        assert_eq!(reading_confidence(5.0, 1.0), 1.0);
        assert_eq!(reading_confidence(0.1, 0.0), 1.0);
    }
}
