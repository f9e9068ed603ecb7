//! Feature Scaler
//!
//! Per-column standardization fitted on a training frame. The fitted state is
//! persisted with the model and applied unchanged at scoring time.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::layout::SensorColumnSet;
use crate::constants::STD_EPSILON;
use crate::logic::error::{PipelineError, PipelineResult};

/// Whether a prior scaler was reused or a new one fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerDecision {
    Reused,
    Fitted,
}

/// Fitted standardization parameters, positional per sensor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub columns: SensorColumnSet,
    pub layout_hash: u32,
    pub mean: Vec<f64>,
    /// Population std, floored at `STD_EPSILON`
    pub std: Vec<f64>,
    pub samples: usize,
}

impl ScalerState {
    /// Fit mean/std per column over every row of `matrix`
    pub fn fit(columns: &SensorColumnSet, matrix: ArrayView2<f64>) -> PipelineResult<Self> {
        check_width(columns.len(), matrix.ncols())?;
        if matrix.nrows() == 0 {
            return Err(PipelineError::EmptyFrame);
        }

        let n = matrix.nrows() as f64;
        let mean: Vec<f64> = matrix
            .axis_iter(Axis(1))
            .map(|col| col.sum() / n)
            .collect();
        let std: Vec<f64> = matrix
            .axis_iter(Axis(1))
            .zip(&mean)
            .map(|(col, m)| {
                let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let s = var.sqrt();
                if s.is_finite() && s > STD_EPSILON {
                    s
                } else {
                    STD_EPSILON
                }
            })
            .collect();

        log::debug!("Scaler fitted on {} rows x {} columns", matrix.nrows(), matrix.ncols());

        Ok(Self {
            layout_hash: columns.layout_hash(),
            columns: columns.clone(),
            mean,
            std,
            samples: matrix.nrows(),
        })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Same column identity as `columns`
    pub fn matches(&self, columns: &SensorColumnSet) -> bool {
        self.layout_hash == columns.layout_hash() && self.columns.is_compatible(columns)
    }

    /// `(x - mean) / std` per column
    pub fn apply(&self, matrix: ArrayView2<f64>) -> PipelineResult<Array2<f64>> {
        check_width(self.width(), matrix.ncols())?;

        let mut out = matrix.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s) = (self.mean[j], self.std[j]);
            col.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }

    /// Internal consistency of a loaded state
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.mean.len() != self.columns.len() || self.std.len() != self.columns.len() {
            return Err(format!(
                "scaler has {} means / {} stds for {} columns",
                self.mean.len(),
                self.std.len(),
                self.columns.len()
            ));
        }
        if self.layout_hash != self.columns.layout_hash() {
            return Err("scaler layout hash does not match its columns".into());
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("scaler std must be finite and positive".into());
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err("scaler mean must be finite".into());
        }
        Ok(())
    }
}

/// Reuse `prior` when its column identity matches, otherwise fit fresh
pub fn fit_or_reuse(
    prior: Option<&ScalerState>,
    columns: &SensorColumnSet,
    matrix: ArrayView2<f64>,
) -> PipelineResult<(ScalerState, ScalerDecision)> {
    match prior {
        Some(state) if state.matches(columns) => {
            log::info!("Reusing prior scaler ({} samples)", state.samples);
            Ok((state.clone(), ScalerDecision::Reused))
        }
        Some(_) => {
            log::info!("Prior scaler column identity differs, fitting a new one");
            Ok((ScalerState::fit(columns, matrix)?, ScalerDecision::Fitted))
        }
        None => Ok((ScalerState::fit(columns, matrix)?, ScalerDecision::Fitted)),
    }
}

fn check_width(expected: usize, actual: usize) -> PipelineResult<()> {
    if expected != actual {
        return Err(PipelineError::ColumnMismatch { expected, actual });
    }
    Ok(())
}
