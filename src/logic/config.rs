//! Pipeline Configuration
//!
//! Explicit tunables passed into every stage. Nothing here is global:
//! callers build one `PipelineConfig` per job and hand it down.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use super::error::PipelineError;

/// Per-window reconstruction error metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMetric {
    #[default]
    Mse,
    Mae,
}

impl std::str::FromStr for ErrorMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mse" => Ok(ErrorMetric::Mse),
            "mae" => Ok(ErrorMetric::Mae),
            other => Err(format!("unknown error metric '{}'", other)),
        }
    }
}

/// Input bounds for the frame loader
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadLimits {
    pub max_rows: Option<usize>,
    pub max_bytes: Option<u64>,
}

/// All pipeline tunables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Windowing
    pub sequence_length: usize,

    // Training
    pub cold_epochs: usize,
    pub warm_epochs: usize,
    pub batch_size: usize,
    pub error_batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub patience: usize,
    pub hidden_units: usize,
    pub latent_units: usize,
    pub seed: u64,
    pub error_metric: ErrorMetric,

    // Calibration
    pub threshold_percentile: f64,
    pub blend_weight: f64,
    pub blend_tolerance: f64,

    // Loading
    pub fallback_columns: usize,
    pub chunk_size: usize,
    pub max_bytes: Option<u64>,
    pub max_training_rows: usize,
    pub recent_fraction: f64,
    pub reuse_prior_scaler: bool,

    // Progress
    pub heartbeat_interval: Duration,

    // Storage
    pub artifact_root: PathBuf,
    pub pretrained_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            cold_epochs: DEFAULT_COLD_EPOCHS,
            warm_epochs: DEFAULT_WARM_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            error_batch_size: DEFAULT_ERROR_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            validation_split: DEFAULT_VALIDATION_SPLIT,
            patience: DEFAULT_PATIENCE,
            hidden_units: DEFAULT_HIDDEN_UNITS,
            latent_units: DEFAULT_LATENT_UNITS,
            seed: DEFAULT_SEED,
            error_metric: ErrorMetric::Mse,
            threshold_percentile: DEFAULT_THRESHOLD_PERCENTILE,
            blend_weight: DEFAULT_BLEND_WEIGHT,
            blend_tolerance: DEFAULT_BLEND_TOLERANCE,
            fallback_columns: DEFAULT_FALLBACK_COLUMNS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_bytes: None,
            max_training_rows: DEFAULT_MAX_TRAINING_ROWS,
            recent_fraction: DEFAULT_RECENT_FRACTION,
            reuse_prior_scaler: true,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            artifact_root: default_artifact_root(),
            pretrained_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `ANOMALY_*` environment variables
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sequence_length: env_or("ANOMALY_SEQUENCE_LENGTH", d.sequence_length),
            cold_epochs: env_or("ANOMALY_COLD_EPOCHS", d.cold_epochs),
            warm_epochs: env_or("ANOMALY_WARM_EPOCHS", d.warm_epochs),
            batch_size: env_or("ANOMALY_BATCH_SIZE", d.batch_size),
            error_batch_size: env_or("ANOMALY_ERROR_BATCH_SIZE", d.error_batch_size),
            learning_rate: env_or("ANOMALY_LEARNING_RATE", d.learning_rate),
            validation_split: env_or("ANOMALY_VALIDATION_SPLIT", d.validation_split),
            patience: env_or("ANOMALY_PATIENCE", d.patience),
            hidden_units: env_or("ANOMALY_HIDDEN_UNITS", d.hidden_units),
            latent_units: env_or("ANOMALY_LATENT_UNITS", d.latent_units),
            seed: env_or("ANOMALY_SEED", d.seed),
            error_metric: env_or("ANOMALY_ERROR_METRIC", d.error_metric),
            threshold_percentile: env_or("ANOMALY_THRESHOLD_PERCENTILE", d.threshold_percentile),
            blend_weight: env_or("ANOMALY_BLEND_WEIGHT", d.blend_weight),
            blend_tolerance: env_or("ANOMALY_BLEND_TOLERANCE", d.blend_tolerance),
            fallback_columns: env_or("ANOMALY_FALLBACK_COLUMNS", d.fallback_columns),
            chunk_size: env_or("ANOMALY_CHUNK_SIZE", d.chunk_size),
            max_bytes: env_opt("ANOMALY_MAX_BYTES"),
            max_training_rows: env_or("ANOMALY_MAX_TRAINING_ROWS", d.max_training_rows),
            recent_fraction: env_or("ANOMALY_RECENT_FRACTION", d.recent_fraction),
            reuse_prior_scaler: env_or("ANOMALY_REUSE_PRIOR_SCALER", d.reuse_prior_scaler),
            heartbeat_interval: Duration::from_secs(env_or(
                "ANOMALY_HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )),
            artifact_root: get_artifact_root(),
            pretrained_dir: get_pretrained_dir(),
        }
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.sequence_length == 0 {
            return invalid("sequence_length must be >= 1".into());
        }
        if self.batch_size == 0 || self.error_batch_size == 0 {
            return invalid("batch sizes must be >= 1".into());
        }
        if self.cold_epochs == 0 || self.warm_epochs == 0 {
            return invalid("epoch counts must be >= 1".into());
        }
        if self.hidden_units == 0 || self.latent_units == 0 {
            return invalid("layer widths must be >= 1".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be > 0, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return invalid(format!("validation_split must be in [0, 1), got {}", self.validation_split));
        }
        if !(0.0..=100.0).contains(&self.threshold_percentile) {
            return invalid(format!(
                "threshold_percentile must be in [0, 100], got {}",
                self.threshold_percentile
            ));
        }
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return invalid(format!("blend_weight must be in [0, 1], got {}", self.blend_weight));
        }
        if !(0.0..=1.0).contains(&self.recent_fraction) {
            return invalid(format!("recent_fraction must be in [0, 1], got {}", self.recent_fraction));
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be >= 1".into());
        }
        if self.max_training_rows < self.sequence_length {
            return invalid(format!(
                "max_training_rows ({}) must be >= sequence_length ({})",
                self.max_training_rows, self.sequence_length
            ));
        }
        Ok(())
    }

    /// Loader bounds for a job, combining the caller's row limit with the byte budget
    pub fn load_limits(&self, row_limit: Option<usize>) -> LoadLimits {
        LoadLimits {
            max_rows: row_limit,
            max_bytes: self.max_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence_length, 10);
        assert_eq!(config.threshold_percentile, 95.0);
    }

    #[test]
    fn test_zero_sequence_length_rejected() {
        let config = PipelineConfig {
            sequence_length: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_percentile_out_of_range_rejected() {
        let config = PipelineConfig {
            threshold_percentile: 101.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_error_metric_parse() {
        assert_eq!("MAE".parse::<ErrorMetric>().unwrap(), ErrorMetric::Mae);
        assert!("rmse".parse::<ErrorMetric>().is_err());
    }
}
