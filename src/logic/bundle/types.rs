//! Bundle Types
//!
//! A `ModelBundle` is the unit of persistence and of inference: column set,
//! scaler, model and threshold for one (user, machine) key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::validate::BundleError;
use crate::logic::features::{ScalerDecision, ScalerState, SensorColumnSet};
use crate::logic::model::autoencoder::WindowAutoencoder;
use crate::logic::model::threshold::ThresholdDescriptor;
use crate::logic::model::trainer::{PriorSource, StartMode};

pub const MODEL_FILE: &str = "model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const COLUMNS_FILE: &str = "columns.json";
pub const THRESHOLD_FILE: &str = "threshold.json";
pub const REPORT_FILE: &str = "training_stats.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Files that must all be present for a bundle to load
pub const REQUIRED_FILES: [&str; 4] = [MODEL_FILE, SCALER_FILE, COLUMNS_FILE, THRESHOLD_FILE];

pub const MANIFEST_VERSION: u32 = 1;

// ============================================================================
// KEY
// ============================================================================

/// Validated (user, machine) pair; both parts are safe single path components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    user_id: String,
    machine_id: String,
}

impl ModelKey {
    pub fn new(user_id: &str, machine_id: &str) -> Result<Self, BundleError> {
        check_component("user_id", user_id)?;
        check_component("machine_id", machine_id)?;
        Ok(Self {
            user_id: user_id.to_string(),
            machine_id: machine_id.to_string(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn user_dir_name(&self) -> String {
        format!("user_{}", self.user_id)
    }

    pub fn machine_dir_name(&self) -> String {
        format!("machine_{}", self.machine_id)
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.machine_id)
    }
}

fn check_component(field: &str, value: &str) -> Result<(), BundleError> {
    let bad = value.trim().is_empty()
        || value == "."
        || value.contains("..")
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if bad {
        return Err(BundleError::InvalidKey(format!("{} '{}' is not a valid identifier", field, value)));
    }
    Ok(())
}

// ============================================================================
// BUNDLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    pub columns: SensorColumnSet,
    pub scaler: ScalerState,
    pub model: WindowAutoencoder,
    pub threshold: ThresholdDescriptor,
}

impl ModelBundle {
    pub fn sequence_length(&self) -> usize {
        self.model.sequence_length
    }

    /// (L, F) the model declares
    pub fn input_shape(&self) -> (usize, usize) {
        (self.model.sequence_length, self.model.n_features)
    }

    pub fn layout_hash(&self) -> u32 {
        self.columns.layout_hash()
    }

    /// Warm-start compatibility with a job's window shape and column set
    pub fn is_compatible_with(&self, sequence_length: usize, columns: &SensorColumnSet) -> bool {
        self.input_shape() == (sequence_length, columns.len()) && self.layout_hash() == columns.layout_hash()
    }
}

// ============================================================================
// MANIFEST
// ============================================================================

/// Written last; lists a SHA-256 per artifact file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: u32,
    pub user_id: String,
    pub machine_id: String,
    pub layout_hash: u32,
    pub sequence_length: usize,
    pub feature_count: usize,
    pub created_at: String,
    pub app_version: String,
    /// file name → hex SHA-256
    pub files: BTreeMap<String, String>,
}

// ============================================================================
// TRAINING REPORT
// ============================================================================

/// Final stats of a training job; also persisted as `training_stats.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub job_id: String,
    pub user_id: String,
    pub machine_id: String,

    pub final_loss: f64,
    pub final_val_loss: Option<f64>,
    pub epochs_trained: usize,
    pub epochs_planned: usize,
    pub best_epoch: usize,
    pub early_stopped: bool,
    pub start_mode: StartMode,
    pub prior_source: Option<PriorSource>,
    pub scaler_decision: ScalerDecision,

    pub training_samples: usize,
    pub validation_samples: usize,
    pub rows_used: usize,
    pub downsampled: bool,

    pub training_duration: f64,
    pub avg_epoch_time: f64,

    #[serde(flatten)]
    pub threshold: ThresholdDescriptor,

    pub sensor_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub layout_hash: u32,
    pub model_type: String,
    pub sequence_length: usize,
    pub parameter_count: usize,
    pub trained_at: String,
}
