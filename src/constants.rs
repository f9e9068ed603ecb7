//! Central Configuration Constants
//!
//! Single source of truth for all pipeline defaults.
//! `PipelineConfig::from_env` layers `ANOMALY_*` environment overrides on top.

use std::path::PathBuf;

/// Window length (rows per sequence)
pub const DEFAULT_SEQUENCE_LENGTH: usize = 10;

/// Epochs when training from scratch
pub const DEFAULT_COLD_EPOCHS: usize = 5;

/// Epochs when fine-tuning a compatible prior model
pub const DEFAULT_WARM_EPOCHS: usize = 2;

/// Mini-batch size for gradient steps
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Batch size for reconstruction-error passes
pub const DEFAULT_ERROR_BATCH_SIZE: usize = 200;

pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;

/// Trailing share of windows held out for validation
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;

/// Epochs without validation improvement before stopping
pub const DEFAULT_PATIENCE: usize = 3;

pub const DEFAULT_HIDDEN_UNITS: usize = 32;
pub const DEFAULT_LATENT_UNITS: usize = 8;
pub const DEFAULT_SEED: u64 = 42;

/// Percentile of training errors used as the primary threshold
pub const DEFAULT_THRESHOLD_PERCENTILE: f64 = 95.0;

/// Weight of the prior threshold when blending
pub const DEFAULT_BLEND_WEIGHT: f64 = 0.7;

/// Max relative difference to the prior threshold that still allows blending
pub const DEFAULT_BLEND_TOLERANCE: f64 = 0.5;

/// Numeric columns taken when no sensor column can be identified by name
pub const DEFAULT_FALLBACK_COLUMNS: usize = 10;

/// Read chunk size for bounded loading (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Row cap applied to training frames
pub const DEFAULT_MAX_TRAINING_ROWS: usize = 5000;

/// Share of the row cap reserved for the most recent rows
pub const DEFAULT_RECENT_FRACTION: f64 = 0.3;

/// Max seconds between heartbeats inside long loops
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Rows sampled when classifying columns as numeric
pub const SCHEMA_SAMPLE_ROWS: usize = 50;

/// Floor for per-column std
pub const STD_EPSILON: f64 = 1e-8;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "sensor-anomaly";

/// Model type tag written into artifacts and reports
pub const MODEL_TYPE: &str = "dense_window_autoencoder";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a parsed env var or fall back
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an optional parsed env var
pub fn env_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Default artifact root: `<data_local_dir>/sensor-anomaly/user_models`
pub fn default_artifact_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("user_models")
}

/// Artifact root from environment or default
pub fn get_artifact_root() -> PathBuf {
    std::env::var("ANOMALY_ARTIFACT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_artifact_root())
}

/// Optional pretrained bundle directory used as a warm-start source
pub fn get_pretrained_dir() -> Option<PathBuf> {
    std::env::var("ANOMALY_PRETRAINED_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}
