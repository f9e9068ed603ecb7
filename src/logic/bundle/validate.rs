//! Bundle validation
//!
//! A bundle is usable only when all four artifacts agree on the column
//! layout and the declared input shape. Anything else fails closed.

use super::types::ModelBundle;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("invalid model key: {0}")]
    InvalidKey(String),

    #[error("no trained model for {0}")]
    Missing(String),

    #[error("incomplete model bundle for {key}: missing {missing:?}")]
    Incomplete { key: String, missing: Vec<String> },

    #[error("cannot parse {file}: {reason}")]
    Unparseable { file: String, reason: String },

    #[error("checksum mismatch for {file}")]
    ChecksumMismatch { file: String },

    #[error("inconsistent model bundle: {0}")]
    Inconsistent(String),

    #[error("artifact storage failed at '{path}': {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BundleError {
    /// Failures of the store itself rather than of the stored data
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, BundleError::Storage { .. } | BundleError::Encode(_))
    }

    pub(crate) fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        BundleError::Storage {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Mutual shape consistency of the four artifacts
pub fn check_bundle(bundle: &ModelBundle) -> Result<(), BundleError> {
    let inconsistent = |msg: String| Err(BundleError::Inconsistent(msg));

    if bundle.columns.is_empty() {
        return inconsistent("column set is empty".into());
    }
    bundle.model.check_consistency().map_err(BundleError::Inconsistent)?;
    bundle.scaler.check_consistency().map_err(BundleError::Inconsistent)?;
    bundle.threshold.check_consistency().map_err(BundleError::Inconsistent)?;

    if bundle.model.n_features != bundle.columns.len() {
        return inconsistent(format!(
            "model expects {} features, column set has {}",
            bundle.model.n_features,
            bundle.columns.len()
        ));
    }
    if bundle.model.sequence_length == 0 {
        return inconsistent("model declares sequence length 0".into());
    }
    if !bundle.scaler.columns.is_compatible(&bundle.columns) {
        return inconsistent(format!(
            "scaler columns {:?} differ from bundle columns {:?}",
            bundle.scaler.columns.names(),
            bundle.columns.names()
        ));
    }
    Ok(())
}
