//! Artifact Store
//!
//! Layout: `<root>/user_<user_id>/machine_<machine_id>/{model,scaler,columns,threshold}.json`
//! plus `training_stats.json` and `manifest.json`.
//!
//! Writes go to a sibling staging directory that is renamed over the live
//! one, so readers never see a half-written set. Reads verify presence,
//! manifest checksums and shape consistency, and fail closed otherwise.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::*;
use super::validate::{check_bundle, BundleError};
use crate::constants::APP_VERSION;

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn parse<T: DeserializeOwned>(file: &str, bytes: &[u8]) -> Result<T, BundleError> {
    serde_json::from_slice(bytes).map_err(|e| BundleError::Unparseable {
        file: file.to_string(),
        reason: e.to_string(),
    })
}

/// Load and verify the bundle stored in `dir`
pub fn load_bundle_dir(dir: &Path, label: &str) -> Result<ModelBundle, BundleError> {
    if !dir.is_dir() {
        return Err(BundleError::Missing(label.to_string()));
    }

    let missing: Vec<String> = REQUIRED_FILES
        .iter()
        .filter(|f| !dir.join(f).is_file())
        .map(|f| f.to_string())
        .collect();
    if missing.len() == REQUIRED_FILES.len() {
        return Err(BundleError::Missing(label.to_string()));
    }
    if !missing.is_empty() {
        return Err(BundleError::Incomplete {
            key: label.to_string(),
            missing,
        });
    }

    let mut contents: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
    for file in REQUIRED_FILES {
        let path = dir.join(file);
        let bytes = fs::read(&path).map_err(|e| BundleError::storage(&path, e))?;
        contents.insert(file, bytes);
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest: Option<BundleManifest> = if manifest_path.is_file() {
        let bytes = fs::read(&manifest_path).map_err(|e| BundleError::storage(&manifest_path, e))?;
        Some(parse(MANIFEST_FILE, &bytes)?)
    } else {
        log::warn!("No manifest for {}, skipping checksum verification", label);
        None
    };

    if let Some(manifest) = &manifest {
        for (file, bytes) in &contents {
            let matches = manifest
                .files
                .get(*file)
                .is_some_and(|expected| *expected == sha256_hex(bytes));
            if !matches {
                log::error!("Checksum mismatch for {} in {}", file, dir.display());
                return Err(BundleError::ChecksumMismatch { file: file.to_string() });
            }
        }
    }

    let bundle = ModelBundle {
        columns: parse(COLUMNS_FILE, &contents[COLUMNS_FILE])?,
        scaler: parse(SCALER_FILE, &contents[SCALER_FILE])?,
        model: parse(MODEL_FILE, &contents[MODEL_FILE])?,
        threshold: parse(THRESHOLD_FILE, &contents[THRESHOLD_FILE])?,
    };
    check_bundle(&bundle)?;

    if let Some(manifest) = &manifest {
        if manifest.layout_hash != bundle.layout_hash() {
            return Err(BundleError::Inconsistent(format!(
                "manifest layout hash {:08x} differs from columns {:08x}",
                manifest.layout_hash,
                bundle.layout_hash()
            )));
        }
    }

    log::info!(
        "Loaded model bundle {} ({} columns, L={}, threshold {:.6})",
        label,
        bundle.columns.len(),
        bundle.sequence_length(),
        bundle.threshold.threshold
    );
    Ok(bundle)
}

/// Filesystem store rooted at one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bundle_dir(&self, key: &ModelKey) -> PathBuf {
        self.root.join(key.user_dir_name()).join(key.machine_dir_name())
    }

    /// All required artifacts are present (not verified)
    #[cfg(test)]
    pub fn exists(&self, key: &ModelKey) -> bool {
        let dir = self.bundle_dir(key);
        REQUIRED_FILES.iter().all(|f| dir.join(f).is_file())
    }

    pub fn load(&self, key: &ModelKey) -> Result<ModelBundle, BundleError> {
        load_bundle_dir(&self.bundle_dir(key), &key.to_string())
    }

    /// Write a complete bundle, replacing any previous one for `key`
    pub fn save(
        &self,
        key: &ModelKey,
        bundle: &ModelBundle,
        report: &TrainingReport,
    ) -> Result<PathBuf, BundleError> {
        check_bundle(bundle)?;

        let live = self.bundle_dir(key);
        let parent = self.root.join(key.user_dir_name());
        fs::create_dir_all(&parent).map_err(|e| BundleError::storage(&parent, e))?;

        let staging = parent.join(format!(".staging-{}-{}", key.machine_dir_name(), Uuid::new_v4()));
        fs::create_dir(&staging).map_err(|e| BundleError::storage(&staging, e))?;

        if let Err(e) = write_artifacts(&staging, key, bundle, report) {
            discard(&staging);
            return Err(e);
        }

        swap_into_place(&staging, &live, &parent, key)?;
        log::info!("Model bundle for {} saved to {}", key, live.display());
        Ok(live)
    }
}

fn write_artifacts(
    dir: &Path,
    key: &ModelKey,
    bundle: &ModelBundle,
    report: &TrainingReport,
) -> Result<(), BundleError> {
    let artifacts: [(&str, Vec<u8>); 4] = [
        (MODEL_FILE, serde_json::to_vec(&bundle.model)?),
        (SCALER_FILE, serde_json::to_vec_pretty(&bundle.scaler)?),
        (COLUMNS_FILE, serde_json::to_vec_pretty(&bundle.columns)?),
        (THRESHOLD_FILE, serde_json::to_vec_pretty(&bundle.threshold)?),
    ];

    let mut files = BTreeMap::new();
    for (name, bytes) in &artifacts {
        let path = dir.join(name);
        fs::write(&path, bytes).map_err(|e| BundleError::storage(&path, e))?;
        files.insert(name.to_string(), sha256_hex(bytes));
    }

    let report_path = dir.join(REPORT_FILE);
    fs::write(&report_path, serde_json::to_vec_pretty(report)?)
        .map_err(|e| BundleError::storage(&report_path, e))?;

    // Manifest last
    let manifest = BundleManifest {
        version: MANIFEST_VERSION,
        user_id: key.user_id().to_string(),
        machine_id: key.machine_id().to_string(),
        layout_hash: bundle.layout_hash(),
        sequence_length: bundle.sequence_length(),
        feature_count: bundle.columns.len(),
        created_at: Utc::now().to_rfc3339(),
        app_version: APP_VERSION.to_string(),
        files,
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
        .map_err(|e| BundleError::storage(&manifest_path, e))?;
    Ok(())
}

/// Rename `staging` over `live`, keeping the old set until the swap succeeds
fn swap_into_place(staging: &Path, live: &Path, parent: &Path, key: &ModelKey) -> Result<(), BundleError> {
    let backup = parent.join(format!(".old-{}-{}", key.machine_dir_name(), Uuid::new_v4()));
    let had_live = live.exists();

    if had_live {
        if let Err(e) = fs::rename(live, &backup) {
            discard(staging);
            return Err(BundleError::storage(live, e));
        }
    }

    if let Err(e) = fs::rename(staging, live) {
        if had_live {
            if let Err(restore) = fs::rename(&backup, live) {
                log::error!("Could not restore previous bundle from {}: {}", backup.display(), restore);
            }
        }
        discard(staging);
        return Err(BundleError::storage(live, e));
    }

    if had_live {
        discard(&backup);
    }
    Ok(())
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        log::warn!("Could not remove {}: {}", dir.display(), e);
    }
}
