use std::fs;

use chrono::Utc;
use ndarray::Array2;
use tempfile::tempdir;

use super::types::*;
use super::{ArtifactStore, BundleError, ModelBundle, ModelKey, TrainingReport};
use crate::logic::config::PipelineConfig;
use crate::logic::features::{ScalerDecision, ScalerState, SensorColumnSet};
use crate::logic::model::autoencoder::WindowAutoencoder;
use crate::logic::model::threshold::calibrate;
use crate::logic::model::trainer::StartMode;

fn sample_bundle(seed: u64) -> ModelBundle {
    let columns = SensorColumnSet::from_names(["pressure", "temp"]);
    let matrix = Array2::from_shape_fn((20, 2), |(r, c)| (r + c * 3) as f64);
    ModelBundle {
        scaler: ScalerState::fit(&columns, matrix.view()).unwrap(),
        model: WindowAutoencoder::new(3, 2, 4, 2, seed),
        threshold: calibrate(&[0.1, 0.2, 0.3, 0.4], &PipelineConfig::default(), None).unwrap(),
        columns,
    }
}

fn sample_report(bundle: &ModelBundle) -> TrainingReport {
    TrainingReport {
        job_id: "job".into(),
        user_id: "u1".into(),
        machine_id: "m1".into(),
        final_loss: 0.1,
        final_val_loss: Some(0.2),
        epochs_trained: 5,
        epochs_planned: 5,
        best_epoch: 5,
        early_stopped: false,
        start_mode: StartMode::Cold,
        prior_source: None,
        scaler_decision: ScalerDecision::Fitted,
        training_samples: 10,
        validation_samples: 2,
        rows_used: 14,
        downsampled: false,
        training_duration: 1.0,
        avg_epoch_time: 0.2,
        threshold: bundle.threshold.clone(),
        sensor_columns: bundle.columns.names().to_vec(),
        dropped_columns: Vec::new(),
        layout_hash: bundle.layout_hash(),
        model_type: bundle.model.model_type.clone(),
        sequence_length: bundle.sequence_length(),
        parameter_count: bundle.model.parameter_count(),
        trained_at: Utc::now().to_rfc3339(),
    }
}

fn key() -> ModelKey {
    ModelKey::new("u1", "m1").unwrap()
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);

    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();
    assert_eq!(path, dir.path().join("user_u1").join("machine_m1"));
    for file in REQUIRED_FILES.iter().chain([REPORT_FILE, MANIFEST_FILE].iter()) {
        assert!(path.join(file).is_file(), "{} missing", file);
    }

    let loaded = store.load(&key()).unwrap();
    assert_eq!(loaded, bundle);
    let report: TrainingReport = serde_json::from_slice(&fs::read(path.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(report.epochs_trained, 5);
}

#[test]
fn test_columns_file_is_plain_array() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);
    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();

    let columns: Vec<String> =
        serde_json::from_str(&fs::read_to_string(path.join(COLUMNS_FILE)).unwrap()).unwrap();
    assert_eq!(columns, vec!["pressure", "temp"]);

    let threshold: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(path.join(THRESHOLD_FILE)).unwrap()).unwrap();
    assert!(threshold["threshold"].is_f64());
}

#[test]
fn test_missing_bundle() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    assert!(!store.exists(&key()));
    assert!(matches!(store.load(&key()), Err(BundleError::Missing(_))));
}

#[test]
fn test_partial_bundle_fails_closed() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);
    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();

    fs::remove_file(path.join(SCALER_FILE)).unwrap();
    match store.load(&key()) {
        Err(BundleError::Incomplete { missing, .. }) => assert_eq!(missing, vec![SCALER_FILE.to_string()]),
        other => panic!("expected Incomplete, got {:?}", other),
    }
}

#[test]
fn test_tampered_artifact_fails_checksum() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);
    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();

    fs::write(path.join(THRESHOLD_FILE), r#"{"threshold": 99.0}"#).unwrap();
    assert!(matches!(
        store.load(&key()),
        Err(BundleError::ChecksumMismatch { file }) if file == THRESHOLD_FILE
    ));
}

#[test]
fn test_inconsistent_artifacts_rejected_without_manifest() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);
    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();

    fs::remove_file(path.join(MANIFEST_FILE)).unwrap();
    fs::write(path.join(COLUMNS_FILE), r#"["pressure","temp","vibration"]"#).unwrap();
    assert!(matches!(store.load(&key()), Err(BundleError::Inconsistent(_))));
}

#[test]
fn test_unparseable_artifact() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let bundle = sample_bundle(1);
    let path = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap();

    fs::remove_file(path.join(MANIFEST_FILE)).unwrap();
    fs::write(path.join(MODEL_FILE), "not json").unwrap();
    assert!(matches!(store.load(&key()), Err(BundleError::Unparseable { .. })));
}

#[test]
fn test_retraining_supersedes_and_leaves_no_staging() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());

    let first = sample_bundle(1);
    store.save(&key(), &first, &sample_report(&first)).unwrap();
    let second = sample_bundle(2);
    store.save(&key(), &second, &sample_report(&second)).unwrap();

    assert_eq!(store.load(&key()).unwrap(), second);

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("user_u1"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(leftovers, vec!["machine_m1".to_string()]);
}

#[test]
fn test_inconsistent_bundle_never_written() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let mut bundle = sample_bundle(1);
    bundle.model = WindowAutoencoder::new(3, 5, 4, 2, 1);

    let err = store.save(&key(), &bundle, &sample_report(&bundle)).unwrap_err();
    assert!(matches!(err, BundleError::Inconsistent(_)));
    assert!(!store.bundle_dir(&key()).exists());
}

#[test]
fn test_keys_are_validated() {
    assert!(ModelKey::new("u1", "m1").is_ok());
    for (user, machine) in [("", "m"), ("u", " "), ("../x", "m"), ("u", "a/b"), ("u", "a\\b"), ("..", "m")] {
        assert!(
            matches!(ModelKey::new(user, machine), Err(BundleError::InvalidKey(_))),
            "{:?}/{:?} should be rejected",
            user,
            machine
        );
    }
}

#[test]
fn test_storage_failures_are_internal() {
    let err = BundleError::storage(std::path::Path::new("/x"), std::io::Error::other("disk"));
    assert!(err.is_storage_failure());
    assert!(!BundleError::Missing("k".into()).is_storage_failure());
}
