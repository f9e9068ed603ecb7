//! Pipeline Orchestration
//!
//! Drives one job through its stages, reporting progress as it goes.
//! Every `run_*` function emits exactly one terminal event on the reporter
//! it is given, success or failure, and returns the same outcome.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use super::bundle::{load_bundle_dir, ArtifactStore, BundleError, ModelBundle, ModelKey, TrainingReport};
use super::config::PipelineConfig;
use super::dataset::{cap_training_rows, load_scoring_frame, load_training_frame, LoadedFrame};
use super::error::{PipelineError, PipelineResult};
use super::events::Reporter;
use super::features::{build_windows, fit_or_reuse};
use super::job::{JobKind, JobStage, JobTracker};
use super::model::{
    calibrate, reconstruction_errors, score_frame, score_reading, train_model, EpochReport, PriorSource,
    ReadingScore, ScoreReport, StartDecision, TrainingObserver,
};

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub key: ModelKey,
    pub data_source: PathBuf,
    /// Explicit sensor columns; `None` auto-detects
    pub sensor_columns: Option<Vec<String>>,
    pub row_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub key: ModelKey,
    pub input_source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReadingRequest {
    pub key: ModelKey,
    pub reading: BTreeMap<String, f64>,
}

// ============================================================================
// JOB WRAPPERS
// ============================================================================

/// Train (or fine-tune) and persist the bundle for `request.key`
pub fn run_training(
    request: &TrainRequest,
    config: &PipelineConfig,
    store: &ArtifactStore,
    reporter: &Reporter,
) -> PipelineResult<TrainingReport> {
    let mut tracker = JobTracker::new(JobKind::Training);
    log::info!("Training job {} for {}", tracker.job_id(), request.key);

    match train_job(request, config, store, reporter, &mut tracker) {
        Ok((report, stats)) => {
            reporter.complete_training(
                format!(
                    "Training complete: {} epochs, threshold {:.6}",
                    report.epochs_trained, report.threshold.threshold
                ),
                stats,
            );
            Ok(report)
        }
        Err(e) => {
            fail_job(&mut tracker, reporter, &e);
            Err(e)
        }
    }
}

/// Score a telemetry file against the stored bundle
pub fn run_inference(
    request: &PredictRequest,
    config: &PipelineConfig,
    store: &ArtifactStore,
    reporter: &Reporter,
) -> PipelineResult<ScoreReport> {
    let mut tracker = JobTracker::new(JobKind::Inference);
    log::info!("Inference job {} for {}", tracker.job_id(), request.key);

    match inference_job(request, config, store, reporter, &mut tracker) {
        Ok((score, predictions)) => {
            reporter.complete_inference(
                format!(
                    "Analysis complete: {} of {} windows anomalous",
                    score.anomaly_count, score.total_windows
                ),
                predictions,
            );
            Ok(score)
        }
        Err(e) => {
            fail_job(&mut tracker, reporter, &e);
            Err(e)
        }
    }
}

/// Score a single reading against the stored bundle
pub fn run_reading_inference(
    request: &ReadingRequest,
    store: &ArtifactStore,
    reporter: &Reporter,
) -> PipelineResult<ReadingScore> {
    let mut tracker = JobTracker::new(JobKind::ReadingInference);
    log::info!("Reading inference job {} for {}", tracker.job_id(), request.key);

    match reading_job(request, store, reporter, &mut tracker) {
        Ok((score, predictions)) => {
            reporter.complete_inference(
                if score.is_anomaly {
                    "Reading is anomalous"
                } else {
                    "Reading is normal"
                },
                predictions,
            );
            Ok(score)
        }
        Err(e) => {
            fail_job(&mut tracker, reporter, &e);
            Err(e)
        }
    }
}

fn fail_job(tracker: &mut JobTracker, reporter: &Reporter, e: &PipelineError) {
    log::error!("{:?} job {} failed during {}", tracker.kind(), tracker.job_id(), tracker.stage());
    tracker.fail();
    reporter.fail(e);
}

// ============================================================================
// TRAINING
// ============================================================================

/// Maps epochs onto `Training{epoch,total}` stages and heartbeats
struct ProgressObserver<'r, 'a> {
    reporter: &'r Reporter<'a>,
    tracker: &'r mut JobTracker,
}

impl TrainingObserver for ProgressObserver<'_, '_> {
    fn batch_finished(&mut self, _done: usize, _total: usize) {
        self.reporter.heartbeat_if_due();
    }

    fn epoch_finished(&mut self, report: &EpochReport) -> PipelineResult<()> {
        let progress = self.tracker.advance(JobStage::Training {
            epoch: report.epoch,
            total: report.total,
        })?;
        let val = report
            .val_loss
            .map(|v| format!(", val_loss {:.6}", v))
            .unwrap_or_default();
        self.reporter.progress(
            progress,
            format!("Epoch {}/{} - loss {:.6}{}", report.epoch, report.total, report.train_loss, val),
        );
        self.reporter.heartbeat();
        Ok(())
    }
}

/// Prior bundles in preference order: the key's own, then the pretrained dir.
/// Unreadable priors are skipped, never fatal.
fn prior_candidates(key: &ModelKey, config: &PipelineConfig, store: &ArtifactStore) -> Vec<(PriorSource, ModelBundle)> {
    let mut candidates = Vec::new();

    match store.load(key) {
        Ok(bundle) => candidates.push((PriorSource::SameKey, bundle)),
        Err(BundleError::Missing(_)) => log::debug!("No previous model for {}", key),
        Err(e) => log::warn!("Ignoring previous model for {}: {}", key, e),
    }

    if let Some(dir) = &config.pretrained_dir {
        match load_bundle_dir(dir, "pretrained") {
            Ok(bundle) => candidates.push((PriorSource::Pretrained, bundle)),
            Err(e) => log::warn!("Pretrained model at {} not usable: {}", dir.display(), e),
        }
    }
    candidates
}

fn train_job(
    request: &TrainRequest,
    config: &PipelineConfig,
    store: &ArtifactStore,
    reporter: &Reporter,
    tracker: &mut JobTracker,
) -> PipelineResult<(TrainingReport, serde_json::Value)> {
    reporter.progress(tracker.progress(), format!("Initializing training for {}", request.key));
    config.validate()?;
    let len = config.sequence_length;

    // --- Loading ---
    let progress = tracker.advance(JobStage::Loading)?;
    reporter.progress(progress, format!("Loading data from {}", request.data_source.display()));
    let loaded = load_training_frame(
        &request.data_source,
        request.sensor_columns.as_deref(),
        config.load_limits(request.row_limit),
        config.chunk_size,
        config.fallback_columns,
    )?;
    report_load(reporter, &loaded);
    let LoadedFrame { frame, schema, .. } = loaded;

    // --- Preprocessing ---
    let progress = tracker.advance(JobStage::Preprocessing)?;
    reporter.progress(
        progress,
        format!("Preprocessing {} rows x {} sensors", frame.n_rows(), frame.columns().len()),
    );
    let (frame, downsampled) = cap_training_rows(frame, config.max_training_rows, config.recent_fraction);
    if downsampled {
        reporter.info(format!("Downsampled to {} rows", frame.n_rows()));
    }
    if frame.n_rows() < len {
        return Err(PipelineError::InsufficientData {
            rows: frame.n_rows(),
            required: len,
        });
    }

    let start = StartDecision::decide(
        prior_candidates(&request.key, config, store),
        len,
        frame.columns(),
        config.error_metric,
    );
    let prior_scaler = start
        .prior()
        .filter(|_| config.reuse_prior_scaler)
        .map(|bundle| &bundle.scaler);
    let (scaler, scaler_decision) = fit_or_reuse(prior_scaler, frame.columns(), frame.values())?;
    let scaled = scaler.apply(frame.values())?;

    // --- Window building ---
    let progress = tracker.advance(JobStage::WindowBuilding)?;
    let windows = build_windows(scaled.view(), len)?;
    reporter.progress(progress, format!("Created {} windows of length {}", windows.len_of(ndarray::Axis(0)), len));

    // --- Training ---
    match start.source() {
        Some(source) => reporter.info(format!("Fine-tuning {:?} model", source)),
        None => reporter.info("Training new model"),
    }
    let outcome = {
        let mut observer = ProgressObserver { reporter, tracker: &mut *tracker };
        train_model(windows.view(), &start, config, &mut observer)?
    };
    if outcome.early_stopped {
        reporter.info(format!(
            "Early stopping after {} epochs (best epoch {})",
            outcome.epochs_run, outcome.best_epoch
        ));
    }

    // --- Threshold calibration ---
    let progress = tracker.advance(JobStage::ThresholdCalibration)?;
    reporter.progress(progress, "Calibrating anomaly threshold");
    let errors = reconstruction_errors(&outcome.model, windows.view(), config, &mut |_, _| {
        reporter.heartbeat_if_due()
    })?;
    let prior_threshold = start.prior().map(|bundle| bundle.threshold.threshold);
    let threshold = calibrate(&errors, config, prior_threshold)?;
    if prior_threshold.is_some() && !threshold.blended {
        reporter.warning("New threshold differs too much from the prior one, blending skipped");
    }

    // --- Persisting ---
    let progress = tracker.advance(JobStage::Persisting)?;
    reporter.progress(progress, "Saving model");
    let avg_epoch_time = outcome.avg_epoch_secs();
    let bundle = ModelBundle {
        columns: frame.columns().clone(),
        scaler,
        model: outcome.model,
        threshold,
    };
    let report = TrainingReport {
        job_id: tracker.job_id().to_string(),
        user_id: request.key.user_id().to_string(),
        machine_id: request.key.machine_id().to_string(),
        final_loss: outcome.final_loss,
        final_val_loss: outcome.final_val_loss,
        epochs_trained: outcome.epochs_run,
        epochs_planned: outcome.epochs_planned,
        best_epoch: outcome.best_epoch,
        early_stopped: outcome.early_stopped,
        start_mode: start.mode(),
        prior_source: start.source(),
        scaler_decision,
        training_samples: outcome.train_windows,
        validation_samples: outcome.val_windows,
        rows_used: frame.n_rows(),
        downsampled,
        training_duration: outcome.duration_secs,
        avg_epoch_time,
        threshold: bundle.threshold.clone(),
        sensor_columns: bundle.columns.names().to_vec(),
        dropped_columns: schema.dropped.clone(),
        layout_hash: bundle.layout_hash(),
        model_type: bundle.model.model_type.clone(),
        sequence_length: len,
        parameter_count: bundle.model.parameter_count(),
        trained_at: Utc::now().to_rfc3339(),
    };
    let path = store.save(&request.key, &bundle, &report)?;
    reporter.success(format!("Model saved to {}", path.display()));

    let mut stats = serde_json::to_value(&report)?;
    if let Some(map) = stats.as_object_mut() {
        map.insert("model_path".into(), path.display().to_string().into());
    }

    tracker.advance(JobStage::Completed)?;
    Ok((report, stats))
}

fn report_load(reporter: &Reporter, loaded: &LoadedFrame) {
    let summary = loaded.summary();
    if summary.read.truncated_by_bytes {
        reporter.warning(format!("Input truncated at byte budget after {} rows", summary.read.rows_read));
    }
    if summary.read.truncated_by_rows {
        reporter.info(format!("Row limit reached, using first {} rows", summary.read.rows_read));
    }
    if !loaded.schema.dropped.is_empty() {
        reporter.warning(format!("Columns not usable as sensors: {}", loaded.schema.dropped.join(", ")));
    }
    if summary.cleaning.cells_filled() > 0 {
        reporter.info(format!("Filled {} missing values", summary.cleaning.cells_filled()));
    }
    reporter.info(format!(
        "Using {} sensor columns: {}",
        summary.columns,
        loaded.frame.columns().names().join(", ")
    ));
}

// ============================================================================
// INFERENCE
// ============================================================================

fn inference_job(
    request: &PredictRequest,
    config: &PipelineConfig,
    store: &ArtifactStore,
    reporter: &Reporter,
    tracker: &mut JobTracker,
) -> PipelineResult<(ScoreReport, serde_json::Value)> {
    reporter.progress(tracker.progress(), format!("Loading model for {}", request.key));
    let bundle = store.load(&request.key)?;

    let progress = tracker.advance(JobStage::Loading)?;
    reporter.progress(progress, format!("Loading data from {}", request.input_source.display()));
    let loaded = load_scoring_frame(
        &request.input_source,
        &bundle.columns,
        config.load_limits(None),
        config.chunk_size,
    )?;
    if !loaded.schema.dropped.is_empty() {
        reporter.warning(format!(
            "Input lacks trained columns, filled with 0: {}",
            loaded.schema.dropped.join(", ")
        ));
    }

    let progress = tracker.advance(JobStage::Preprocessing)?;
    reporter.progress(progress, format!("Preprocessing {} rows", loaded.frame.n_rows()));

    let progress = tracker.advance(JobStage::WindowBuilding)?;
    reporter.progress(progress, format!("Building windows of length {}", bundle.sequence_length()));
    if loaded.frame.n_rows() < bundle.sequence_length() {
        reporter.warning(format!(
            "Only {} rows, fewer than one window; every row scores 0",
            loaded.frame.n_rows()
        ));
    }

    let progress = tracker.advance(JobStage::Scoring)?;
    reporter.progress(progress, "Scoring windows");
    let score = score_frame(&bundle, &loaded.frame, config, &mut |_, _| reporter.heartbeat_if_due())?;

    let mut predictions = serde_json::to_value(&score)?;
    if let Some(map) = predictions.as_object_mut() {
        map.insert("data".into(), serde_json::to_value(loaded.summary())?);
    }

    tracker.advance(JobStage::Completed)?;
    Ok((score, predictions))
}

fn reading_job(
    request: &ReadingRequest,
    store: &ArtifactStore,
    reporter: &Reporter,
    tracker: &mut JobTracker,
) -> PipelineResult<(ReadingScore, serde_json::Value)> {
    reporter.progress(tracker.progress(), format!("Loading model for {}", request.key));
    let bundle = store.load(&request.key)?;

    let progress = tracker.advance(JobStage::Preprocessing)?;
    reporter.progress(progress, format!("Preparing reading with {} fields", request.reading.len()));

    let progress = tracker.advance(JobStage::WindowBuilding)?;
    reporter.progress(
        progress,
        format!("Repeating reading into a window of length {}", bundle.sequence_length()),
    );

    let progress = tracker.advance(JobStage::Scoring)?;
    reporter.progress(progress, "Scoring reading");
    let score = score_reading(&bundle, &request.reading)?;
    if !score.missing_columns.is_empty() {
        reporter.warning(format!(
            "Reading lacks trained columns, filled with 0: {}",
            score.missing_columns.join(", ")
        ));
    }

    let predictions = serde_json::to_value(&score)?;
    tracker.advance(JobStage::Completed)?;
    Ok((score, predictions))
}
