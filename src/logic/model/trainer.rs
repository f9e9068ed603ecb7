//! Training Loop
//!
//! The start decision (cold vs warm) is made before any fitting, from
//! whichever prior bundles are on hand. The loop itself runs mini-batch
//! epochs, holds out the trailing windows for validation, stops early on a
//! validation plateau and keeps the best parameters seen.

use std::time::Instant;

use ndarray::{s, ArrayView3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::autoencoder::{flatten, Adam, Reconstructor, WindowAutoencoder};
use crate::logic::bundle::ModelBundle;
use crate::logic::config::{ErrorMetric, PipelineConfig};
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::features::SensorColumnSet;

// ============================================================================
// START DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    Cold,
    Warm,
}

/// Where a warm-start prior came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorSource {
    /// The key's own previous bundle
    SameKey,
    /// The configured pretrained bundle directory
    Pretrained,
}

#[derive(Debug, Clone)]
pub enum StartDecision {
    ColdStart,
    WarmStart {
        source: PriorSource,
        prior: Box<ModelBundle>,
    },
}

impl StartDecision {
    /// First candidate with identical (L, F), column layout and error metric wins
    pub fn decide(
        candidates: Vec<(PriorSource, ModelBundle)>,
        sequence_length: usize,
        columns: &SensorColumnSet,
        metric: ErrorMetric,
    ) -> Self {
        for (source, bundle) in candidates {
            if bundle.threshold.metric != metric {
                log::info!(
                    "{:?} model calibrated with {:?}, run uses {:?}; not reusing it",
                    source,
                    bundle.threshold.metric,
                    metric
                );
                continue;
            }
            if bundle.is_compatible_with(sequence_length, columns) {
                log::info!("Warm start from {:?} model", source);
                return StartDecision::WarmStart {
                    source,
                    prior: Box::new(bundle),
                };
            }
            log::info!(
                "{:?} model not compatible (shape {:?} vs ({}, {}), layout {:08x} vs {:08x})",
                source,
                bundle.input_shape(),
                sequence_length,
                columns.len(),
                bundle.layout_hash(),
                columns.layout_hash()
            );
        }
        log::info!("Cold start");
        StartDecision::ColdStart
    }

    pub fn mode(&self) -> StartMode {
        match self {
            StartDecision::ColdStart => StartMode::Cold,
            StartDecision::WarmStart { .. } => StartMode::Warm,
        }
    }

    pub fn source(&self) -> Option<PriorSource> {
        match self {
            StartDecision::ColdStart => None,
            StartDecision::WarmStart { source, .. } => Some(*source),
        }
    }

    pub fn prior(&self) -> Option<&ModelBundle> {
        match self {
            StartDecision::ColdStart => None,
            StartDecision::WarmStart { prior, .. } => Some(prior.as_ref()),
        }
    }

    pub fn epochs(&self, config: &PipelineConfig) -> usize {
        match self {
            StartDecision::ColdStart => config.cold_epochs,
            StartDecision::WarmStart { .. } => config.warm_epochs,
        }
    }

    fn initial_model(&self, config: &PipelineConfig, sequence_length: usize, n_features: usize) -> WindowAutoencoder {
        match self {
            StartDecision::WarmStart { prior, .. } => prior.model.clone(),
            StartDecision::ColdStart => WindowAutoencoder::new(
                sequence_length,
                n_features,
                config.hidden_units,
                config.latent_units,
                config.seed,
            ),
        }
    }
}

// ============================================================================
// TRAINING LOOP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub total: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub improved: bool,
    pub elapsed_secs: f64,
}

/// Hooks the loop calls back into
pub trait TrainingObserver {
    /// After every mini-batch
    fn batch_finished(&mut self, _done: usize, _total: usize) {}

    /// After every epoch; an error aborts training
    fn epoch_finished(&mut self, report: &EpochReport) -> PipelineResult<()>;
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: WindowAutoencoder,
    pub epochs_planned: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub early_stopped: bool,
    pub final_loss: f64,
    pub final_val_loss: Option<f64>,
    pub train_windows: usize,
    pub val_windows: usize,
    pub duration_secs: f64,
}

impl TrainingOutcome {
    pub fn avg_epoch_secs(&self) -> f64 {
        self.duration_secs / self.epochs_run.max(1) as f64
    }
}

/// Trailing windows held out; 0 when fewer than 2 would remain for training
pub fn validation_count(windows: usize, fraction: f64) -> usize {
    let held = (windows as f64 * fraction).floor() as usize;
    if held == 0 || windows.saturating_sub(held) < 2 {
        0
    } else {
        held
    }
}

pub fn train_model(
    windows: ArrayView3<f64>,
    start: &StartDecision,
    config: &PipelineConfig,
    observer: &mut dyn TrainingObserver,
) -> PipelineResult<TrainingOutcome> {
    let (count, l, f) = windows.dim();
    if count == 0 {
        return Err(PipelineError::InsufficientData { rows: 0, required: l });
    }

    let started = Instant::now();
    let mut model = start.initial_model(config, l, f);
    let epochs = start.epochs(config);

    let flat = flatten(windows, (l, f))?;
    let val_windows = validation_count(count, config.validation_split);
    let train_windows = count - val_windows;
    let train = flat.slice(s![..train_windows, ..]);
    let val = (val_windows > 0).then(|| flat.slice(s![train_windows.., ..]));

    log::info!(
        "Training {:?} start: {} epochs, {} train / {} validation windows, layers {:?}",
        start.mode(),
        epochs,
        train_windows,
        val_windows,
        model.architecture()
    );

    let mut optimizer = Adam::new(&model, config.learning_rate);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut history: Vec<EpochReport> = Vec::with_capacity(epochs);
    let mut best: Option<(f64, usize, WindowAutoencoder)> = None;
    let mut since_best = 0usize;
    let mut early_stopped = false;

    for epoch in 1..=epochs {
        let epoch_start = Instant::now();
        let train_loss = model.train_epoch(
            train,
            config.batch_size,
            &mut optimizer,
            &mut rng,
            &mut |done, total| observer.batch_finished(done, total),
        );
        let val_loss = val.map(|v| model.loss(v));
        let monitored = val_loss.unwrap_or(train_loss);

        let improved = monitored.is_finite() && best.as_ref().map_or(true, |(b, _, _)| monitored < *b);
        if improved {
            best = Some((monitored, epoch, model.clone()));
            since_best = 0;
        } else {
            since_best += 1;
        }

        let report = EpochReport {
            epoch,
            total: epochs,
            train_loss,
            val_loss,
            improved,
            elapsed_secs: epoch_start.elapsed().as_secs_f64(),
        };
        log::info!(
            "Epoch {}/{} - loss {:.6}{}",
            epoch,
            epochs,
            train_loss,
            val_loss.map(|v| format!(", val_loss {:.6}", v)).unwrap_or_default()
        );
        observer.epoch_finished(&report)?;
        history.push(report);

        if !monitored.is_finite() {
            log::warn!("Loss became non-finite at epoch {}, stopping", epoch);
            break;
        }
        // patience 0 disables early stopping
        if val.is_some() && config.patience > 0 && since_best >= config.patience && epoch < epochs {
            log::info!("Early stopping at epoch {} (best epoch {})", epoch, epoch - since_best);
            early_stopped = true;
            break;
        }
    }

    let (_, best_epoch, best_model) = best.ok_or(PipelineError::DegenerateModel)?;
    let best_report = &history[best_epoch - 1];

    Ok(TrainingOutcome {
        model: best_model,
        epochs_planned: epochs,
        epochs_run: history.len(),
        best_epoch,
        early_stopped,
        final_loss: best_report.train_loss,
        final_val_loss: best_report.val_loss,
        train_windows,
        val_windows,
        duration_secs: started.elapsed().as_secs_f64(),
    })
}

/// Per-window errors of a trained model; all-non-finite means a degenerate model
pub fn reconstruction_errors(
    model: &dyn Reconstructor,
    windows: ArrayView3<f64>,
    config: &PipelineConfig,
    on_batch: &mut dyn FnMut(usize, usize),
) -> PipelineResult<Vec<f64>> {
    let errors = model.window_errors(windows, config.error_metric, config.error_batch_size, on_batch)?;
    if errors.is_empty() || errors.iter().all(|e| !e.is_finite()) {
        return Err(PipelineError::DegenerateModel);
    }
    Ok(errors)
}
