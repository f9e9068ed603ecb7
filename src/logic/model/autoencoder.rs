//! Window Autoencoder
//!
//! Dense autoencoder over flattened windows:
//!
//! ```text
//! input L·F → hidden (ReLU) → latent (ReLU) → hidden (ReLU) → output L·F (linear)
//! ```
//!
//! Trained with mini-batch Adam on mean squared reconstruction error.
//! Weights use seeded Xavier-uniform init so a fixed seed gives a fixed model.

use ndarray::{Array, Array1, Array2, ArrayView2, ArrayView3, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::MODEL_TYPE;
use crate::logic::config::ErrorMetric;
use crate::logic::error::{PipelineError, PipelineResult};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

// ============================================================================
// RECONSTRUCTOR TRAIT
// ============================================================================

/// Anything that maps windows to same-shaped reconstructions
pub trait Reconstructor {
    /// Declared input shape (sequence length, feature count)
    fn input_shape(&self) -> (usize, usize);

    /// Reconstruct a batch of flattened windows `[batch, L·F]`
    fn reconstruct_flat(&self, batch: ArrayView2<f64>) -> Array2<f64>;

    fn name(&self) -> &str;

    /// One error per window, averaged over window and feature axes.
    /// `on_batch(done, total)` is called after every batch.
    fn window_errors(
        &self,
        windows: ArrayView3<f64>,
        metric: ErrorMetric,
        batch_size: usize,
        on_batch: &mut dyn FnMut(usize, usize),
    ) -> PipelineResult<Vec<f64>> {
        let flat = flatten(windows, self.input_shape())?;
        let total = flat.nrows();
        let mut errors = Vec::with_capacity(total);

        for (start, chunk) in batch_ranges(total, batch_size) {
            let batch = flat.slice(ndarray::s![start..start + chunk, ..]);
            let rec = self.reconstruct_flat(batch);
            for (orig, recon) in batch.outer_iter().zip(rec.outer_iter()) {
                let n = orig.len() as f64;
                let err = match metric {
                    ErrorMetric::Mse => {
                        orig.iter().zip(recon.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n
                    }
                    ErrorMetric::Mae => {
                        orig.iter().zip(recon.iter()).map(|(a, b)| (a - b).abs()).sum::<f64>() / n
                    }
                };
                errors.push(err);
            }
            on_batch(start + chunk, total);
        }
        Ok(errors)
    }
}

/// `[count, L, F]` → `[count, L·F]`, checking the declared shape
pub fn flatten(windows: ArrayView3<f64>, shape: (usize, usize)) -> PipelineResult<Array2<f64>> {
    let (count, l, f) = windows.dim();
    if (l, f) != shape {
        return Err(PipelineError::ShapeMismatch(format!(
            "windows are {}x{}, model expects {}x{}",
            l, f, shape.0, shape.1
        )));
    }
    windows
        .to_shape((count, l * f))
        .map(|v| v.to_owned())
        .map_err(|e| PipelineError::ShapeMismatch(e.to_string()))
}

/// `(start, len)` pairs covering `0..total`
pub fn batch_ranges(total: usize, batch_size: usize) -> impl Iterator<Item = (usize, usize)> {
    let step = batch_size.max(1);
    (0..total).step_by(step).map(move |s| (s, step.min(total - s)))
}

// ============================================================================
// LAYERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `[inputs, outputs]`
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    fn xavier(inputs: usize, outputs: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let weights = Array2::from_shape_simple_fn((inputs, outputs), || rng.gen_range(-limit..limit));
        Self {
            weights,
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    /// (pre-activation, activation)
    fn forward(&self, x: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let z = x.dot(&self.weights) + &self.bias;
        let a = self.activation.apply(&z);
        (z, a)
    }
}

// ============================================================================
// AUTOENCODER
// ============================================================================

/// Trained parameters plus declared input shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAutoencoder {
    pub model_type: String,
    pub sequence_length: usize,
    pub n_features: usize,
    pub layers: Vec<DenseLayer>,
}

type LayerGrads = Vec<(Array2<f64>, Array1<f64>)>;

impl WindowAutoencoder {
    pub fn new(sequence_length: usize, n_features: usize, hidden: usize, latent: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let input = sequence_length * n_features;
        let dims = [
            (input, hidden, Activation::Relu),
            (hidden, latent, Activation::Relu),
            (latent, hidden, Activation::Relu),
            (hidden, input, Activation::Linear),
        ];
        let layers = dims
            .iter()
            .map(|&(i, o, act)| DenseLayer::xavier(i, o, act, &mut rng))
            .collect();

        Self {
            model_type: MODEL_TYPE.to_string(),
            sequence_length,
            n_features,
            layers,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.sequence_length * self.n_features
    }

    /// Layer widths, input first
    pub fn architecture(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self.layers.first().map(|l| vec![l.inputs()]).unwrap_or_default();
        dims.extend(self.layers.iter().map(|l| l.outputs()));
        dims
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.weights.len() + l.bias.len()).sum()
    }

    /// Layer chain and declared shape agree; every parameter is finite
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("model has no layers".into());
        }
        let input = self.input_dim();
        if input == 0 {
            return Err("model declares an empty input shape".into());
        }
        let mut width = input;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.inputs() != width {
                return Err(format!("layer {} expects {} inputs, previous layer gives {}", i, layer.inputs(), width));
            }
            if layer.bias.len() != layer.outputs() {
                return Err(format!("layer {} bias has {} entries for {} outputs", i, layer.bias.len(), layer.outputs()));
            }
            width = layer.outputs();
        }
        if width != input {
            return Err(format!("model output width {} differs from input width {}", width, input));
        }
        let finite = self
            .layers
            .iter()
            .all(|l| l.weights.iter().chain(l.bias.iter()).all(|v| v.is_finite()));
        if !finite {
            return Err("model parameters contain NaN/Inf".into());
        }
        Ok(())
    }

    fn forward_all(&self, x: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut pre = Vec::with_capacity(self.layers.len());
        activations.push(x.clone());
        for layer in &self.layers {
            let (z, a) = layer.forward(&activations[activations.len() - 1]);
            pre.push(z);
            activations.push(a);
        }
        (pre, activations)
    }

    /// Mean squared reconstruction error of a flat batch
    pub fn loss(&self, batch: ArrayView2<f64>) -> f64 {
        let rec = self.reconstruct_flat(batch);
        let n = batch.len().max(1) as f64;
        (&rec - &batch).mapv(|d| d * d).sum() / n
    }

    /// Loss and per-layer gradients by backprop
    fn gradients(&self, batch: ArrayView2<f64>) -> (f64, LayerGrads) {
        let x = batch.to_owned();
        let (pre, activations) = self.forward_all(&x);

        let diff = &activations[activations.len() - 1] - &x;
        let n = diff.len().max(1) as f64;
        let loss = diff.mapv(|d| d * d).sum() / n;

        let mut grad = diff * (2.0 / n);
        let mut grads: LayerGrads = Vec::with_capacity(self.layers.len());
        for (k, layer) in self.layers.iter().enumerate().rev() {
            let dz = match layer.activation {
                Activation::Linear => grad,
                Activation::Relu => grad * pre[k].mapv(|z| if z > 0.0 { 1.0 } else { 0.0 }),
            };
            let dw = activations[k].t().dot(&dz);
            let db = dz.sum_axis(Axis(0));
            grad = dz.dot(&layer.weights.t());
            grads.push((dw, db));
        }
        grads.reverse();
        (loss, grads)
    }

    /// One Adam step on a flat batch; returns the pre-step loss
    pub fn train_batch(&mut self, batch: ArrayView2<f64>, optimizer: &mut Adam) -> f64 {
        let (loss, grads) = self.gradients(batch);
        if loss.is_finite() {
            optimizer.step(self, grads);
        }
        loss
    }

    /// One pass over `flat` in shuffled mini-batches; returns mean batch loss
    pub fn train_epoch(
        &mut self,
        flat: ArrayView2<f64>,
        batch_size: usize,
        optimizer: &mut Adam,
        rng: &mut StdRng,
        on_batch: &mut dyn FnMut(usize, usize),
    ) -> f64 {
        let total = flat.nrows();
        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(rng);

        let mut weighted = 0.0;
        for (start, chunk) in batch_ranges(total, batch_size) {
            let batch = flat.select(Axis(0), &order[start..start + chunk]);
            let loss = self.train_batch(batch.view(), optimizer);
            weighted += loss * chunk as f64;
            on_batch(start + chunk, total);
        }
        weighted / total.max(1) as f64
    }
}

impl Reconstructor for WindowAutoencoder {
    fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.n_features)
    }

    fn reconstruct_flat(&self, batch: ArrayView2<f64>) -> Array2<f64> {
        let mut x = batch.to_owned();
        for layer in &self.layers {
            x = layer.forward(&x).1;
        }
        x
    }

    fn name(&self) -> &str {
        &self.model_type
    }
}

// ============================================================================
// OPTIMIZER
// ============================================================================

/// Adam with per-parameter first/second moment estimates
pub struct Adam {
    learning_rate: f64,
    step: i32,
    m: LayerGrads,
    v: LayerGrads,
}

impl Adam {
    pub fn new(model: &WindowAutoencoder, learning_rate: f64) -> Self {
        let zeros = || -> LayerGrads {
            model
                .layers
                .iter()
                .map(|l| (Array2::zeros(l.weights.dim()), Array1::zeros(l.bias.dim())))
                .collect()
        };
        Self {
            learning_rate,
            step: 0,
            m: zeros(),
            v: zeros(),
        }
    }

    fn step(&mut self, model: &mut WindowAutoencoder, grads: LayerGrads) {
        self.step += 1;
        let c1 = 1.0 - ADAM_BETA1.powi(self.step);
        let c2 = 1.0 - ADAM_BETA2.powi(self.step);
        let lr = self.learning_rate;

        for (((layer, (gw, gb)), (mw, mb)), (vw, vb)) in model
            .layers
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            adam_update(&mut layer.weights, &gw, mw, vw, lr, c1, c2);
            adam_update(&mut layer.bias, &gb, mb, vb, lr, c1, c2);
        }
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr: f64,
    c1: f64,
    c2: f64,
) {
    Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
        let m_hat = *m / c1;
        let v_hat = *v / c2;
        *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sine_windows(count: usize, l: usize, f: usize) -> Array3<f64> {
        Array3::from_shape_fn((count, l, f), |(w, t, c)| (((w + t) as f64) * 0.3 + c as f64).sin())
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = WindowAutoencoder::new(4, 2, 16, 4, 7);
        let b = WindowAutoencoder::new(4, 2, 16, 4, 7);
        let c = WindowAutoencoder::new(4, 2, 16, 4, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_architecture_and_consistency() {
        let model = WindowAutoencoder::new(10, 3, 32, 8, 1);
        assert_eq!(model.architecture(), vec![30, 32, 8, 32, 30]);
        assert_eq!(model.input_shape(), (10, 3));
        assert!(model.check_consistency().is_ok());

        let mut broken = model.clone();
        broken.n_features = 4;
        assert!(broken.check_consistency().is_err());
    }

    #[test]
    fn test_reconstruction_keeps_shape() {
        let model = WindowAutoencoder::new(5, 2, 8, 3, 1);
        let flat = flatten(sine_windows(13, 5, 2).view(), (5, 2)).unwrap();
        let rec = model.reconstruct_flat(flat.view());
        assert_eq!(rec.dim(), (13, 10));
        assert_eq!(model.name(), MODEL_TYPE);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let model = WindowAutoencoder::new(5, 2, 8, 3, 1);
        let windows = sine_windows(3, 5, 3);
        let err = model
            .window_errors(windows.view(), ErrorMetric::Mse, 4, &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch(_)));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut model = WindowAutoencoder::new(4, 2, 16, 4, 3);
        let windows = sine_windows(64, 4, 2);
        let flat = flatten(windows.view(), (4, 2)).unwrap();
        let before = model.loss(flat.view());

        let mut adam = Adam::new(&model, 1e-2);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..60 {
            model.train_epoch(flat.view(), 16, &mut adam, &mut rng, &mut |_, _| {});
        }
        let after = model.loss(flat.view());
        assert!(after < before, "loss {} should drop below {}", after, before);
    }

    #[test]
    fn test_window_errors_batches() {
        let model = WindowAutoencoder::new(3, 1, 4, 2, 1);
        let windows = sine_windows(450, 3, 1);
        let mut calls = Vec::new();
        let errors = model
            .window_errors(windows.view(), ErrorMetric::Mse, 200, &mut |done, total| {
                calls.push((done, total))
            })
            .unwrap();
        assert_eq!(errors.len(), 450);
        assert_eq!(calls, vec![(200, 450), (400, 450), (450, 450)]);
        assert!(errors.iter().all(|e| e.is_finite() && *e >= 0.0));
    }

    #[test]
    fn test_serde_round_trip_preserves_outputs() {
        let model = WindowAutoencoder::new(3, 2, 6, 2, 11);
        let json = serde_json::to_string(&model).unwrap();
        let back: WindowAutoencoder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }
}
