use log::{debug, info};
use ndarray::{s, Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Activation {
    ReLU,
    Linear,
}

impl Activation {
    fn forward(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(relu),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(z.dim()),
        }
    }
}

/// Layer sizes and optimiser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub input_size: usize,
    pub hidden_layers: Vec<usize>,
    pub output_size: usize,
    pub learning_rate: f64,
}

/// Fully connected layer: output = activation(input · weights + biases)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero biases.
    pub fn new<R: Rng>(input_size: usize, output_size: usize, activation: Activation, rng: &mut R) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        let weights = Array2::from_shape_fn((input_size, output_size), |_| rng.gen_range(-limit..limit));
        Self {
            weights,
            biases: Array1::zeros(output_size),
            activation,
        }
    }

    fn linear(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.biases
    }

    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

/// Adam state for one layer.
#[derive(Debug, Clone)]
struct AdamState {
    t: i32,
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

impl AdamState {
    fn for_layer(layer: &DenseLayer) -> Self {
        Self {
            t: 0,
            m_w: Array2::zeros(layer.weights.dim()),
            v_w: Array2::zeros(layer.weights.dim()),
            m_b: Array1::zeros(layer.biases.len()),
            v_b: Array1::zeros(layer.biases.len()),
        }
    }

    fn step(&mut self, layer: &mut DenseLayer, grad_w: &Array2<f64>, grad_b: &Array1<f64>, lr: f64) {
        self.t += 1;
        let correction1 = 1.0 - BETA1.powi(self.t);
        let correction2 = 1.0 - BETA2.powi(self.t);

        self.m_w = &self.m_w * BETA1 + grad_w * (1.0 - BETA1);
        self.v_w = &self.v_w * BETA2 + &(grad_w * grad_w) * (1.0 - BETA2);
        let m_hat = &self.m_w / correction1;
        let v_hat = &self.v_w / correction2;
        layer.weights = &layer.weights - &(m_hat * lr / (v_hat.mapv(f64::sqrt) + EPSILON));

        self.m_b = &self.m_b * BETA1 + grad_b * (1.0 - BETA1);
        self.v_b = &self.v_b * BETA2 + &(grad_b * grad_b) * (1.0 - BETA2);
        let m_hat = &self.m_b / correction1;
        let v_hat = &self.v_b / correction2;
        layer.biases = &layer.biases - &(m_hat * lr / (v_hat.mapv(f64::sqrt) + EPSILON));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of the training rows, taken from the end, held out for validation
    pub validation_split: f64,
}

/// Per-epoch loss (MSE) and MAE for the training and validation rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub mae: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_mae: Vec<f64>,
}

/// Feed-forward regression network trained with Adam on MSE.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    config: NetworkConfig,
    layers: Vec<DenseLayer>,
    optimizer: Vec<AdamState>,
    rng: ChaCha8Rng,
}

impl NeuralNetwork {
    /// Creates a network with ReLU hidden layers and a linear output layer.
    pub fn new(config: NetworkConfig, seed: u64) -> Result<Self> {
        if config.input_size == 0 || config.output_size == 0 {
            return Err(AnalysisError::InvalidParameter(
                "network needs at least one input and one output".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut sizes = vec![config.input_size];
        sizes.extend(&config.hidden_layers);
        sizes.push(config.output_size);

        let n_layers = sizes.len() - 1;
        let layers: Vec<DenseLayer> = (0..n_layers)
            .map(|i| {
                let activation = if i + 1 == n_layers {
                    Activation::Linear
                } else {
                    Activation::ReLU
                };
                DenseLayer::new(sizes[i], sizes[i + 1], activation, &mut rng)
            })
            .collect();
        let optimizer = layers.iter().map(AdamState::for_layer).collect();

        Ok(Self {
            config,
            layers,
            optimizer,
            rng,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(x)?;
        let mut output = x.clone();
        for layer in &self.layers {
            output = layer.activation.forward(&layer.linear(&output));
        }
        Ok(output)
    }

    /// Returns `(loss, mae)` on the given rows.
    pub fn evaluate(&self, x: &Array2<f64>, y: &Array2<f64>) -> Result<(f64, f64)> {
        self.check_targets(x, y)?;
        let predictions = self.predict(x)?;
        Ok(loss_and_mae(&predictions, y))
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>, options: FitOptions) -> Result<TrainingHistory> {
        self.check_targets(x, y)?;
        if options.epochs == 0 || options.batch_size == 0 {
            return Err(AnalysisError::InvalidParameter(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&options.validation_split) {
            return Err(AnalysisError::InvalidParameter(format!(
                "validation_split must be in [0, 1), got {}",
                options.validation_split
            )));
        }

        // Hold out the tail of the training rows for validation
        let n = x.nrows();
        let split_at = (n as f64 * (1.0 - options.validation_split)).floor() as usize;
        if split_at == 0 {
            return Err(AnalysisError::EmptyDataset("no rows left for training".to_string()));
        }
        let x_train = x.slice(s![..split_at, ..]).to_owned();
        let y_train = y.slice(s![..split_at, ..]).to_owned();
        let x_val = x.slice(s![split_at.., ..]).to_owned();
        let y_val = y.slice(s![split_at.., ..]).to_owned();

        info!(
            "Training on {} rows, validating on {} rows",
            x_train.nrows(),
            x_val.nrows()
        );

        let mut history = TrainingHistory::default();
        for epoch in 0..options.epochs {
            let (loss, mae) = self.train_epoch(&x_train, &y_train, options.batch_size);
            history.loss.push(loss);
            history.mae.push(mae);

            if x_val.nrows() > 0 {
                let (val_loss, val_mae) = loss_and_mae(&self.predict(&x_val)?, &y_val);
                history.val_loss.push(val_loss);
                history.val_mae.push(val_mae);
                info!(
                    "Epoch {}/{} - loss: {:.6} - mae: {:.6} - val_loss: {:.6} - val_mae: {:.6}",
                    epoch + 1,
                    options.epochs,
                    loss,
                    mae,
                    val_loss,
                    val_mae
                );
            } else {
                info!(
                    "Epoch {}/{} - loss: {:.6} - mae: {:.6}",
                    epoch + 1,
                    options.epochs,
                    loss,
                    mae
                );
            }
        }

        Ok(history)
    }

    fn train_epoch(&mut self, x: &Array2<f64>, y: &Array2<f64>, batch_size: usize) -> (f64, f64) {
        let n = x.nrows();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);

        let mut loss_sum = 0.0;
        let mut mae_sum = 0.0;
        for (batch_idx, batch) in order.chunks(batch_size).enumerate() {
            let x_batch = x.select(Axis(0), batch);
            let y_batch = y.select(Axis(0), batch);
            let (loss, mae) = self.train_batch(&x_batch, &y_batch);
            loss_sum += loss * batch.len() as f64;
            mae_sum += mae * batch.len() as f64;
            debug!("batch {}: loss {:.6}", batch_idx, loss);
        }

        (loss_sum / n as f64, mae_sum / n as f64)
    }

    /// One forward/backward pass; returns the batch loss and MAE before the update.
    fn train_batch(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> (f64, f64) {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut output = x.clone();
        for layer in &self.layers {
            let z = layer.linear(&output);
            let a = layer.activation.forward(&z);
            inputs.push(output);
            pre_activations.push(z);
            output = a;
        }

        let metrics = loss_and_mae(&output, y);

        // d(mean squared error)/d(output)
        let mut gradient = (&output - y) * (2.0 / output.len() as f64);
        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let delta = gradient * layer.activation.derivative(&pre_activations[idx]);
            let grad_w = inputs[idx].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            gradient = delta.dot(&layer.weights.t());

            let lr = self.config.learning_rate;
            self.optimizer[idx].step(&mut self.layers[idx], &grad_w, &grad_b, lr);
        }

        metrics
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.config.input_size {
            return Err(AnalysisError::ShapeMismatch {
                expected: self.config.input_size,
                found: x.ncols(),
            });
        }
        Ok(())
    }

    fn check_targets(&self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        self.check_input(x)?;
        if x.nrows() == 0 {
            return Err(AnalysisError::EmptyDataset("network input".to_string()));
        }
        if y.nrows() != x.nrows() {
            return Err(AnalysisError::ShapeMismatch {
                expected: x.nrows(),
                found: y.nrows(),
            });
        }
        if y.ncols() != self.config.output_size {
            return Err(AnalysisError::ShapeMismatch {
                expected: self.config.output_size,
                found: y.ncols(),
            });
        }
        Ok(())
    }

    /// Saves the config and layers to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &(&self.config, &self.layers))?;
        Ok(())
    }

    /// Loads a network saved with `save_to_file`. Optimiser state starts fresh.
    pub fn load_from_file<P: AsRef<Path>>(path: P, seed: u64) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let (config, layers): (NetworkConfig, Vec<DenseLayer>) = serde_json::from_reader(reader)?;
        check_layers(&config, &layers)?;
        let optimizer = layers.iter().map(AdamState::for_layer).collect();
        Ok(Self {
            config,
            layers,
            optimizer,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Input size: {}\n", self.config.input_size));
        for (i, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!(
                "Dense {}: {} -> {} ({:?}), params: {}\n",
                i + 1,
                layer.weights.nrows(),
                layer.weights.ncols(),
                layer.activation,
                layer.num_parameters()
            ));
        }
        out.push_str(&format!("Total parameters: {}", self.num_parameters()));
        out
    }
}

/// Layer dimensions must chain from `input_size` to `output_size`.
fn check_layers(config: &NetworkConfig, layers: &[DenseLayer]) -> Result<()> {
    let mismatch = |expected, found| Err(AnalysisError::ShapeMismatch { expected, found });

    if layers.len() != config.hidden_layers.len() + 1 {
        return mismatch(config.hidden_layers.len() + 1, layers.len());
    }
    let mut expected_inputs = config.input_size;
    for (i, layer) in layers.iter().enumerate() {
        let expected_outputs = config.hidden_layers.get(i).copied().unwrap_or(config.output_size);
        if layer.weights.nrows() != expected_inputs {
            return mismatch(expected_inputs, layer.weights.nrows());
        }
        if layer.weights.ncols() != expected_outputs {
            return mismatch(expected_outputs, layer.weights.ncols());
        }
        if layer.biases.len() != expected_outputs {
            return mismatch(expected_outputs, layer.biases.len());
        }
        expected_inputs = expected_outputs;
    }
    Ok(())
}

/// ReLU activation function
fn relu(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

fn loss_and_mae(predictions: &Array2<f64>, targets: &Array2<f64>) -> (f64, f64) {
    let diff = predictions - targets;
    let n = diff.len().max(1) as f64;
    let loss = diff.mapv(|d| d * d).sum() / n;
    let mae = diff.mapv(f64::abs).sum() / n;
    (loss, mae)
}
