use std::fmt::Write as _;

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, ArrayView4, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::activation::ActivationType;
use crate::context::TrainingContext;
use crate::error::{Error, Result};
use crate::layers::{Conv2DLayer, DropoutLayer, FeedForwardLayer, Layer, MaxPoolLayer, Pass};
use crate::loss::Loss;
use crate::optimizer::Optimizer;
use crate::topology::Topology;
use crate::utils::argmax;

/// A plain stack of layers, fed one (rows, cols, channels) sample at a time
#[derive(Debug, Clone)]
pub struct Sequential {
    pub layers: Vec<Box<dyn Layer>>,
    /// (rows, cols, channels)
    pub input_shape: (usize, usize, usize),
}

/// One line of the model summary
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub output_shape: String,
    pub params: usize,
}

impl Sequential {
    /// Builds the layers a topology describes, checking that every block
    /// still has room for its kernels and pool.
    pub fn from_topology(
        topology: &Topology,
        input_shape: (usize, usize, usize),
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let (rows, cols, channels) = input_shape;
        let mut shape = (channels, rows, cols);
        let mut layers: Vec<Box<dyn Layer>> = Vec::new();

        for (b, block) in topology.blocks.iter().enumerate() {
            let in_block = |e: Error| match e {
                Error::Topology(msg) => Error::Topology(format!("block {}: {msg}", b + 1)),
                other => other,
            };

            for _ in 0..block.convolutions {
                let conv = Conv2DLayer::new(
                    shape,
                    block.kernel_size,
                    block.filters,
                    block.padding,
                    ActivationType::ReLU,
                    rng,
                )
                .map_err(in_block)?;
                shape = (block.filters, conv.geometry.output_height, conv.geometry.output_width);
                layers.push(Box::new(conv));
            }

            let pool = MaxPoolLayer::new(shape.0, shape.1, shape.2, block.pool_size, block.pool_size.0)
                .map_err(in_block)?;
            shape = pool.output_shape;
            layers.push(Box::new(pool));
        }

        let mut features = shape.0 * shape.1 * shape.2;
        info!(features, "model flattened");

        for dense in &topology.hidden {
            layers.push(Box::new(FeedForwardLayer::new(features, dense.units, ActivationType::ReLU, rng)?));
            layers.push(Box::new(DropoutLayer::new(dense.units, dense.dropout, rng.random())));
            features = dense.units;
        }
        layers.push(Box::new(FeedForwardLayer::new(
            features,
            topology.classes,
            ActivationType::Softmax,
            rng,
        )?));

        Ok(Sequential { layers, input_shape })
    }

    pub fn forward(&mut self, sample: ArrayView3<f32>, pass: Pass<'_>) -> Result<Array1<f32>> {
        assert_eq!(sample.dim(), self.input_shape, "Sample shape does not match the model's input shape");

        let mut current = to_channels_first(sample);
        for layer in &mut self.layers {
            current = layer.forward(&current, pass)?;
        }
        Ok(current)
    }

    pub fn backward(&mut self, grad_output: Array1<f32>) {
        let mut grad = grad_output;
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
    }

    pub fn output_len(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_shape().len())
    }

    pub fn zero_gradients(&mut self) {
        for params in self.layers.iter_mut().filter_map(|l| l.params_mut()) {
            params.zero_grads();
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().filter_map(|l| l.params()).map(|p| p.parameter_count()).sum()
    }

    /// Forward and backward over `indices`, leaving summed gradients in the layers
    fn accumulate(
        &mut self,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        indices: &[usize],
        loss: Loss,
        pass: Pass<'_>,
    ) -> Result<BatchStats> {
        self.zero_gradients();
        let mut stats = BatchStats::default();
        for &i in indices {
            let target = y.row(i).to_owned();
            let output = self.forward(x.index_axis(Axis(0), i), pass)?;
            stats.record(loss.calculate(&output, &target), argmax(output.view()) == argmax(target.view()));
            self.backward(loss.gradient(&output, &target));
        }
        Ok(stats)
    }

    fn reseed(&mut self, seed: u64) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.reseed(seed.wrapping_add(i as u64));
        }
    }

    fn add_gradients_from(&mut self, other: &Sequential) {
        let theirs = other.layers.iter().filter_map(|l| l.params());
        let ours = self.layers.iter_mut().filter_map(|l| l.params_mut());
        for (mine, other) in ours.zip(theirs) {
            mine.add_grads_from(other);
        }
    }

    fn scale_gradients(&mut self, factor: f32) {
        for params in self.layers.iter_mut().filter_map(|l| l.params_mut()) {
            params.scale_grads(factor);
        }
    }

    fn copy_weights_from(&mut self, other: &Sequential) {
        let theirs = other.layers.iter().filter_map(|l| l.params());
        let ours = self.layers.iter_mut().filter_map(|l| l.params_mut());
        for (mine, other) in ours.zip(theirs) {
            mine.copy_weights_from(other);
        }
    }

    pub fn layer_summaries(&self) -> Vec<LayerSummary> {
        let mut counts = std::collections::HashMap::new();
        self.layers
            .iter()
            .map(|layer| {
                let n = counts.entry(layer.name()).or_insert(0);
                *n += 1;
                LayerSummary {
                    name: format!("{}_{}", layer.name(), n),
                    output_shape: layer.output_shape().to_string(),
                    params: layer.params().map_or(0, |p| p.parameter_count()),
                }
            })
            .collect()
    }
}

fn to_channels_first(sample: ArrayView3<f32>) -> Array1<f32> {
    // (rows, cols, channels) -> (channels, rows, cols)
    sample.permuted_axes([2, 0, 1]).iter().copied().collect()
}

/// Running loss and accuracy over a set of samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub loss_sum: f32,
    pub correct: usize,
    pub samples: usize,
}

impl BatchStats {
    fn record(&mut self, loss: f32, correct: bool) {
        self.loss_sum += loss;
        self.correct += usize::from(correct);
        self.samples += 1;
    }

    pub fn merge(&mut self, other: BatchStats) {
        self.loss_sum += other.loss_sum;
        self.correct += other.correct;
        self.samples += other.samples;
    }

    pub fn loss(&self) -> f32 {
        if self.samples == 0 { 0.0 } else { self.loss_sum / self.samples as f32 }
    }

    pub fn accuracy(&self) -> f32 {
        if self.samples == 0 { 0.0 } else { self.correct as f32 / self.samples as f32 }
    }
}

/// What gets dumped to the log directory's graph file
#[derive(Debug, Clone, Serialize)]
pub struct ModelGraph {
    pub input_shape: (usize, usize, usize),
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
    pub replicas: usize,
    pub loss: Loss,
    pub optimizer: &'static str,
    pub learning_rate: f32,
}

/// A network bound to a loss and an optimizer, replicated once per device
#[derive(Debug)]
pub struct Model {
    replicas: Vec<Sequential>,
    pub loss: Loss,
    pub optimizer: Optimizer,
}

impl Model {
    pub fn compile(
        network: Sequential,
        ctx: &TrainingContext,
        loss: Loss,
        optimizer: Optimizer,
        rng: &mut impl Rng,
    ) -> Self {
        let mut replicas = Vec::with_capacity(ctx.replicas());
        for _ in 1..ctx.replicas() {
            let mut replica = network.clone();
            replica.reseed(rng.random());
            replicas.push(replica);
        }
        replicas.insert(0, network);

        if replicas.len() > 1 {
            info!(replicas = replicas.len(), "model replicated for data-parallel training");
        }

        Model {
            replicas,
            loss,
            optimizer,
        }
    }

    pub fn network(&self) -> &Sequential {
        &self.replicas[0]
    }

    pub fn replicas(&self) -> usize {
        self.replicas.len()
    }

    /// One optimizer step over the samples at `indices`.
    ///
    /// The batch is sharded across replicas; their gradients are summed into
    /// the first replica, averaged, applied, and the new weights are copied
    /// back to the others.
    pub fn train_batch(
        &mut self,
        ctx: &TrainingContext,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        indices: &[usize],
    ) -> Result<BatchStats> {
        if indices.is_empty() {
            return Ok(BatchStats::default());
        }

        let shard_len = indices.len().div_ceil(self.replicas.len());
        let shards: Vec<&[usize]> = indices.chunks(shard_len).collect();
        let loss = self.loss;

        let results: Vec<Result<BatchStats>> = self
            .replicas
            .par_iter_mut()
            .zip(ctx.devices().par_iter())
            .zip(shards.par_iter())
            .map(|((replica, device), shard)| replica.accumulate(x, y, shard, loss, Pass::training(device)))
            .collect();

        let mut stats = BatchStats::default();
        for result in results {
            stats.merge(result?);
        }

        let (master, rest) = self.replicas.split_at_mut(1);
        let master = &mut master[0];
        for replica in rest.iter().take(shards.len() - 1) {
            master.add_gradients_from(replica);
        }
        master.scale_gradients(1.0 / indices.len() as f32);
        self.optimizer.step(&mut master.layers);
        for replica in rest.iter_mut() {
            replica.copy_weights_from(master);
        }

        debug!(samples = stats.samples, loss = stats.loss(), "batch trained");
        Ok(stats)
    }

    /// Class probabilities for every sample, with dropout disabled
    pub fn predict(&mut self, ctx: &TrainingContext, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let n = x.len_of(Axis(0));
        let classes = self.network().output_len();
        let mut predictions = Array2::zeros((n, classes));
        if n == 0 {
            return Ok(predictions);
        }

        let indices: Vec<usize> = (0..n).collect();
        let shard_len = n.div_ceil(self.replicas.len());
        let shards: Vec<&[usize]> = indices.chunks(shard_len).collect();

        let results: Vec<Result<Vec<(usize, Array1<f32>)>>> = self
            .replicas
            .par_iter_mut()
            .zip(ctx.devices().par_iter())
            .zip(shards.par_iter())
            .map(|((replica, device), shard)| {
                shard
                    .iter()
                    .map(|&i| -> Result<(usize, Array1<f32>)> {
                        Ok((i, replica.forward(x.index_axis(Axis(0), i), Pass::inference(device))?))
                    })
                    .collect()
            })
            .collect();

        for shard in results {
            for (i, row) in shard? {
                predictions.row_mut(i).assign(&row);
            }
        }
        Ok(predictions)
    }

    /// Loss and accuracy without updating weights
    pub fn evaluate(&mut self, ctx: &TrainingContext, x: ArrayView4<f32>, y: ArrayView2<f32>) -> Result<BatchStats> {
        let predictions = self.predict(ctx, x)?;
        let mut stats = BatchStats::default();
        for (prediction, target) in predictions.rows().into_iter().zip(y.rows()) {
            let loss = self.loss.calculate(&prediction.to_owned(), &target.to_owned());
            stats.record(loss, argmax(prediction) == argmax(target));
        }
        Ok(stats)
    }

    pub fn graph(&self) -> ModelGraph {
        let network = self.network();
        ModelGraph {
            input_shape: network.input_shape,
            layers: network.layer_summaries(),
            total_params: network.parameter_count(),
            replicas: self.replicas.len(),
            loss: self.loss,
            optimizer: "adam",
            learning_rate: self.optimizer.learning_rate,
        }
    }

    pub fn summary(&self) -> String {
        let network = self.network();
        let mut out = String::new();
        let rule = "_".repeat(65);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{:<28}{:<25}{:>12}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{}", "=".repeat(65));
        for layer in network.layer_summaries() {
            let _ = writeln!(out, "{:<28}{:<25}{:>12}", layer.name, layer.output_shape, layer.params);
        }
        let _ = writeln!(out, "{}", "=".repeat(65));
        let _ = writeln!(out, "Total params: {}", network.parameter_count());
        let _ = writeln!(out, "Replicas: {}", self.replicas.len());
        let _ = write!(out, "{rule}");
        out
    }
}
