pub mod conv2d;
pub mod dropout;
pub mod feed_forward;
pub mod max_pool;

use std::fmt::{self, Debug};

use ndarray::{Array1, Array2};

use crate::context::ComputeDevice;
use crate::error::Result;

/// Trainable weights of a layer together with their accumulated gradients
#[derive(Debug, Clone)]
pub struct LayerParams {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub weight_grads: Array2<f32>,
    pub bias_grads: Array1<f32>,
}

impl LayerParams {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Self {
        let weight_grads = Array2::zeros(weights.raw_dim());
        let bias_grads = Array1::zeros(bias.raw_dim());
        LayerParams {
            weights,
            bias,
            weight_grads,
            bias_grads,
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn zero_grads(&mut self) {
        self.weight_grads.fill(0.0);
        self.bias_grads.fill(0.0);
    }

    pub fn add_grads_from(&mut self, other: &LayerParams) {
        self.weight_grads += &other.weight_grads;
        self.bias_grads += &other.bias_grads;
    }

    pub fn scale_grads(&mut self, factor: f32) {
        self.weight_grads *= factor;
        self.bias_grads *= factor;
    }

    /// Overwrites the weights in place, keeping the existing allocation
    pub fn copy_weights_from(&mut self, other: &LayerParams) {
        self.weights.assign(&other.weights);
        self.bias.assign(&other.bias);
    }
}

/// Shape of the activations a layer emits for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Map { channels: usize, height: usize, width: usize },
    Vector(usize),
}

impl OutputShape {
    pub fn len(&self) -> usize {
        match *self {
            OutputShape::Map { channels, height, width } => channels * height * width,
            OutputShape::Vector(n) => n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            OutputShape::Map { channels, height, width } => write!(f, "({height}, {width}, {channels})"),
            OutputShape::Vector(n) => write!(f, "({n})"),
        }
    }
}

/// What a forward pass is for, and where it runs
#[derive(Debug, Clone, Copy)]
pub struct Pass<'a> {
    pub training: bool,
    pub device: &'a ComputeDevice,
}

impl<'a> Pass<'a> {
    pub fn training(device: &'a ComputeDevice) -> Self {
        Pass { training: true, device }
    }

    pub fn inference(device: &'a ComputeDevice) -> Self {
        Pass { training: false, device }
    }
}

/// A layer consumes and produces one flattened sample at a time.
///
/// `forward` caches whatever `backward` needs; `backward` accumulates
/// parameter gradients and returns the gradient for the layer below.
pub trait Layer: Debug + Send {
    fn name(&self) -> &'static str;

    fn output_shape(&self) -> OutputShape;

    fn forward(&mut self, input: &Array1<f32>, pass: Pass<'_>) -> Result<Array1<f32>>;

    fn backward(&mut self, grad_output: &Array1<f32>) -> Array1<f32>;

    fn params(&self) -> Option<&LayerParams> {
        None
    }

    fn params_mut(&mut self) -> Option<&mut LayerParams> {
        None
    }

    /// Re-seeds any internal randomness, so replicas do not share masks
    fn reseed(&mut self, _seed: u64) {}

    fn clone_box(&self) -> Box<dyn Layer>;
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

pub use conv2d::{Conv2DLayer, ConvGeometry};
pub use dropout::DropoutLayer;
pub use feed_forward::FeedForwardLayer;
pub use max_pool::MaxPoolLayer;
