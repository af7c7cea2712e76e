use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::{Layer, LayerParams, OutputShape, Pass};
use crate::activation::ActivationType;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FeedForwardLayer {
    pub params: LayerParams,
    pub inputs: usize,
    pub neurons: usize,
    pub activation: ActivationType,
    input_cache: Array1<f32>,
    preactivation_cache: Array1<f32>,
}

impl FeedForwardLayer {
    pub fn new(
        inputs: usize,
        neurons: usize,
        activation: ActivationType,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        // Assume He normalization
        let std_dev = (2.0 / inputs as f32).sqrt();
        let normal_dist = Normal::new(0.0, std_dev).map_err(|e| Error::Topology(e.to_string()))?;

        // Initialize weights as (neurons × inputs) for correct matrix multiplication
        let weights: Array2<f32> = Array2::from_shape_fn((neurons, inputs), |_| normal_dist.sample(rng));
        let bias: Array1<f32> = Array1::zeros(neurons);

        Ok(FeedForwardLayer {
            params: LayerParams::new(weights, bias),
            inputs,
            neurons,
            activation,
            input_cache: Array1::zeros(0),
            preactivation_cache: Array1::zeros(0),
        })
    }
}

impl Layer for FeedForwardLayer {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::Vector(self.neurons)
    }

    fn forward(&mut self, input: &Array1<f32>, pass: Pass<'_>) -> Result<Array1<f32>> {
        assert_eq!(input.len(), self.inputs, "Input size does not match layer's input size");

        // weights is (neurons × inputs), input is (inputs), result is (neurons)
        let output = self.params.weights.dot(input) + &self.params.bias;
        if pass.training {
            self.input_cache = input.clone();
            self.preactivation_cache = output.clone();
        }
        Ok(self.activation.forward(output))
    }

    fn backward(&mut self, grad_output: &Array1<f32>) -> Array1<f32> {
        // Softmax gradients arrive already combined with the loss
        let dlayer = match self.activation {
            ActivationType::Softmax => grad_output.clone(),
            activation => grad_output * &self.preactivation_cache.mapv(|x| activation.derivative(x)),
        };

        self.params.bias_grads += &dlayer;
        // (neurons × 1) · (1 × inputs), accumulated in place
        let dlayer_col = dlayer.view().insert_axis(Axis(1));
        let input_row = self.input_cache.view().insert_axis(Axis(0));
        general_mat_mul(1.0, &dlayer_col, &input_row, 1.0, &mut self.params.weight_grads);

        self.params.weights.t().dot(&dlayer)
    }

    fn params(&self) -> Option<&LayerParams> {
        Some(&self.params)
    }

    fn params_mut(&mut self) -> Option<&mut LayerParams> {
        Some(&mut self.params)
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ComputeDevice;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_uses_weights_and_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = FeedForwardLayer::new(3, 2, ActivationType::ReLU, &mut rng).unwrap();
        layer.params.weights = array![[1.0, 0.0, -1.0], [-1.0, -1.0, -1.0]];
        layer.params.bias = array![0.5, 0.0];

        let output = layer.forward(&array![1.0, 2.0, 3.0], Pass::inference(&ComputeDevice::Cpu)).unwrap();
        assert_eq!(output, array![0.0, 0.0]);

        layer.params.bias = array![3.0, 7.0];
        let output = layer.forward(&array![1.0, 2.0, 3.0], Pass::inference(&ComputeDevice::Cpu)).unwrap();
        assert_eq!(output, array![1.0, 1.0]);
    }

    #[test]
    fn test_backward_accumulates_outer_product() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = FeedForwardLayer::new(2, 2, ActivationType::Linear, &mut rng).unwrap();
        layer.params.weights = array![[1.0, 2.0], [3.0, 4.0]];

        layer.forward(&array![1.0, -1.0], Pass::training(&ComputeDevice::Cpu)).unwrap();
        let grad_input = layer.backward(&array![1.0, 0.5]);

        assert_eq!(layer.params.weight_grads, array![[1.0, -1.0], [0.5, -0.5]]);
        assert_eq!(layer.params.bias_grads, array![1.0, 0.5]);
        assert_eq!(grad_input, array![2.5, 4.0]);
    }

    #[test]
    fn test_weight_gradients_sum_over_samples() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = FeedForwardLayer::new(3, 2, ActivationType::Linear, &mut rng).unwrap();
        let device = ComputeDevice::Cpu;

        layer.forward(&array![1.0, 0.0, 2.0], Pass::training(&device)).unwrap();
        layer.backward(&array![1.0, -1.0]);
        layer.forward(&array![0.0, 3.0, 1.0], Pass::training(&device)).unwrap();
        layer.backward(&array![2.0, 0.5]);

        assert_eq!(layer.params.weight_grads, array![[1.0, 6.0, 4.0], [-1.0, 1.5, -1.5]]);
        assert_eq!(layer.params.bias_grads, array![3.0, -0.5]);
    }
}
