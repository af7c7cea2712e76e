use ndarray::Array1;

use super::{Layer, OutputShape, Pass};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    pub input_shape: (usize, usize, usize),  // (channels, height, width)
    pub output_shape: (usize, usize, usize),
    pub pool_size: (usize, usize),
    pub stride: usize,
    /// Flat input index of the winner of every pooling window
    max_indices: Vec<usize>,
}

impl MaxPoolLayer {
    pub fn new(
        in_channels: usize,
        input_height: usize,
        input_width: usize,
        pool_size: (usize, usize),
        stride: usize,
    ) -> Result<Self> {
        if input_height < pool_size.0 || input_width < pool_size.1 {
            return Err(Error::Topology(format!(
                "a {}x{} pool does not fit a {input_height}x{input_width} feature map",
                pool_size.0, pool_size.1
            )));
        }

        let output_height = ((input_height - pool_size.0) / stride) + 1;
        let output_width = ((input_width - pool_size.1) / stride) + 1;

        Ok(MaxPoolLayer {
            input_shape: (in_channels, input_height, input_width),
            output_shape: (in_channels, output_height, output_width),
            pool_size,
            stride,
            max_indices: Vec::new(),
        })
    }
}

impl Layer for MaxPoolLayer {
    fn name(&self) -> &'static str {
        "max_pooling2d"
    }

    fn output_shape(&self) -> OutputShape {
        let (channels, height, width) = self.output_shape;
        OutputShape::Map { channels, height, width }
    }

    fn forward(&mut self, input: &Array1<f32>, _pass: Pass<'_>) -> Result<Array1<f32>> {
        let (channels, height, width) = self.input_shape;
        let (_, output_height, output_width) = self.output_shape;
        assert_eq!(input.len(), channels * height * width, "Input size does not match layer's input size");

        let mut output = Array1::zeros(channels * output_height * output_width);
        self.max_indices.clear();

        let mut out_idx = 0;
        for c in 0..channels {
            for h in 0..output_height {
                for w in 0..output_width {
                    let h_start = h * self.stride;
                    let w_start = w * self.stride;

                    let mut max_val = f32::NEG_INFINITY;
                    let mut max_idx = c * height * width + h_start * width + w_start;

                    // Find maximum in pooling window
                    for ph in 0..self.pool_size.0 {
                        for pw in 0..self.pool_size.1 {
                            let idx = c * height * width + (h_start + ph) * width + (w_start + pw);
                            if input[idx] > max_val {
                                max_val = input[idx];
                                max_idx = idx;
                            }
                        }
                    }

                    output[out_idx] = max_val;
                    self.max_indices.push(max_idx);
                    out_idx += 1;
                }
            }
        }

        Ok(output)
    }

    fn backward(&mut self, grad_output: &Array1<f32>) -> Array1<f32> {
        let (channels, height, width) = self.input_shape;
        let mut input_gradient = Array1::zeros(channels * height * width);

        // Only the winner of each window receives gradient
        for (grad, &idx) in grad_output.iter().zip(&self.max_indices) {
            input_gradient[idx] += grad;
        }
        input_gradient
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

    #[test]
    fn test_pool_shape_floors_odd_sizes() {
        let pool = MaxPoolLayer::new(2, 5, 7, (2, 2), 2).unwrap();
        assert_eq!(pool.output_shape, (2, 2, 3));
    }

    #[test]
    fn test_pool_too_small_input_is_rejected() {
        assert!(MaxPoolLayer::new(1, 1, 4, (2, 2), 2).is_err());
    }

    #[test]
    fn test_forward_and_backward_route_through_max() {
        let mut pool = MaxPoolLayer::new(1, 4, 4, (2, 2), 2).unwrap();
        let input = array![
            1.0, 2.0, 0.0, 0.0,
            3.0, 4.0, 0.0, 9.0,
            5.0, 0.0, 1.0, 1.0,
            0.0, 0.0, 1.0, 2.0
        ];
        let output = pool.forward(&input, Pass::training(&ComputeDevice::Cpu)).unwrap();
        assert_eq!(output, array![4.0, 9.0, 5.0, 2.0]);

        let grad = pool.backward(&array![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(grad[5], 1.0);
        assert_eq!(grad[7], 2.0);
        assert_eq!(grad[8], 3.0);
        assert_eq!(grad[15], 4.0);
        assert_eq!(grad.sum(), 10.0);
    }
}
