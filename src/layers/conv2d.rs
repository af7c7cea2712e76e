use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::{Layer, LayerParams, OutputShape, Pass};
use crate::activation::ActivationType;
use crate::config::Padding;
use crate::context::ComputeDevice;
use crate::error::{Error, Result};

/// Spatial bookkeeping of a stride-1 convolution over a channels-first sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_channels: usize,
    pub input_height: usize,
    pub input_width: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub output_height: usize,
    pub output_width: usize,
    pub filters: usize,
}

impl ConvGeometry {
    pub fn new(
        input_shape: (usize, usize, usize), // (channels, height, width)
        kernel_size: (usize, usize),
        filters: usize,
        padding: Padding,
    ) -> Result<Self> {
        let (in_channels, input_height, input_width) = input_shape;
        let (kernel_height, kernel_width) = kernel_size;

        let (pad_top, pad_left, output_height, output_width) = match padding {
            // Odd padding puts the extra row/column at the bottom/right
            Padding::Same => ((kernel_height - 1) / 2, (kernel_width - 1) / 2, input_height, input_width),
            Padding::Valid => {
                if kernel_height > input_height || kernel_width > input_width {
                    return Err(Error::Topology(format!(
                        "a {kernel_height}x{kernel_width} kernel does not fit a {input_height}x{input_width} feature map \
                         (use smaller kernels, larger images or --padding same)"
                    )));
                }
                (0, 0, input_height - kernel_height + 1, input_width - kernel_width + 1)
            }
        };

        Ok(ConvGeometry {
            in_channels,
            input_height,
            input_width,
            kernel_height,
            kernel_width,
            pad_top,
            pad_left,
            output_height,
            output_width,
            filters,
        })
    }

    /// Rows of the im2col matrix: one per kernel tap per input channel
    pub fn patch_len(&self) -> usize {
        self.in_channels * self.kernel_height * self.kernel_width
    }

    pub fn output_positions(&self) -> usize {
        self.output_height * self.output_width
    }

    pub fn input_len(&self) -> usize {
        self.in_channels * self.input_height * self.input_width
    }

    /// Calls `f(row, position, input_index)` for every in-bounds tap
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize, usize)) {
        let plane = self.input_height * self.input_width;
        for c in 0..self.in_channels {
            for i in 0..self.kernel_height {
                for j in 0..self.kernel_width {
                    let row = (c * self.kernel_height + i) * self.kernel_width + j;
                    for oy in 0..self.output_height {
                        let y = oy + i;
                        if y < self.pad_top || y - self.pad_top >= self.input_height {
                            continue;
                        }
                        let y = y - self.pad_top;
                        for ox in 0..self.output_width {
                            let x = ox + j;
                            if x < self.pad_left || x - self.pad_left >= self.input_width {
                                continue;
                            }
                            let x = x - self.pad_left;
                            f(row, oy * self.output_width + ox, c * plane + y * self.input_width + x);
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    pub params: LayerParams,
    pub geometry: ConvGeometry,
    pub activation: ActivationType,
    input_cache: Array1<f32>,
    cols_cache: Option<Array2<f32>>,
    preactivation_cache: Array1<f32>,
}

impl Conv2DLayer {
    pub fn new(
        input_shape: (usize, usize, usize),
        kernel_size: (usize, usize),
        filters: usize,
        padding: Padding,
        activation: ActivationType,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let geometry = ConvGeometry::new(input_shape, kernel_size, filters, padding)?;
        let fan_in = geometry.patch_len();

        // He initialisation
        let std_dev = (2.0 / fan_in as f32).sqrt();
        let normal_dist = Normal::new(0.0, std_dev).map_err(|e| Error::Topology(e.to_string()))?;

        // One row of weights per filter, laid out like an im2col column
        let weights: Array2<f32> = Array2::from_shape_fn((filters, fan_in), |_| normal_dist.sample(rng));
        let bias: Array1<f32> = Array1::zeros(filters);

        Ok(Conv2DLayer {
            params: LayerParams::new(weights, bias),
            geometry,
            activation,
            input_cache: Array1::zeros(0),
            cols_cache: None,
            preactivation_cache: Array1::zeros(0),
        })
    }

    /// Unrolls every receptive field of `input` into a column
    pub fn im2col(&self, input: &Array1<f32>) -> Array2<f32> {
        let g = &self.geometry;
        let mut cols = Array2::zeros((g.patch_len(), g.output_positions()));
        g.for_each_tap(|row, pos, idx| cols[[row, pos]] = input[idx]);
        cols
    }

    /// Folds column gradients back onto the input positions they came from
    pub fn col2im(&self, cols: &Array2<f32>) -> Array1<f32> {
        let g = &self.geometry;
        let mut image = Array1::zeros(g.input_len());
        g.for_each_tap(|row, pos, idx| image[idx] += cols[[row, pos]]);
        image
    }

    fn forward_cpu(&self, input: &Array1<f32>) -> (Array1<f32>, Array2<f32>) {
        let cols = self.im2col(input);
        let output = self.params.weights.dot(&cols) + &self.params.bias.view().insert_axis(Axis(1));
        (Array1::from_iter(output.iter().copied()), cols)
    }
}

impl Layer for Conv2DLayer {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::Map {
            channels: self.geometry.filters,
            height: self.geometry.output_height,
            width: self.geometry.output_width,
        }
    }

    fn forward(&mut self, input: &Array1<f32>, pass: Pass<'_>) -> Result<Array1<f32>> {
        assert_eq!(input.len(), self.geometry.input_len(), "Input size does not match layer's input size");

        let (preactivation, cols) = match pass.device {
            ComputeDevice::Cpu => {
                let (preactivation, cols) = self.forward_cpu(input);
                (preactivation, Some(cols))
            }
            ComputeDevice::Gpu(gpu) => {
                let weights: Vec<f32> = self.params.weights.iter().copied().collect();
                let bias: Vec<f32> = self.params.bias.to_vec();
                let output = gpu.conv.compute(&self.geometry, &input.to_vec(), &weights, &bias)?;
                // backward rebuilds the columns from the cached input
                (Array1::from_vec(output), None)
            }
        };

        if pass.training {
            self.input_cache = input.clone();
            self.preactivation_cache = preactivation.clone();
            self.cols_cache = cols;
        }
        Ok(self.activation.forward(preactivation))
    }

    fn backward(&mut self, grad_output: &Array1<f32>) -> Array1<f32> {
        let filters = self.geometry.filters;
        let positions = self.geometry.output_positions();

        let activation = self.activation;
        let dz = Array2::from_shape_fn((filters, positions), |(f, p)| {
            let i = f * positions + p;
            grad_output[i] * activation.derivative(self.preactivation_cache[i])
        });

        let cols = match self.cols_cache.take() {
            Some(cols) => cols,
            None => self.im2col(&self.input_cache),
        };

        self.params.weight_grads += &dz.dot(&cols.t());
        self.params.bias_grads += &dz.sum_axis(Axis(1));

        let dcols = self.params.weights.t().dot(&dz);
        self.col2im(&dcols)
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
