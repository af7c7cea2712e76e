use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Layer, OutputShape, Pass};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DropoutLayer {
    size: usize,
    dropout_rate: f32,
    scale: f32,
    mask: Option<Array1<f32>>,
    rng: StdRng,
}

impl DropoutLayer {
    pub fn new(size: usize, dropout_rate: f32, seed: u64) -> Self {
        assert!((0.0..1.0).contains(&dropout_rate), "Dropout rate must be between 0 and 1");

        DropoutLayer {
            size,
            dropout_rate,
            scale: 1.0 / (1.0 - dropout_rate), // Scale factor for training
            mask: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn rate(&self) -> f32 {
        self.dropout_rate
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::Vector(self.size)
    }

    fn forward(&mut self, input: &Array1<f32>, pass: Pass<'_>) -> Result<Array1<f32>> {
        if !pass.training {
            self.mask = None;
            return Ok(input.clone());
        }

        let rate = self.dropout_rate;
        let scale = self.scale;
        let rng = &mut self.rng;
        let mask: Array1<f32> = Array1::from_shape_fn(input.len(), |_| {
            if rng.random::<f32>() >= rate { scale } else { 0.0 }
        });

        let output = input * &mask;
        self.mask = Some(mask);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Array1<f32>) -> Array1<f32> {
        // During backprop, we multiply gradients by the same mask
        match &self.mask {
            Some(mask) => grad_output * mask,
            None => grad_output.clone(),
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
