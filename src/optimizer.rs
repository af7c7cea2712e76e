use ndarray::{Array, Dimension, Zip};

use crate::hyperparameters::TrainingHyperparameters;
use crate::layers::{Layer, LayerParams};

#[derive(Debug, Clone)]
struct Moments<D: Dimension> {
    first: Array<f32, D>,
    second: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros_like(a: &Array<f32, D>) -> Self {
        Moments {
            first: Array::zeros(a.raw_dim()),
            second: Array::zeros(a.raw_dim()),
        }
    }
}

#[derive(Debug, Clone)]
struct LayerMoments {
    weights: Moments<ndarray::Ix2>,
    bias: Moments<ndarray::Ix1>,
}

/// Adam: adaptive moment estimation
#[derive(Debug, Clone)]
pub struct Optimizer {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    step: i32,
    moments: Vec<LayerMoments>,
}

impl Optimizer {
    pub fn adam(hp: &TrainingHyperparameters) -> Self {
        Self {
            learning_rate: hp.learning_rate,
            beta1: hp.beta1,
            beta2: hp.beta2,
            epsilon: hp.epsilon,
            step: 0,
            moments: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> i32 {
        self.step
    }

    /// Applies the gradients accumulated in every trainable layer
    pub fn step(&mut self, layers: &mut [Box<dyn Layer>]) {
        self.step += 1;
        // bias correction folded into the step size
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(self.step)).sqrt() / (1.0 - self.beta1.powi(self.step));

        for (idx, params) in layers.iter_mut().filter_map(|l| l.params_mut()).enumerate() {
            if self.moments.len() <= idx {
                self.moments.push(LayerMoments {
                    weights: Moments::zeros_like(&params.weights),
                    bias: Moments::zeros_like(&params.bias),
                });
            }
            let moments = &mut self.moments[idx];
            let LayerParams {
                weights,
                bias,
                weight_grads,
                bias_grads,
            } = params;
            update(weights, weight_grads, &mut moments.weights, lr_t, self.beta1, self.beta2, self.epsilon);
            update(bias, bias_grads, &mut moments.bias, lr_t, self.beta1, self.beta2, self.epsilon);
        }
    }
}

fn update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    moments: &mut Moments<D>,
    lr_t: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
) {
    Zip::from(param)
        .and(grad)
        .and(&mut moments.first)
        .and(&mut moments.second)
        .for_each(|w, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *w -= lr_t * *m / (v.sqrt() + epsilon);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationType;
    use crate::layers::FeedForwardLayer;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = FeedForwardLayer::new(2, 1, ActivationType::Linear, &mut rng).unwrap();
        dense.params.weights = array![[1.0, -1.0]];
        dense.params.weight_grads = array![[0.5, -2.0]];
        dense.params.bias_grads = array![0.0];

        let mut layers: Vec<Box<dyn Layer>> = vec![Box::new(dense)];
        let mut optimizer = Optimizer::adam(&TrainingHyperparameters::default());
        optimizer.step(&mut layers);

        // Adam's first step is lr * sign(g), independent of the gradient's size
        let params = layers[0].params().unwrap();
        assert!((params.weights[[0, 0]] - 0.999).abs() < 1e-5);
        assert!((params.weights[[0, 1]] + 0.999).abs() < 1e-5);
        assert_eq!(params.bias[0], 0.0);
        assert_eq!(optimizer.steps_taken(), 1);
    }

    #[test]
    fn test_minimises_a_quadratic() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = FeedForwardLayer::new(1, 1, ActivationType::Linear, &mut rng).unwrap();
        dense.params.weights = array![[3.0]];
        let mut layers: Vec<Box<dyn Layer>> = vec![Box::new(dense)];

        let hp = TrainingHyperparameters {
            learning_rate: 0.1,
            ..TrainingHyperparameters::default()
        };
        let mut optimizer = Optimizer::adam(&hp);
        for _ in 0..500 {
            // d/dw of w^2
            let params = layers[0].params_mut().unwrap();
            params.weight_grads = &params.weights * 2.0;
            optimizer.step(&mut layers);
        }
        assert!(layers[0].params().unwrap().weights[[0, 0]].abs() < 0.1);
    }
}
