use ndarray::Array1;

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum ActivationType {
    ReLU,
    Softmax,
    Linear,
}

impl ActivationType {
    /// Applies the activation to a whole preactivation vector
    pub fn forward(&self, x: Array1<f32>) -> Array1<f32> {
        match self {
            ActivationType::ReLU => x.mapv_into(|v| v.max(0.0)),
            ActivationType::Softmax => {
                // Shift by the max so large logits do not overflow exp
                let max = x.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                let exps = x.mapv_into(|v| (v - max).exp());
                let sum = exps.sum();
                exps / sum
            }
            ActivationType::Linear => x,
        }
    }

    /// Elementwise derivative with respect to the preactivation.
    ///
    /// Softmax is only ever paired with cross-entropy, whose combined
    /// gradient is computed by the loss, so it passes gradients through.
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationType::Softmax | ActivationType::Linear => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_activation_functions() {
        let relu = ActivationType::ReLU.forward(array![-1.0, 0.0, 2.0]);
        assert_eq!(relu, array![0.0, 0.0, 2.0]);

        let linear = ActivationType::Linear.forward(array![5.0, -3.0]);
        assert_eq!(linear, array![5.0, -3.0]);

        let softmax = ActivationType::Softmax.forward(array![1.0, 2.0, 3.0]);
        assert!((softmax.sum() - 1.0).abs() < 1e-6);
        assert!(softmax[2] > softmax[1] && softmax[1] > softmax[0]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let softmax = ActivationType::Softmax.forward(array![1000.0, 1000.0]);
        assert!((softmax[0] - 0.5).abs() < 1e-6);
        assert!(softmax.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_activation_derivatives() {
        assert_eq!(ActivationType::ReLU.derivative(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.derivative(2.0), 1.0);
        assert_eq!(ActivationType::Linear.derivative(5.0), 1.0);
    }
}
