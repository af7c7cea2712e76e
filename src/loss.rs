use ndarray::Array1;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub enum Loss {
    CategoricalCrossEntropy,
}

impl Loss {
    pub fn calculate(&self, prediction: &Array1<f32>, target: &Array1<f32>) -> f32 {
        match self {
            Loss::CategoricalCrossEntropy => {
                // -Σ(target * log(prediction)), clipped away from log(0)
                let epsilon = 1e-7;
                let safe_pred = prediction.mapv(|x| x.clamp(epsilon, 1.0 - epsilon));
                -(target * &safe_pred.mapv(f32::ln)).sum()
            }
        }
    }

    /// Gradient with respect to the logits of a softmax output layer
    pub fn gradient(&self, prediction: &Array1<f32>, target: &Array1<f32>) -> Array1<f32> {
        match self {
            Loss::CategoricalCrossEntropy => prediction - target,
        }
    }
}
