/// Training constants that the command line does not expose
#[derive(Debug, Clone)]
pub struct TrainingHyperparameters {
    /// Adam step size
    pub learning_rate: f32,

    /// Adam first moment decay
    pub beta1: f32,

    /// Adam second moment decay
    pub beta2: f32,

    pub epsilon: f32,

    /// Fraction of the training partition held out for validation
    pub validation_split: f32,

    /// Dropout rate after each hidden dense layer
    pub dropout: f32,

    /// Minimum gain in training accuracy that counts as an improvement
    pub min_delta: f32,

    /// Epochs without improvement before training stops
    pub patience: usize,
}

impl Default for TrainingHyperparameters {
    fn default() -> Self {
        TrainingHyperparameters {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            validation_split: 0.2,
            dropout: 0.2,
            min_delta: 0.001,
            patience: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hyperparameters() {
        let hp = TrainingHyperparameters::default();

        assert_eq!(hp.learning_rate, 0.001);
        assert_eq!(hp.validation_split, 0.2);
        assert_eq!(hp.dropout, 0.2);
        assert_eq!(hp.min_delta, 0.001);
        assert_eq!(hp.patience, 2);
    }
}
