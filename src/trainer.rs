use ndarray::{ArrayView2, ArrayView4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::context::TrainingContext;
use crate::curves::CurveLogger;
use crate::error::{Error, Result};
use crate::hyperparameters::TrainingHyperparameters;
use crate::model::{BatchStats, Model};

/// One row of the training curves
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
    pub stopped_early: bool,
}

impl History {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Stops training once a monitored value has failed to improve by more than
/// `min_delta` for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    min_delta: f32,
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(min_delta: f32, patience: usize) -> Self {
        EarlyStopping {
            min_delta,
            patience,
            best: f32::NEG_INFINITY,
            wait: 0,
        }
    }

    /// Records this epoch's value, returns true when training should stop
    pub fn should_stop(&mut self, current: f32) -> bool {
        if current - self.min_delta > self.best {
            self.best = current;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best(&self) -> f32 {
        self.best
    }
}

#[derive(Debug)]
pub struct Trainer {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    min_delta: f32,
    patience: usize,
    logger: Option<CurveLogger>,
}

impl Trainer {
    pub fn new(epochs: usize, batch_size: usize, hp: &TrainingHyperparameters) -> Self {
        Trainer {
            epochs,
            batch_size: batch_size.max(1),
            validation_split: hp.validation_split,
            min_delta: hp.min_delta,
            patience: hp.patience,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: CurveLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Trains on the first part of `x`/`y`, validating on the tail.
    ///
    /// The validation samples are taken before any shuffling, so they are
    /// the same every epoch and never trained on.
    pub fn fit(
        &mut self,
        model: &mut Model,
        ctx: &TrainingContext,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        rng: &mut impl Rng,
    ) -> Result<History> {
        let n = x.len_of(Axis(0));
        let split_at = (n as f32 * (1.0 - self.validation_split)).floor() as usize;
        if split_at == 0 {
            return Err(Error::Split(format!(
                "{n} training samples leave none to train on after the validation hold-out"
            )));
        }

        let (x_train, x_val) = x.split_at(Axis(0), split_at);
        let (y_train, y_val) = y.split_at(Axis(0), split_at);
        info!(train = split_at, validation = n - split_at, "train on {} samples, validate on {}", split_at, n - split_at);

        if let Some(logger) = &self.logger {
            logger.write_graph(&model.graph());
        }

        let mut early_stopping = EarlyStopping::new(self.min_delta, self.patience);
        let mut indices: Vec<usize> = (0..split_at).collect();
        let mut history = History::default();

        for epoch in 1..=self.epochs {
            indices.shuffle(rng);

            let mut stats = BatchStats::default();
            for batch in indices.chunks(self.batch_size) {
                stats.merge(model.train_batch(ctx, x_train, y_train, batch)?);
            }

            let validation = if split_at < n {
                Some(model.evaluate(ctx, x_val, y_val)?)
            } else {
                None
            };

            let metrics = EpochMetrics {
                epoch,
                loss: stats.loss(),
                accuracy: stats.accuracy(),
                val_loss: validation.map(|v| v.loss()),
                val_accuracy: validation.map(|v| v.accuracy()),
            };
            info!(
                epoch,
                epochs = self.epochs,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                val_loss = ?metrics.val_loss,
                val_accuracy = ?metrics.val_accuracy,
                "epoch finished"
            );

            if let Some(logger) = self.logger.as_mut() {
                logger.record(&metrics);
            }
            history.epochs.push(metrics);

            if early_stopping.should_stop(metrics.accuracy) {
                info!(epoch, best_accuracy = early_stopping.best(), "training accuracy stopped improving, stopping early");
                history.stopped_early = true;
                break;
            }
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Padding;
    use crate::loss::Loss;
    use crate::model::Sequential;
    use crate::optimizer::Optimizer;
    use crate::topology::{DenseSpec, Topology};
    use ndarray::{Array2, Array4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_early_stopping_needs_consecutive_stalls() {
        let mut stopping = EarlyStopping::new(0.001, 2);
        assert!(!stopping.should_stop(0.5));
        assert!(!stopping.should_stop(0.5005)); // within min_delta
        assert!(!stopping.should_stop(0.6)); // improvement resets the count
        assert!(!stopping.should_stop(0.59));
        assert!(stopping.should_stop(0.6));
        assert_eq!(stopping.best(), 0.6);
    }

    #[test]
    fn test_first_epoch_always_improves() {
        let mut stopping = EarlyStopping::new(0.001, 1);
        assert!(!stopping.should_stop(0.0));
        assert!(stopping.should_stop(0.0));
    }

    fn tiny_model(rng: &mut StdRng, ctx: &TrainingContext) -> Model {
        let hidden = vec![DenseSpec { units: 4, dropout: 0.2 }];
        let topology = Topology::geometric(2, (2, 2), 1, Padding::Same, hidden, 2);
        let network = Sequential::from_topology(&topology, (4, 4, 1), rng).unwrap();
        let optimizer = Optimizer::adam(&TrainingHyperparameters::default());
        Model::compile(network, ctx, Loss::CategoricalCrossEntropy, optimizer, rng)
    }

    #[test]
    fn test_fit_logs_every_epoch() {
        let mut rng = StdRng::seed_from_u64(5);
        let ctx = TrainingContext::cpu();
        let mut model = tiny_model(&mut rng, &ctx);
        let dir = tempfile::tempdir().unwrap();

        let hp = TrainingHyperparameters {
            patience: 10,
            ..TrainingHyperparameters::default()
        };
        let mut trainer = Trainer::new(3, 4, &hp).with_logger(CurveLogger::new(dir.path()));

        let x = Array4::from_shape_fn((10, 4, 4, 1), |(n, r, _, _)| ((n + r) % 3) as f32 / 3.0);
        let y = Array2::from_shape_fn((10, 2), |(n, c)| if n % 2 == c { 1.0 } else { 0.0 });
        let history = trainer.fit(&mut model, &ctx, x.view(), y.view(), &mut rng).unwrap();

        assert_eq!(history.epochs.len(), 3);
        assert!(!history.stopped_early);
        // 8 train, 2 validation, batches of 4
        assert_eq!(model.optimizer.steps_taken(), 6);
        let last = history.last().unwrap();
        assert!(last.val_accuracy.is_some());
        assert!((0.0..=1.0).contains(&last.accuracy));

        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("epoch,loss,accuracy,val_loss,val_accuracy"));
        assert!(dir.path().join("graph.json").exists());
    }

    #[test]
    fn test_fit_without_training_samples_fails() {
        let mut rng = StdRng::seed_from_u64(6);
        let ctx = TrainingContext::cpu();
        let mut model = tiny_model(&mut rng, &ctx);
        let mut trainer = Trainer::new(1, 4, &TrainingHyperparameters::default());

        let x = Array4::zeros((1, 4, 4, 1));
        let y = Array2::from_elem((1, 2), 0.5);
        let err = trainer.fit(&mut model, &ctx, x.view(), y.view(), &mut rng).unwrap_err();
        assert!(matches!(err, Error::Split(_)));
    }
}
