//! One run from the data directory to the three headline scores.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::Config;
use crate::context::TrainingContext;
use crate::curves::CurveLogger;
use crate::data::{load_dataset, Dataset};
use crate::error::Result;
use crate::hyperparameters::TrainingHyperparameters;
use crate::loss::Loss;
use crate::metrics::Metrics;
use crate::model::{Model, Sequential};
use crate::optimizer::Optimizer;
use crate::preprocess::{check_class_count, normalize, reshape_images, to_categorical, train_test_split, LabelEncoder};
use crate::topology::Topology;
use crate::trainer::{History, Trainer};
use crate::utils::argmax_rows;

#[derive(Debug, Clone)]
pub struct Report {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub metrics: Metrics,
    pub history: History,
    /// Distinct labels in code order
    pub classes: Vec<String>,
    pub test_samples: usize,
    pub seed: u64,
}

/// Loads the data directory named by `config` and runs every stage on it
pub fn run(config: &Config) -> Result<Report> {
    let dataset = load_dataset(&config.data_dir)?;
    run_with_dataset(config, dataset)
}

pub fn run_with_dataset(config: &Config, dataset: Dataset) -> Result<Report> {
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, "random seed (pass --seed to repeat this run)");
    let mut rng = StdRng::seed_from_u64(seed);

    let (encoder, codes) = LabelEncoder::fit_transform(&dataset.labels)?;
    check_class_count(encoder.classes().len(), config.nb_classes)?;
    info!(classes = ?encoder.classes(), "labels encoded");

    let split = train_test_split(dataset.images.view(), &codes, config.test_data_size, &mut rng)?;
    drop(dataset);

    let (rows, cols, channels) = config.input_shape();
    let mut x_train = reshape_images(split.x_train, rows, cols, channels)?;
    let mut x_test = reshape_images(split.x_test, rows, cols, channels)?;
    info!(shape = ?x_train.dim(), "training data shape");
    info!(shape = ?x_test.dim(), "testing data shape");

    normalize(&mut x_train);
    normalize(&mut x_test);

    let y_train = to_categorical(&split.y_train, config.nb_classes)?;
    let y_test = to_categorical(&split.y_test, config.nb_classes)?;
    info!(shape = ?y_train.dim(), "training labels shape");
    info!(shape = ?y_test.dim(), "testing labels shape");

    let hp = TrainingHyperparameters::default();
    let topology = Topology::from_config(config, hp.dropout);

    let (metrics, history) = TrainingContext::scoped(config, |ctx| {
        let network = Sequential::from_topology(&topology, config.input_shape(), &mut rng)?;
        let mut model = Model::compile(network, ctx, Loss::CategoricalCrossEntropy, Optimizer::adam(&hp), &mut rng);
        info!("model summary\n{}", model.summary());

        let mut trainer =
            Trainer::new(config.nb_epochs, config.batch_size, &hp).with_logger(CurveLogger::new(&config.log_dir));
        let history = trainer.fit(&mut model, ctx, x_train.view(), y_train.view(), &mut rng)?;

        let metrics = evaluate(&mut model, ctx, &x_test, &split.y_test, config.nb_classes)?;
        Ok((metrics, history))
    })?;

    info!("classification report\n{}", metrics.report(encoder.classes()));
    debug!("confusion matrix\n{}", metrics.confusion);

    Ok(Report {
        precision: metrics.precision,
        recall: metrics.recall,
        f1: metrics.f1,
        test_samples: split.y_test.len(),
        classes: encoder.classes().to_vec(),
        metrics,
        history,
        seed,
    })
}

fn evaluate(
    model: &mut Model,
    ctx: &TrainingContext,
    x_test: &Array4<f32>,
    y_test: &[usize],
    classes: usize,
) -> Result<Metrics> {
    let probabilities = model.predict(ctx, x_test.view())?;
    let predicted = argmax_rows(probabilities.view());
    Ok(Metrics::from_predictions(y_test, &predicted, classes))
}
