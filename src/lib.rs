pub mod activation;
pub mod config;
pub mod context;
pub mod curves;
pub mod data;
pub mod error;
pub mod gpu_layers;
pub mod hyperparameters;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod pipeline;
pub mod preprocess;
pub mod topology;
pub mod trainer;
pub mod utils;

pub use activation::ActivationType;
pub use config::{Cli, Config, Padding};
pub use context::TrainingContext;
pub use data::Dataset;
pub use error::{Error, LoadError, Result};
pub use layers::Layer;
pub use loss::Loss;
pub use metrics::Metrics;
pub use model::{Model, Sequential};
pub use optimizer::Optimizer;
pub use pipeline::Report;
pub use topology::Topology;
