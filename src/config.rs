//! Command line parsing into the run configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Convolution border handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, serde::Serialize)]
pub enum Padding {
    /// Zero padding that keeps the spatial size
    Same,
    /// No padding; every convolution shrinks the image by kernel - 1
    Valid,
}

/// Analyze chest X-ray images with a convolutional network.
///
/// The input data is produced by a separate preprocessing step and is read
/// from <data-dir>/X_sample.npy and <data-dir>/sample_labels.csv.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "thorax",
    version,
    disable_version_flag = true,
    after_help = "Example:\n  thorax -b 100 -a 15 -e 20 -s 0.2 -r 256 -c 256 -d 1 -f 32 -k 2 2"
)]
pub struct Cli {
    /// Display the current version of the program and exit
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    /// Number of samples used per iteration to train the model
    #[arg(short = 'b', long, default_value_t = 100, value_parser = positive_count)]
    pub batch_size: usize,

    /// Total number of classes the data has
    #[arg(short = 'a', long, default_value_t = 15, value_parser = positive_count)]
    pub nb_classes: usize,

    /// Number of complete passes through the training data
    #[arg(short = 'e', long, default_value_t = 20, value_parser = positive_count)]
    pub nb_epochs: usize,

    /// Fraction of the data held out as test data, between 0.0 and 1.0
    #[arg(short = 's', long, default_value_t = 0.2, value_parser = test_data_size)]
    pub test_data_size: f64,

    /// Train on GPUs
    #[arg(long, alias = "use_GPU")]
    pub use_gpu: bool,

    /// Number of GPUs used for data-parallel training (with --use-gpu)
    #[arg(short = 'g', long, default_value_t = 8, value_parser = positive_count)]
    pub nb_gpus: usize,

    /// Number of rows in each image
    #[arg(short = 'r', long, default_value_t = 256, value_parser = positive_count)]
    pub img_rows: usize,

    /// Number of columns in each image
    #[arg(short = 'c', long, alias = "img_collums", default_value_t = 256, value_parser = positive_count)]
    pub img_cols: usize,

    /// Grayscale (1) or RGB (3)
    #[arg(short = 'd', long, default_value_t = 1, value_parser = channel_count)]
    pub channels: usize,

    /// Number of filters in the first convolution block; doubles in every later block
    #[arg(short = 'f', long, default_value_t = 32, value_parser = positive_count)]
    pub nb_filters: usize,

    /// Height and width of the first convolution window; doubles in every later block
    #[arg(
        short = 'k',
        long,
        num_args = 2,
        value_names = ["HEIGHT", "WIDTH"],
        default_values_t = [2, 2],
        value_parser = positive_count
    )]
    pub kernel_size: Vec<usize>,

    /// Directory holding X_sample.npy and sample_labels.csv
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory that receives the training curves
    #[arg(long, default_value = "Graph")]
    pub log_dir: PathBuf,

    /// Seed for splitting, shuffling and initialisation; random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Convolution padding
    #[arg(long, value_enum, default_value_t = Padding::Same)]
    pub padding: Padding,

    /// Width of the two hidden dense layers
    #[arg(long, default_value_t = 4096, value_parser = positive_count)]
    pub dense_units: usize,
}

fn test_data_size(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("{s:?} is not a number"))?;
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err("the test data size is invalid. It should be between 0.0 and 1.0".to_string())
    }
}

fn positive_count(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("{s:?} is not a positive integer")),
    }
}

fn channel_count(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n @ (1 | 3)) => Ok(n),
        _ => Err("channels must be 1 (grayscale) or 3 (RGB)".to_string()),
    }
}

/// Immutable parameters of one run
#[derive(Debug, Clone)]
pub struct Config {
    pub batch_size: usize,
    pub nb_classes: usize,
    pub nb_epochs: usize,
    pub test_data_size: f64,
    pub use_gpu: bool,
    pub nb_gpus: usize,
    pub img_rows: usize,
    pub img_cols: usize,
    pub channels: usize,
    pub nb_filters: usize,
    pub kernel_size: (usize, usize),
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub seed: Option<u64>,
    pub padding: Padding,
    pub dense_units: usize,
}

impl Config {
    pub fn input_shape(&self) -> (usize, usize, usize) {
        (self.img_rows, self.img_cols, self.channels)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 100,
            nb_classes: 15,
            nb_epochs: 20,
            test_data_size: 0.2,
            use_gpu: false,
            nb_gpus: 8,
            img_rows: 256,
            img_cols: 256,
            channels: 1,
            nb_filters: 32,
            kernel_size: (2, 2),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("Graph"),
            seed: None,
            padding: Padding::Same,
            dense_units: 4096,
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        // clap enforces exactly two values
        let kernel_size = (cli.kernel_size[0], cli.kernel_size[1]);
        Config {
            batch_size: cli.batch_size,
            nb_classes: cli.nb_classes,
            nb_epochs: cli.nb_epochs,
            test_data_size: cli.test_data_size,
            use_gpu: cli.use_gpu,
            nb_gpus: cli.nb_gpus,
            img_rows: cli.img_rows,
            img_cols: cli.img_cols,
            channels: cli.channels,
            nb_filters: cli.nb_filters,
            kernel_size,
            data_dir: cli.data_dir,
            log_dir: cli.log_dir,
            seed: cli.seed,
            padding: cli.padding,
            dense_units: cli.dense_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        let argv = std::iter::once("thorax").chain(args.iter().copied());
        Cli::try_parse_from(argv).map(Config::from)
    }

    #[test]
    fn test_defaults_match_config_default() {
        let parsed = parse(&[]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.batch_size, default.batch_size);
        assert_eq!(parsed.nb_classes, default.nb_classes);
        assert_eq!(parsed.nb_epochs, default.nb_epochs);
        assert_eq!(parsed.test_data_size, default.test_data_size);
        assert_eq!(parsed.nb_gpus, default.nb_gpus);
        assert_eq!(parsed.input_shape(), (256, 256, 1));
        assert_eq!(parsed.kernel_size, (2, 2));
        assert_eq!(parsed.padding, Padding::Same);
        assert!(!parsed.use_gpu);
    }

    #[test]
    fn test_full_example_query() {
        let config = parse(&[
            "-b", "50", "-a", "3", "-e", "4", "-s", "0.3", "-r", "64", "-c", "32", "-d", "3", "-f", "8", "-k", "3",
            "5", "--use-gpu", "-g", "2",
        ])
        .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.nb_classes, 3);
        assert_eq!(config.test_data_size, 0.3);
        assert_eq!(config.input_shape(), (64, 32, 3));
        assert_eq!(config.kernel_size, (3, 5));
        assert!(config.use_gpu);
        assert_eq!(config.nb_gpus, 2);
    }

    #[test]
    fn test_test_data_size_is_validated() {
        for bad in ["1.5", "-0.1", "0", "1", "abc"] {
            assert!(parse(&["-s", bad]).is_err(), "accepted {bad}");
        }
        assert!(parse(&["-s", "0.5"]).is_ok());
    }

    #[test]
    fn test_channels_and_counts_are_validated() {
        assert!(parse(&["-d", "2"]).is_err());
        assert!(parse(&["-b", "0"]).is_err());
        assert!(parse(&["-k", "2"]).is_err());
        assert!(parse(&["-k", "0", "2"]).is_err());
    }

    #[test]
    fn test_version_flag_wins_over_other_arguments() {
        let cases: [&[&str]; 3] = [&["thorax", "-v"], &["thorax", "-v", "-s", "1.5"], &["thorax", "--version", "-d", "2"]];
        for args in cases {
            let err = Cli::try_parse_from(args).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion, "{args:?}");
            assert!(err.to_string().contains(env!("CARGO_PKG_VERSION")));
        }
    }
}
