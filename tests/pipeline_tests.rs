use std::fs;
use std::path::Path;

use clap::Parser;
use ndarray::Array3;
use ndarray_npy::write_npy;

use thorax::data::{IMAGES_FILE, LABELS_FILE};
use thorax::{pipeline, Cli, Config, Error, LoadError, Padding};

const LABELS: [&str; 3] = ["Effusion", "Infiltration", "No Finding"];

fn write_dataset(dir: &Path, samples: usize, labels: &[&str]) {
    let images = Array3::<u8>::from_shape_fn((samples, 8, 8), |(n, r, c)| ((n * 31 + r * 8 + c) % 256) as u8);
    write_npy(dir.join(IMAGES_FILE), &images).unwrap();

    let mut table = String::from("Image_Index,Finding_Labels,Follow_Up_#\n");
    for n in 0..samples {
        table.push_str(&format!("{n:08}_000.png,{},0\n", labels[n % labels.len()]));
    }
    fs::write(dir.join(LABELS_FILE), table).unwrap();
}

fn small_config(dir: &Path) -> Config {
    Config {
        batch_size: 10,
        nb_classes: 3,
        nb_epochs: 1,
        test_data_size: 0.2,
        img_rows: 8,
        img_cols: 8,
        channels: 1,
        nb_filters: 2,
        kernel_size: (2, 2),
        data_dir: dir.to_path_buf(),
        log_dir: dir.join("Graph"),
        seed: Some(42),
        dense_units: 16,
        ..Config::default()
    }
}

#[test]
fn test_end_to_end_on_small_grayscale_images() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 100, &LABELS);

    let report = pipeline::run(&small_config(dir.path())).unwrap();

    assert_eq!(report.test_samples, 20);
    assert_eq!(report.classes, LABELS);
    for score in [report.precision, report.recall, report.f1] {
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }
    assert_eq!(report.history.epochs.len(), 1);
    assert_eq!(report.seed, 42);

    let curves = fs::read_to_string(dir.path().join("Graph").join("metrics.csv")).unwrap();
    assert_eq!(curves.lines().count(), 2);
}

#[test]
fn test_default_network_on_small_grayscale_images() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 100, &LABELS);
    let data_dir = dir.path().to_str().unwrap();
    let log_dir = dir.path().join("curves");

    // Everything but the image size, class count, epochs, batch and test size
    // keeps its default; the dense width only shrinks to keep the test quick.
    let cli = Cli::try_parse_from([
        "thorax",
        "-r",
        "8",
        "-c",
        "8",
        "-a",
        "3",
        "-e",
        "1",
        "-b",
        "10",
        "-s",
        "0.2",
        "--dense-units",
        "64",
        "--seed",
        "0",
        "--data-dir",
        data_dir,
        "--log-dir",
        log_dir.to_str().unwrap(),
    ])
    .unwrap();
    let config = Config::from(cli);
    assert_eq!(config.padding, Padding::Same);
    assert_eq!((config.nb_filters, config.kernel_size), (32, (2, 2)));

    let report = pipeline::run(&config).unwrap();

    assert_eq!(report.test_samples, 20);
    assert_eq!(report.metrics.confusion.classes(), 3);
    for score in [report.precision, report.recall, report.f1] {
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }
}

#[test]
fn test_seeded_runs_repeat() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 40, &LABELS);
    let config = small_config(dir.path());

    let first = pipeline::run(&config).unwrap();
    let second = pipeline::run(&config).unwrap();
    assert_eq!(first.precision, second.precision);
    assert_eq!(first.recall, second.recall);
    assert_eq!(first.f1, second.f1);
}

#[test]
fn test_missing_data_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir.path().join("nowhere"));

    let err = pipeline::run(&config).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::NotFound { .. })));
    assert!(err.to_string().contains("X_sample.npy"));
}

#[test]
fn test_more_labels_than_classes_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 20, &["A", "B", "C", "D"]);

    let err = pipeline::run(&small_config(dir.path())).unwrap_err();
    assert!(matches!(err, Error::TooManyLabels { found: 4, classes: 3 }));
}

#[test]
fn test_image_size_must_match_the_tensor() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 20, &LABELS);
    let config = Config {
        img_rows: 16,
        ..small_config(dir.path())
    };

    let err = pipeline::run(&config).unwrap_err();
    assert!(matches!(err, Error::Shape { actual: 64, rows: 16, cols: 8, channels: 1 }));
}

#[test]
fn test_collapsing_network_is_a_topology_error() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), 20, &LABELS);
    let config = Config {
        padding: Padding::Valid,
        ..small_config(dir.path())
    };

    let err = pipeline::run(&config).unwrap_err();
    assert!(matches!(err, Error::Topology(_)));
}

#[test]
fn test_invalid_test_fraction_is_rejected_by_the_parser() {
    for value in ["1.5", "-0.1"] {
        let parsed = Cli::try_parse_from(["thorax".to_string(), format!("--test-data-size={value}")]);
        assert!(parsed.is_err(), "{value} was accepted");
    }
}
