use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use thorax::{pipeline, Cli, Config};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = Config::from(Cli::parse());
    let report = pipeline::run(&config).context("chest X-ray analysis failed")?;

    println!("Precision: {}", report.precision);
    println!("Recall: {}", report.recall);
    println!("F1: {}", report.f1);
    Ok(())
}
