use anyhow::Result;
use clap::Parser;
use options::Cli;

mod batch;
mod fit;
mod options;
mod progress;

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse() {
        Cli::Fit(fit) => fit.run(),
        Cli::Batch(batch) => batch.run(),
    }
}
