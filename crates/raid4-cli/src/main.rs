mod cli;
mod inspect;
mod repl;

use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use raid4_rs::StorageArray;
use raid4_rs::metrics::{self, Tally};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let cfg = args.to_config();
            let tally = args.metrics.then(|| {
                let tally = Arc::new(Tally::new());
                if !metrics::install_metrics_sink(tally.clone()) {
                    warn!("metrics sink already installed");
                }
                tally
            });
            let mut array = StorageArray::init_all(cfg).context("failed to start array")?;
            info!(
                blocks = array.capacity_blocks(),
                block_size = array.block_size(),
                "ready"
            );
            let stdin = io::stdin();
            let stdout = io::stdout();
            // On error the array is dropped, which kills the remaining workers.
            let outcome = repl::run(&mut array, stdin.lock(), stdout.lock());
            if let Some(tally) = &tally {
                tally.log_summary();
            }
            outcome?;
            array.shutdown();
            Ok(())
        }
        Command::Inspect(args) => inspect::run(&args, &mut io::stdout().lock()),
    }
}
