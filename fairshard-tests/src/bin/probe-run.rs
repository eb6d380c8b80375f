// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fairshard::config::{StrategyKind, StrategyOptions};
use fairshard::scenario::Scenario;
use fairshard::strategy;
use fairshard_tests::probe::{quick_config, ProbeWorker};

/// Run a short scenario with a probe worker and print its execution log as JSON.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t)]
    strategy: StrategyKind,

    #[arg(short = 'n', long = "number", value_delimiter = ',', default_value = "10,5")]
    sizes: Vec<u64>,

    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Milliseconds each probe job takes
    #[arg(long, default_value_t = 5)]
    work_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = quick_config(args.concurrency, &args.sizes);
    let strategy = strategy::build(args.strategy, &config, &StrategyOptions::default())?;

    let probe = ProbeWorker::new(Duration::from_millis(args.work_ms));
    Scenario::new(config, strategy)
        .unit_worker(Arc::new(probe.clone()))
        .run()?;

    println!("{}", serde_json::to_string_pretty(&probe.log())?);
    Ok(())
}
