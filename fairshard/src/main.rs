// SPDX-License-Identifier: MIT
// fairshard: run one multi-tenant batch benchmark against a fairness strategy
//
// - Every tenant submits one batch of mailer jobs.
// - The strategy decides which queue each job of the batch lands on.
// - Prints the per-worker lanes while running and a latency table at the end.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;

use fairshard::config::{Config, EngineConfig, Scale, StrategyKind, StrategyOptions};
use fairshard::scenario::Scenario;
use fairshard::stats::{NullReporter, Reporter};
use fairshard::strategy::{self, balanced::Weights};

mod render;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Fairness strategy
    #[arg(long, value_enum, default_value_t)]
    strategy: StrategyKind,

    /// Batch size per tenant, optionally with a delay in seconds (e.g. "300,20:5,500")
    #[arg(
        short = 'n',
        long = "number",
        value_name = "SCALES",
        value_delimiter = ',',
        default_value = "300,20,500,30,200,20"
    )]
    scales: Vec<Scale>,

    /// Total number of workers
    #[arg(short, long, default_value_t = 12)]
    concurrency: usize,

    /// Number of jobs at the start of a burst that count as its head
    #[arg(long, default_value_t = 20)]
    head_size: usize,

    /// Seconds without new jobs after which a tenant's next job starts a new head.
    /// Also the credit refill period of balanced-shards.
    #[arg(long, value_name = "SECS", default_value_t = 10.0)]
    stats_reset_interval: f64,

    /// Number of shards (shards: 4, shuffle-shards: 2)
    #[arg(short, long)]
    shards: Option<usize>,

    /// Tenant to shard mapping (e.g. "0,1,2,1,0")
    #[arg(short, long, value_delimiter = ',')]
    mapping: Option<Vec<usize>>,

    /// Shards drawn per batch by shuffle-shards
    #[arg(long, default_value_t = 1)]
    shards_per_batch: usize,

    /// Workers of the fast, medium and slow queues (e.g. "8,3,1")
    #[arg(long, value_name = "FAST,MEDIUM,SLOW")]
    weights: Option<Weights>,

    /// Initial credits per tenant, the number of jobs to run on the fast queue (default: head size)
    #[arg(long)]
    credits: Option<i64>,

    /// Throttle period in seconds
    #[arg(long, value_name = "SECS", default_value_t = 0.2)]
    throttle: f64,

    /// Workers of the throttler queue
    #[arg(long, default_value_t = 4)]
    throttler_workers: usize,

    /// Seconds a batch job may run its units before it re-enqueues itself (iteration)
    #[arg(short, long = "time", value_name = "SECS", default_value_t = 2.0)]
    time: f64,

    /// Seconds between two batch submissions
    #[arg(long, value_name = "SECS", default_value_t = 1.0)]
    submit_gap: f64,

    /// Seconds between two redraws of the live view
    #[arg(long, value_name = "SECS", default_value_t = 1.0)]
    refresh_interval: f64,

    /// Print the telemetry and the report as JSON instead of drawing them
    #[arg(long)]
    json: bool,
}

fn duration_arg(name: &str, secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{name}: {e}"))
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.concurrency == 0 {
        return Err("--concurrency must be at least 1".into());
    }
    if args.scales.is_empty() {
        return Err("--number needs at least one batch size".into());
    }
    if args.head_size == 0 {
        return Err("--head-size must be at least 1".into());
    }

    for (name, secs) in [
        ("--stats-reset-interval", args.stats_reset_interval),
        ("--refresh-interval", args.refresh_interval),
    ] {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(format!("{name} must be a positive number of seconds"));
        }
        duration_arg(name, secs)?;
    }
    for (name, secs) in [
        ("--throttle", args.throttle),
        ("--submit-gap", args.submit_gap),
        ("--time", args.time),
    ] {
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("{name} must not be negative"));
        }
        duration_arg(name, secs)?;
    }

    if args.shards == Some(0) {
        return Err("--shards must be at least 1".into());
    }
    if args.shards_per_batch == 0 {
        return Err("--shards-per-batch must be at least 1".into());
    }
    if let (Some(shards), Some(mapping)) = (args.shards, &args.mapping) {
        if let Some(bad) = mapping.iter().find(|&&idx| idx >= shards) {
            return Err(format!(
                "--mapping refers to shard {bad}, but there are only {shards} shards"
            ));
        }
    }
    if args.credits.is_some_and(|c| c < 0) {
        return Err("--credits must not be negative".into());
    }
    if args.throttler_workers == 0 {
        return Err("--throttler-workers must be at least 1".into());
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<(Config, StrategyOptions), String> {
    let config = Config {
        concurrency: args.concurrency,
        scales: args.scales.clone(),
        head_size: args.head_size,
        stats_reset_interval: duration_arg("--stats-reset-interval", args.stats_reset_interval)?,
        submit_gap: duration_arg("--submit-gap", args.submit_gap)?,
        engine: EngineConfig {
            refresh_interval: duration_arg("--refresh-interval", args.refresh_interval)?,
            ..EngineConfig::default()
        },
    };

    let defaults = StrategyOptions::default();
    let options = StrategyOptions {
        shards: args.shards,
        mapping: args.mapping.clone().unwrap_or(defaults.mapping),
        shards_per_batch: args.shards_per_batch,
        weights: args.weights,
        credits: args.credits,
        throttle_period: duration_arg("--throttle", args.throttle)?,
        throttler_workers: args.throttler_workers,
        max_time: duration_arg("--time", args.time)?,
    };
    Ok((config, options))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let (config, options) = match validate_args(&args).and_then(|_| build_config(&args)) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    info!("Config: {config:?}");
    info!("Strategy {:?}: {options:?}", args.strategy);

    let strategy = strategy::build(args.strategy, &config, &options)?;
    let reporter: Arc<dyn Reporter> = if args.json {
        Arc::new(NullReporter)
    } else {
        Arc::new(render::TerminalReporter::new())
    };

    let outcome = Scenario::new(config, strategy).reporter(reporter).run()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", render::report_text(&outcome.report));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("fairshard").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_build_a_config() {
        let args = args(&[]);
        validate_args(&args).unwrap();
        let (config, options) = build_config(&args).unwrap();
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.scales.len(), 6);
        assert_eq!(options.max_time, Duration::from_secs(2));
        assert_eq!(options.throttler_workers, 4);
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        for extra in [
            ["--stats-reset-interval", "1e30"],
            ["--submit-gap", "1e30"],
            ["--throttle", "1e30"],
            ["--time", "1e30"],
        ] {
            let args = args(&extra);
            assert!(validate_args(&args).is_err(), "{extra:?} accepted");
            assert!(build_config(&args).is_err(), "{extra:?} built");
        }
        assert!(Args::try_parse_from(["fairshard", "-n", "1:1e30"]).is_err());
    }

    #[test]
    fn test_iteration_takes_its_time_budget() {
        let args = args(&["--strategy", "iteration", "-t", "0.5"]);
        assert_eq!(args.strategy, StrategyKind::Iteration);
        let (_, options) = build_config(&args).unwrap();
        assert_eq!(options.max_time, Duration::from_millis(500));
    }
}
