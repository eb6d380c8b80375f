// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;

use crate::strategy::balanced::Weights;

/// Timing knobs of the engine. The defaults match the one-second cadence the
/// benchmark scripts are tuned for; tests shrink them.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Delay scheduler tick. Delayed jobs run at most this late.
    pub tick_interval: Duration,
    /// How often the node asks the aggregator for the running count.
    pub poll_interval: Duration,
    /// Minimum time between two live frames.
    pub refresh_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(1),
        }
    }
}

/// One tenant's batch: its size and an optional submission delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub size: u64,
    pub delay: Option<Duration>,
}

impl FromStr for Scale {
    type Err = String;

    /// `300` or `300:5` (five seconds delay, fractions allowed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (size, delay) = match s.trim().split_once(':') {
            Some((size, delay)) => (size, Some(delay)),
            None => (s.trim(), None),
        };
        let size = size
            .parse::<u64>()
            .map_err(|e| format!("invalid batch size '{size}': {e}"))?;
        let delay = match delay {
            None => None,
            Some(d) => {
                let secs = d
                    .parse::<f64>()
                    .map_err(|e| format!("invalid delay '{d}': {e}"))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(format!("delay must be a non-negative number, got '{d}'"));
                }
                let delay = Duration::try_from_secs_f64(secs)
                    .map_err(|e| format!("invalid delay '{d}': {e}"))?;
                Some(delay)
            }
        };
        Ok(Scale { size, delay })
    }
}

/// Immutable run configuration, built once and shared by every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total worker budget.
    pub concurrency: usize,
    /// One entry per tenant; the tenant id is the index.
    pub scales: Vec<Scale>,
    pub head_size: usize,
    pub stats_reset_interval: Duration,
    /// Pause between two batch submissions.
    pub submit_gap: Duration,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 12,
            scales: [300, 20, 500, 30, 200, 20]
                .into_iter()
                .map(|size| Scale { size, delay: None })
                .collect(),
            head_size: 20,
            stats_reset_interval: Duration::from_secs(10),
            submit_gap: Duration::from_secs(1),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn tenants(&self) -> impl Iterator<Item = (u64, Scale)> + '_ {
        self.scales.iter().enumerate().map(|(i, s)| (i as u64, *s))
    }

    pub fn tenant_ids(&self) -> Vec<u64> {
        self.tenants().map(|(id, _)| id).collect()
    }

    /// Every unit plus one dispatch job per batch.
    pub fn total_jobs(&self) -> usize {
        self.scales.iter().map(|s| s.size as usize + 1).sum()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    /// One shared queue, first come first served
    Baseline,
    /// A fixed shard queue per tenant
    Shards,
    /// A random shard queue per batch
    ShuffleShards,
    /// Fast/medium/slow queues chosen by per-tenant credits
    BalancedShards,
    /// Reschedule a tenant's jobs that arrive faster than the throttle period
    Throttle,
    /// Run a batch's units inside the batch job, re-enqueueing it when its time is up
    Iteration,
}

/// Strategy specific parameters. Unset values fall back to per-strategy
/// defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOptions {
    pub shards: Option<usize>,
    pub mapping: Vec<usize>,
    pub shards_per_batch: usize,
    pub weights: Option<Weights>,
    pub credits: Option<i64>,
    pub throttle_period: Duration,
    pub throttler_workers: usize,
    /// Time a batch job may spend on its units before it re-enqueues itself.
    pub max_time: Duration,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            shards: None,
            mapping: vec![0, 1, 2, 1, 3, 1],
            shards_per_batch: 1,
            weights: None,
            credits: None,
            throttle_period: Duration::from_millis(200),
            throttler_workers: 4,
            max_time: Duration::from_secs(2),
        }
    }
}
