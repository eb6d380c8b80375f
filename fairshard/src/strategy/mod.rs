// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! Fairness and admission strategies.
//!
//! A strategy is injected into the batch dispatch worker. It declares the
//! queues it needs, may annotate a batch when it is submitted, and routes
//! every unit of the batch to a queue. Throttling additionally puts an
//! admission gate in front of the unit worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::json;
use smallvec::SmallVec;

use crate::config::{Config, StrategyKind, StrategyOptions};
use crate::job_engine::job::{Payload, TENANT_KEY};
use crate::job_engine::node::LoopCreator;
use crate::job_engine::queue::QueueConfig;
use crate::store::SharedStore;
use crate::worker::AdmissionGate;

use balanced::Weights;

pub mod balanced;
pub mod baseline;
pub mod iteration;
pub mod shards;
pub mod throttle;

pub const DEFAULT_QUEUE: &str = "default";

pub const TOTAL_KEY: &str = "total";
pub const SHARD_KEY: &str = "shard";
pub const SHARDS_KEY: &str = "shards";
pub const MEDIUM_THRESHOLD_KEY: &str = "medium_threshold";
pub const POOL_KEY: &str = "pool";
pub const CURSOR_KEY: &str = "cursor";
pub const MAX_TIME_KEY: &str = "max_time";

/// What the dispatch worker knows about a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub tenant: u64,
    pub total: u64,
    /// Shard queues assigned at submission, used round robin.
    pub shards: SmallVec<[String; 4]>,
    pub medium_threshold: Option<i64>,
    /// Units already run by earlier passes of an iterated batch.
    pub cursor: u64,
    /// Set on batches whose units run inside the batch job itself.
    pub max_time: Option<Duration>,
}

impl Batch {
    pub fn new(tenant: u64, total: u64) -> Self {
        Self {
            tenant,
            total,
            ..Self::default()
        }
    }

    pub fn write_into(&self, payload: &mut Payload) {
        payload.insert(TENANT_KEY.into(), json!(self.tenant));
        payload.insert(TOTAL_KEY.into(), json!(self.total));
        match self.shards.as_slice() {
            [] => {}
            [shard] => {
                payload.insert(SHARD_KEY.into(), json!(shard));
            }
            shards => {
                payload.insert(SHARDS_KEY.into(), json!(shards));
            }
        }
        if let Some(threshold) = self.medium_threshold {
            payload.insert(MEDIUM_THRESHOLD_KEY.into(), json!(threshold));
        }
        if self.cursor > 0 {
            payload.insert(CURSOR_KEY.into(), json!(self.cursor));
        }
        if let Some(max_time) = self.max_time {
            payload.insert(MAX_TIME_KEY.into(), json!(max_time.as_secs_f64()));
        }
    }

    /// Units not yet run.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.cursor)
    }

    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        self.write_into(&mut payload);
        payload
    }

    /// Read the batch from a dispatch payload, stripping the routing keys.
    /// The tenant stays: units carry it for telemetry.
    pub fn take_from(payload: &mut Payload) -> anyhow::Result<Self> {
        let tenant = payload
            .get(TENANT_KEY)
            .and_then(|v| v.as_u64())
            .context("batch payload without a tenant")?;
        let total = payload
            .remove(TOTAL_KEY)
            .and_then(|v| v.as_u64())
            .context("batch payload without a total")?;

        let mut shards = SmallVec::new();
        if let Some(shard) = payload.remove(SHARD_KEY) {
            let shard = shard
                .as_str()
                .ok_or_else(|| anyhow!("shard must be a string, got {shard}"))?;
            shards.push(shard.to_string());
        }
        if let Some(list) = payload.remove(SHARDS_KEY) {
            let list = list
                .as_array()
                .ok_or_else(|| anyhow!("shards must be a list, got {list}"))?;
            for shard in list {
                let shard = shard
                    .as_str()
                    .ok_or_else(|| anyhow!("shard must be a string, got {shard}"))?;
                shards.push(shard.to_string());
            }
        }

        let medium_threshold = payload
            .remove(MEDIUM_THRESHOLD_KEY)
            .and_then(|v| v.as_i64());
        let cursor = payload
            .remove(CURSOR_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let max_time = match payload.remove(MAX_TIME_KEY) {
            None => None,
            Some(secs) => {
                let secs = secs
                    .as_f64()
                    .ok_or_else(|| anyhow!("max_time must be a number, got {secs}"))?;
                Some(Duration::try_from_secs_f64(secs).context("invalid max_time")?)
            }
        };
        payload.remove(POOL_KEY);

        Ok(Self {
            tenant,
            total,
            shards,
            medium_threshold,
            cursor,
            max_time,
        })
    }
}

/// Where one unit goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub pool: String,
    pub delay: Option<Duration>,
}

impl Route {
    pub fn now(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            delay: None,
        }
    }
}

#[async_trait(?Send)]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Queues this strategy routes to, `default` included.
    fn topology(&self) -> Vec<QueueConfig>;

    /// Producer side, once per batch before it is submitted.
    async fn plan(&self, _batch: &mut Batch) -> anyhow::Result<()> {
        Ok(())
    }

    /// Dispatch side, once per unit.
    async fn route(&self, batch: &Batch, unit: u64) -> anyhow::Result<Route>;

    fn admission(&self) -> Option<Arc<dyn AdmissionGate>> {
        None
    }

    /// Long running companion loop, started with the node.
    fn background(&self) -> Option<LoopCreator> {
        None
    }
}

/// `a`, `b`, ... `z`, then `s26`, `s27`, ...
pub fn shard_names(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match u8::try_from(i) {
            Ok(i) if i < 26 => ((b'a' + i) as char).to_string(),
            _ => format!("s{i}"),
        })
        .collect()
}

pub fn build(
    kind: StrategyKind,
    config: &Config,
    options: &StrategyOptions,
) -> anyhow::Result<Arc<dyn Strategy>> {
    let strategy: Arc<dyn Strategy> = match kind {
        StrategyKind::Baseline => Arc::new(baseline::Baseline::new(config.concurrency)),
        StrategyKind::Shards => Arc::new(shards::StaticShards::new(
            config.concurrency,
            options.shards.unwrap_or(4),
            options.mapping.clone(),
        )?),
        StrategyKind::ShuffleShards => Arc::new(shards::ShuffleShards::new(
            config.concurrency,
            options.shards.unwrap_or(2),
            options.shards_per_batch,
        )?),
        StrategyKind::BalancedShards => {
            let credits = options.credits.unwrap_or(config.head_size as i64);
            Arc::new(balanced::BalancedShards::new(
                SharedStore::spawn()?,
                options
                    .weights
                    .unwrap_or_else(|| Weights::derive(config.concurrency)),
                credits,
                config.tenant_ids(),
                config.stats_reset_interval,
            ))
        }
        StrategyKind::Throttle => Arc::new(throttle::Throttle::new(
            SharedStore::spawn()?,
            config.concurrency,
            options.throttle_period,
            options.throttler_workers,
        )),
        StrategyKind::Iteration => Arc::new(iteration::Iteration::new(
            config.concurrency,
            options.max_time,
        )),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_from_strips_routing_keys() {
        let mut batch = Batch::new(3, 10);
        batch.shards.push("a".into());
        batch.shards.push("c".into());
        batch.medium_threshold = Some(5);
        batch.cursor = 4;
        batch.max_time = Some(Duration::from_millis(1500));

        let mut payload = batch.to_payload();
        payload.insert("subject".into(), json!("hello"));
        payload.insert(POOL_KEY.into(), json!("default"));

        let read = Batch::take_from(&mut payload).unwrap();
        assert_eq!(read, batch);
        let keys: Vec<&String> = payload.keys().collect();
        assert_eq!(keys, ["subject", "tenant"]);
    }

    #[test]
    fn test_single_shard_is_written_as_shard() {
        let mut batch = Batch::new(0, 1);
        batch.shards.push("b".into());
        let payload = batch.to_payload();
        assert_eq!(payload.get(SHARD_KEY), Some(&json!("b")));
        assert!(!payload.contains_key(SHARDS_KEY));
    }

    #[test]
    fn test_batch_without_total_is_rejected() {
        let mut payload = Payload::new();
        payload.insert(TENANT_KEY.into(), json!(1));
        assert!(Batch::take_from(&mut payload).is_err());
    }

    #[test]
    fn test_fresh_iterated_batch_has_no_cursor() {
        let mut batch = Batch::new(1, 5);
        batch.max_time = Some(Duration::from_secs(2));
        let mut payload = batch.to_payload();
        assert!(!payload.contains_key(CURSOR_KEY));
        assert_eq!(payload.get(MAX_TIME_KEY), Some(&json!(2.0)));

        let read = Batch::take_from(&mut payload).unwrap();
        assert_eq!(read.cursor, 0);
        assert_eq!(read.remaining(), 5);

        payload.insert(TOTAL_KEY.into(), json!(5));
        payload.insert(MAX_TIME_KEY.into(), json!("soon"));
        assert!(Batch::take_from(&mut payload).is_err());
    }

    #[test]
    fn test_shard_names() {
        assert_eq!(shard_names(3), ["a", "b", "c"]);
        assert_eq!(shard_names(28)[26], "s26");
    }
}
