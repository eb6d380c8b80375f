// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::{bail, ensure};
use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::job_engine::queue::QueueConfig;
use crate::strategy::{shard_names, Batch, Route, Strategy, DEFAULT_QUEUE};

/// Queues shared by both shard strategies: a small `default` for the dispatch
/// jobs plus one queue per shard with an equal share of the worker budget.
fn shard_topology(concurrency: usize, shards: &[String]) -> Vec<QueueConfig> {
    let per_shard = (concurrency / shards.len().max(1)).max(1);
    std::iter::once(QueueConfig::new(DEFAULT_QUEUE, 2))
        .chain(shards.iter().map(|name| QueueConfig::new(name.clone(), per_shard)))
        .collect()
}

/// Units are spread round robin over the shards picked for the batch.
fn route_round_robin(batch: &Batch, unit: u64) -> anyhow::Result<Route> {
    if batch.shards.is_empty() {
        bail!("batch of tenant {} carries no shard", batch.tenant);
    }
    let idx = (unit % batch.shards.len() as u64) as usize;
    Ok(Route::now(batch.shards[idx].clone()))
}

/// Every tenant always lands on the same shard.
#[derive(Debug, Clone)]
pub struct StaticShards {
    concurrency: usize,
    shards: Vec<String>,
    mapping: Vec<usize>,
}

impl StaticShards {
    /// `mapping[tenant]` is the shard index of a tenant. Tenants past the end
    /// of the mapping wrap around.
    pub fn new(concurrency: usize, shards: usize, mapping: Vec<usize>) -> anyhow::Result<Self> {
        ensure!(shards > 0, "at least one shard is required");
        ensure!(!mapping.is_empty(), "the tenant to shard mapping is empty");
        if let Some(bad) = mapping.iter().find(|&&idx| idx >= shards) {
            bail!("mapping refers to shard {bad}, but there are only {shards} shards");
        }
        Ok(Self {
            concurrency,
            shards: shard_names(shards),
            mapping,
        })
    }

    pub fn shard_of(&self, tenant: u64) -> &str {
        let idx = self.mapping[(tenant % self.mapping.len() as u64) as usize];
        &self.shards[idx]
    }
}

#[async_trait(?Send)]
impl Strategy for StaticShards {
    fn name(&self) -> &'static str {
        "shards"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        shard_topology(self.concurrency, &self.shards)
    }

    async fn plan(&self, batch: &mut Batch) -> anyhow::Result<()> {
        batch.shards.clear();
        batch.shards.push(self.shard_of(batch.tenant).to_string());
        Ok(())
    }

    async fn route(&self, batch: &Batch, unit: u64) -> anyhow::Result<Route> {
        route_round_robin(batch, unit)
    }
}

/// Each batch draws its shards at random, so a heavy tenant does not keep
/// hitting the same neighbours.
#[derive(Debug, Clone)]
pub struct ShuffleShards {
    concurrency: usize,
    shards: Vec<String>,
    per_batch: usize,
}

impl ShuffleShards {
    pub fn new(concurrency: usize, shards: usize, per_batch: usize) -> anyhow::Result<Self> {
        ensure!(shards > 0, "at least one shard is required");
        ensure!(
            (1..=shards).contains(&per_batch),
            "shards per batch must be between 1 and {shards}, got {per_batch}"
        );
        Ok(Self {
            concurrency,
            shards: shard_names(shards),
            per_batch,
        })
    }
}

#[async_trait(?Send)]
impl Strategy for ShuffleShards {
    fn name(&self) -> &'static str {
        "shuffle-shards"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        shard_topology(self.concurrency, &self.shards)
    }

    async fn plan(&self, batch: &mut Batch) -> anyhow::Result<()> {
        let picked = self
            .shards
            .choose_multiple(&mut rand::thread_rng(), self.per_batch)
            .cloned();
        batch.shards.clear();
        batch.shards.extend(picked);
        Ok(())
    }

    async fn route(&self, batch: &Batch, unit: u64) -> anyhow::Result<Route> {
        route_round_robin(batch, unit)
    }
}
