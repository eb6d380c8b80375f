// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::str::FromStr;
use std::time::Duration;

use async_io::Timer;
use async_trait::async_trait;
use log::{debug, warn};

use crate::job_engine::node::LoopCreator;
use crate::job_engine::queue::QueueConfig;
use crate::store::{StoreClient, StoreError, Value};
use crate::strategy::{Batch, Route, Strategy, DEFAULT_QUEUE};

pub const FAST_QUEUE: &str = "fast";
pub const MEDIUM_QUEUE: &str = "medium";
pub const SLOW_QUEUE: &str = "slow";

/// Worker counts of the fast, medium and slow queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weights {
    pub fast: usize,
    pub medium: usize,
    pub slow: usize,
}

impl Weights {
    /// Two thirds fast, at least one slow, the rest medium.
    pub fn derive(concurrency: usize) -> Self {
        let fast = (concurrency as f64 * 0.66) as usize;
        let slow = ((concurrency as f64 * 0.15) as usize).max(1);
        let medium = concurrency.saturating_sub(fast + slow);
        Self { fast, medium, slow }
    }
}

impl FromStr for Weights {
    type Err = String;

    /// `fast,medium,slow`, e.g. `8,3,1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid weights '{s}': {e}"))?;
        match parts[..] {
            [fast, medium, slow] => Ok(Self { fast, medium, slow }),
            _ => Err(format!(
                "expected three weights (fast,medium,slow), got {}",
                parts.len()
            )),
        }
    }
}

fn credit_key(tenant: u64) -> String {
    format!("credits:{tenant}")
}

/// Spend one credit of `tenant` and pick the queue for the unit. Running out
/// of credits (or never having any) means the slow queue.
pub async fn select_queue(
    store: &StoreClient,
    tenant: u64,
    medium_threshold: i64,
) -> Result<&'static str, StoreError> {
    let credits = store.decr(&credit_key(tenant)).await?.map(|v| v.as_i64());
    Ok(match credits {
        None => SLOW_QUEUE,
        Some(c) if c <= 0 => SLOW_QUEUE,
        Some(c) if c < medium_threshold => MEDIUM_QUEUE,
        Some(_) => FAST_QUEUE,
    })
}

/// Top up every tenant below `max` by `max / 2`, capped at `max`. Returns how
/// many tenants were topped up.
pub async fn refill(store: &StoreClient, tenants: &[u64], max: i64) -> Result<usize, StoreError> {
    let mut refilled = 0;
    for &tenant in tenants {
        let key = credit_key(tenant);
        let current = store.get(&key).await?.map(|v| v.as_i64()).unwrap_or(0);
        if current < max {
            let next = max.min(current + max / 2);
            store.set(&key, Value::Int(next)).await?;
            debug!("Refilled tenant {tenant} from {current} to {next} credits");
            refilled += 1;
        }
    }
    Ok(refilled)
}

async fn refill_loop(store: StoreClient, tenants: Vec<u64>, max: i64, interval: Duration) {
    loop {
        Timer::after(interval).await;
        if let Err(e) = refill(&store, &tenants, max).await {
            warn!("Credit refill stopped: {e}");
            break;
        }
    }
}

/// Fast, medium and slow queues; every unit costs its tenant one credit and
/// the remaining credit decides the queue. Credits are refilled periodically.
#[derive(Debug, Clone)]
pub struct BalancedShards {
    store: StoreClient,
    weights: Weights,
    credits: i64,
    tenants: Vec<u64>,
    refill_interval: Duration,
}

impl BalancedShards {
    pub fn new(
        store: StoreClient,
        weights: Weights,
        credits: i64,
        tenants: Vec<u64>,
        refill_interval: Duration,
    ) -> Self {
        Self {
            store,
            weights,
            credits,
            tenants,
            refill_interval,
        }
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }
}

#[async_trait(?Send)]
impl Strategy for BalancedShards {
    fn name(&self) -> &'static str {
        "balanced-shards"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        vec![
            QueueConfig::new(DEFAULT_QUEUE, 2),
            QueueConfig::new(FAST_QUEUE, self.weights.fast.max(1)),
            QueueConfig::new(MEDIUM_QUEUE, self.weights.medium.max(1)),
            QueueConfig::new(SLOW_QUEUE, self.weights.slow.max(1)),
        ]
    }

    /// Seeds the tenant's credits. The extra credit is spent by the first
    /// unit, so `credits` units go to the fast queue.
    async fn plan(&self, batch: &mut Batch) -> anyhow::Result<()> {
        self.store
            .set(&credit_key(batch.tenant), Value::Int(self.credits + 1))
            .await?;
        batch.medium_threshold = Some(self.credits / 2);
        Ok(())
    }

    async fn route(&self, batch: &Batch, _unit: u64) -> anyhow::Result<Route> {
        let threshold = batch.medium_threshold.unwrap_or(self.credits / 2);
        let queue = select_queue(&self.store, batch.tenant, threshold).await?;
        Ok(Route::now(queue))
    }

    fn background(&self) -> Option<LoopCreator> {
        let store = self.store.clone();
        let tenants = self.tenants.clone();
        let max = self.credits;
        let interval = self.refill_interval;
        Some(Box::new(move || {
            Box::pin(refill_loop(store, tenants, max, interval))
        }))
    }
}
