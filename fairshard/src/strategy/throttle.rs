// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use log::debug;
use serde_json::json;

use crate::clock;
use crate::job_engine::job::Job;
use crate::job_engine::queue::QueueConfig;
use crate::store::{StoreClient, Value};
use crate::strategy::{Batch, Route, Strategy, DEFAULT_QUEUE};
use crate::worker::{AdmissionGate, JobContext};

pub const THROTTLER_QUEUE: &str = "throttler";

/// Set on a job that already went through the gate.
pub const SKIP_THROTTLE_KEY: &str = "skip_throttle";
/// Per-job override of the throttle period, in seconds.
pub const THROTTLE_KEY: &str = "throttle";

/// Units first pass a small `throttler` queue whose gate lets at most one job
/// per tenant and period through to `default`, pushing the rest into the
/// future.
#[derive(Clone)]
pub struct Throttle {
    gate: Arc<ThrottleGate>,
    concurrency: usize,
    throttler_workers: usize,
}

impl Throttle {
    pub fn new(
        store: StoreClient,
        concurrency: usize,
        period: Duration,
        throttler_workers: usize,
    ) -> Self {
        Self {
            gate: Arc::new(ThrottleGate::new(store, period)),
            concurrency,
            throttler_workers,
        }
    }
}

#[async_trait(?Send)]
impl Strategy for Throttle {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        vec![
            QueueConfig::new(DEFAULT_QUEUE, self.concurrency.max(1)),
            QueueConfig::new(THROTTLER_QUEUE, self.throttler_workers.max(1)),
        ]
    }

    async fn route(&self, _batch: &Batch, _unit: u64) -> anyhow::Result<Route> {
        Ok(Route::now(THROTTLER_QUEUE))
    }

    fn admission(&self) -> Option<Arc<dyn AdmissionGate>> {
        Some(self.gate.clone())
    }
}

/// Keeps one deadline per tenant in the shared store. Reading the deadline,
/// deciding and writing it back happen under that latch's lock, so gates on
/// other workers of the same tenant wait for the new deadline.
pub struct ThrottleGate {
    store: StoreClient,
    period: Duration,
    latches: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ThrottleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGate")
            .field("store", &self.store)
            .field("period", &self.period)
            .finish()
    }
}

impl ThrottleGate {
    pub fn new(store: StoreClient, period: Duration) -> Self {
        Self {
            store,
            period,
            latches: Mutex::new(HashMap::new()),
        }
    }

    fn latch(job: &Job) -> String {
        match job.tenant() {
            Some(tenant) => format!("throttle:{tenant}"),
            None => format!("throttle:{}", job.worker_type),
        }
    }

    async fn latch_lock(&self, latch: &str) -> Arc<Mutex<()>> {
        let mut latches = self.latches.lock().await;
        latches
            .entry(latch.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait(?Send)]
impl AdmissionGate for ThrottleGate {
    async fn admit(&self, ctx: &JobContext, mut job: Job) -> anyhow::Result<Option<Job>> {
        if job.payload.remove(SKIP_THROTTLE_KEY).is_some() {
            job.payload.remove(THROTTLE_KEY);
            return Ok(Some(job));
        }

        let period = job
            .payload
            .get(THROTTLE_KEY)
            .and_then(|v| v.as_f64())
            .unwrap_or(self.period.as_secs_f64());
        job.payload.insert(SKIP_THROTTLE_KEY.into(), json!(true));

        let latch = Self::latch(&job);
        let lock = self.latch_lock(&latch).await;
        let _held = lock.lock().await;

        let deadline = self.store.get(&latch).await?.map(|v| v.as_f64());
        let now = clock::wall();

        match deadline {
            Some(deadline) if now < deadline + period => {
                let next = deadline + period;
                debug!("Throttling {} by {:.3}s", job.desc(), next - now);
                ctx.schedule_at(next, DEFAULT_QUEUE, &job.worker_type, job.payload)
                    .await?;
                self.store.set(&latch, Value::Float(next)).await?;
            }
            _ => {
                ctx.enqueue(DEFAULT_QUEUE, &job.worker_type, job.payload)
                    .await?;
                // handed over to default just now
                self.store.set(&latch, Value::Float(clock::wall())).await?;
            }
        }
        Ok(None)
    }
}
