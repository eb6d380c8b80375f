// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};

use crate::clock;
use crate::job_engine::job::Payload;
use crate::strategy::{Batch, Strategy, CURSOR_KEY};
use crate::worker::{JobContext, Tracking, Worker};

pub const BATCH_WORKER: &str = "batch";

/// Fans a batch out into `total` unit jobs, asking the strategy where each
/// one goes. Its own execution counts towards completion only.
///
/// A batch with a time budget runs its units itself instead and re-enqueues
/// what is left. Those continuations emit no telemetry, so every batch still
/// counts exactly once.
pub struct BatchWorker {
    strategy: Arc<dyn Strategy>,
    unit_worker: String,
}

impl BatchWorker {
    pub fn new(strategy: Arc<dyn Strategy>, unit_worker: impl Into<String>) -> Self {
        Self {
            strategy,
            unit_worker: unit_worker.into(),
        }
    }
}

#[async_trait(?Send)]
impl Worker for BatchWorker {
    fn tracking(&self) -> Tracking {
        Tracking::DoNotTrack
    }

    fn tracking_of(&self, payload: &Payload) -> Tracking {
        if payload.contains_key(CURSOR_KEY) {
            Tracking::Silent
        } else {
            self.tracking()
        }
    }

    async fn perform(&self, ctx: &JobContext, mut payload: Payload) -> anyhow::Result<()> {
        let batch = Batch::take_from(&mut payload)?;
        if let Some(max_time) = batch.max_time {
            return self.iterate(ctx, batch, payload, max_time).await;
        }
        debug!(
            "Dispatching {} units of tenant {} ({})",
            batch.total,
            batch.tenant,
            self.strategy.name()
        );
        for unit in 0..batch.total {
            let route = self.strategy.route(&batch, unit).await?;
            match route.delay {
                None => {
                    ctx.enqueue(&route.pool, &self.unit_worker, payload.clone())
                        .await?
                }
                Some(delay) => {
                    ctx.schedule_at(
                        clock::wall() + delay.as_secs_f64(),
                        &route.pool,
                        &self.unit_worker,
                        payload.clone(),
                    )
                    .await?
                }
            }
        }
        Ok(())
    }
}

impl BatchWorker {
    async fn iterate(
        &self,
        ctx: &JobContext,
        batch: Batch,
        payload: Payload,
        max_time: Duration,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut cursor = batch.cursor;
        while cursor < batch.total {
            if let Err(e) = ctx.run_inline(&self.unit_worker, payload.clone()).await {
                warn!("Unit {cursor} of tenant {} failed: {e:?}", batch.tenant);
            }
            cursor += 1;
            if started.elapsed() >= max_time {
                break;
            }
        }

        if cursor >= batch.total {
            debug!("Batch of tenant {} done", batch.tenant);
            return Ok(());
        }
        debug!(
            "Batch of tenant {} out of time at {cursor}/{}, re-enqueueing",
            batch.tenant, batch.total
        );
        let mut rest = payload;
        Batch { cursor, ..batch }.write_into(&mut rest);
        ctx.enqueue(ctx.pool(), BATCH_WORKER, rest).await?;
        Ok(())
    }
}
