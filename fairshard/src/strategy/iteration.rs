// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use async_trait::async_trait;

use crate::job_engine::queue::QueueConfig;
use crate::strategy::{Batch, Route, Strategy, DEFAULT_QUEUE};

/// Interruptible iteration: the batch job runs its units itself, one after
/// the other, and re-enqueues the rest of the batch once `max_time` is used
/// up. A long batch thereby goes to the back of the queue every `max_time`.
#[derive(Debug, Clone)]
pub struct Iteration {
    concurrency: usize,
    max_time: Duration,
}

impl Iteration {
    pub fn new(concurrency: usize, max_time: Duration) -> Self {
        Self {
            concurrency,
            max_time,
        }
    }
}

#[async_trait(?Send)]
impl Strategy for Iteration {
    fn name(&self) -> &'static str {
        "iteration"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        vec![QueueConfig::new(DEFAULT_QUEUE, self.concurrency.max(1))]
    }

    async fn plan(&self, batch: &mut Batch) -> anyhow::Result<()> {
        batch.max_time = Some(self.max_time);
        Ok(())
    }

    /// Only asked for batches submitted without a time budget.
    async fn route(&self, _batch: &Batch, _unit: u64) -> anyhow::Result<Route> {
        Ok(Route::now(DEFAULT_QUEUE))
    }
}
