// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_trait::async_trait;

use crate::job_engine::queue::QueueConfig;
use crate::strategy::{Batch, Route, Strategy, DEFAULT_QUEUE};

/// One shared queue with the whole worker budget. First come, first served.
#[derive(Debug, Clone)]
pub struct Baseline {
    concurrency: usize,
}

impl Baseline {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

#[async_trait(?Send)]
impl Strategy for Baseline {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn topology(&self) -> Vec<QueueConfig> {
        vec![QueueConfig::new(DEFAULT_QUEUE, self.concurrency.max(1))]
    }

    async fn route(&self, _batch: &Batch, _unit: u64) -> anyhow::Result<Route> {
        Ok(Route::now(DEFAULT_QUEUE))
    }
}
