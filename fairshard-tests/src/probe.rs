// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_io::Timer;
use async_trait::async_trait;

use fairshard::clock;
use fairshard::config::{Config, EngineConfig, Scale};
use fairshard::job_engine::job::Payload;
use fairshard::worker::{JobContext, Worker};

use crate::exec_log::{ExecLog, LoggedExecution};

/// Unit worker that records every execution instead of sending mail.
#[derive(Debug, Clone)]
pub struct ProbeWorker {
    work: Duration,
    log: Arc<Mutex<ExecLog>>,
}

impl ProbeWorker {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            log: Arc::new(Mutex::new(ExecLog::default())),
        }
    }

    pub fn log(&self) -> ExecLog {
        self.log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait(?Send)]
impl Worker for ProbeWorker {
    async fn perform(&self, ctx: &JobContext, payload: Payload) -> anyhow::Result<()> {
        let started_at = clock::monotonic();
        Timer::after(self.work).await;
        let execution = LoggedExecution {
            tenant: ctx.tenant(),
            pool: ctx.pool().to_string(),
            worker_id: ctx.worker_id(),
            started_at,
            finished_at: clock::monotonic(),
            keys: payload.keys().cloned().collect(),
        };
        self.log
            .lock()
            .map_err(|_| anyhow::anyhow!("execution log poisoned"))?
            .executions
            .push(execution);
        Ok(())
    }
}

/// A configuration that finishes in well under a second per batch.
pub fn quick_config(concurrency: usize, sizes: &[u64]) -> Config {
    Config {
        concurrency,
        scales: sizes
            .iter()
            .map(|&size| Scale { size, delay: None })
            .collect(),
        submit_gap: Duration::from_millis(5),
        engine: EngineConfig {
            tick_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
            refresh_interval: Duration::from_millis(100),
        },
        ..Config::default()
    }
}
