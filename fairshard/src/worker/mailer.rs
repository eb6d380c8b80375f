// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use async_io::Timer;
use async_trait::async_trait;
use rand::Rng;

use crate::job_engine::job::Payload;
use crate::worker::{JobContext, Worker};

pub const MAILER_WORKER: &str = "mailer";

/// Pretends to deliver an email: sleeps for `base` plus up to `jitter`.
#[derive(Debug, Clone)]
pub struct MailerWorker {
    base: Duration,
    jitter: Duration,
}

impl Default for MailerWorker {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(50))
    }
}

impl MailerWorker {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    fn work_time(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

#[async_trait(?Send)]
impl Worker for MailerWorker {
    async fn perform(&self, _ctx: &JobContext, _payload: Payload) -> anyhow::Result<()> {
        Timer::after(self.work_time()).await;
        Ok(())
    }
}
