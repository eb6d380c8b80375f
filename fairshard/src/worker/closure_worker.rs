// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::job_engine::job::Payload;
use crate::worker::{JobContext, Tracking, Worker};

pub type TaskCreator = Box<
    dyn Fn(JobContext, Payload) -> Pin<Box<dyn Future<Output = anyhow::Result<()>>>> // closure returns any future
        + Send // the closure itself can be shared across pool threads
        + Sync
        + 'static,
>;

/// A worker whose body is a closure. Handy for ad-hoc job types and tests.
pub struct ClosureWorker {
    desc: String,
    tracking: Tracking,
    task_creator: TaskCreator,
}

impl ClosureWorker {
    pub fn new(desc: impl Into<String>, tracking: Tracking, f: TaskCreator) -> Self {
        Self {
            desc: desc.into(),
            tracking,
            task_creator: f,
        }
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }
}

#[async_trait(?Send)]
impl Worker for ClosureWorker {
    fn tracking(&self) -> Tracking {
        self.tracking
    }

    async fn perform(&self, ctx: &JobContext, payload: Payload) -> anyhow::Result<()> {
        let creator = &self.task_creator;
        creator(ctx.clone(), payload).await
    }
}
