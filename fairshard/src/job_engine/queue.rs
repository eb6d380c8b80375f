// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::thread::{self, JoinHandle};

use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::job_engine::job::Message;
use crate::job_engine::node::NodeLinks;
use crate::job_engine::pipe::{pipe, Closed, Inlet, Outlet};
use crate::worker::JobContext;

/// A named queue and how many workers consume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub size: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// A fixed set of workers sharing one pipe. All workers of a pool run as
/// tasks on one dedicated thread; a job that awaits yields to its siblings.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    inlet: Inlet<Message>,
    acks: Outlet<usize>,
    thread_handle: Option<JoinHandle<()>>,
    stopped: Option<usize>,
}

impl WorkerPool {
    pub fn start(config: QueueConfig, links: NodeLinks) -> Result<Self> {
        let (inlet, outlet) = pipe::<Message>();
        let (ack_inlet, acks) = pipe::<usize>();
        let name = config.name.clone();
        let size = config.size;

        let thread_name = format!("pool-{name}");
        let pool_name = name.clone();
        let thread_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut pool = LocalPool::new();
                let spawner = pool.spawner();
                for worker_id in 0..size {
                    let spawned = spawner.spawn_local(worker_loop(
                        pool_name.clone(),
                        worker_id,
                        outlet.clone(),
                        ack_inlet.clone(),
                        links.clone(),
                    ));
                    if let Err(e) = spawned {
                        warn!("Could not spawn worker {pool_name}:{worker_id}: {e}");
                    }
                }
                // only the workers keep the pipe ends alive from here on
                drop(outlet);
                drop(ack_inlet);
                pool.run();
            })
            .map_err(|e| EngineError::Spawn(thread_name, e.to_string()))?;

        info!("Started pool {name} with {size} workers");
        Ok(Self {
            name,
            size,
            inlet,
            acks,
            thread_handle: Some(thread_handle),
            stopped: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn inlet(&self) -> Inlet<Message> {
        self.inlet.clone()
    }

    /// Cooperative shutdown. One stop message per worker is queued behind
    /// whatever is already waiting, so every accepted job still runs. Returns
    /// the number of workers that acknowledged. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<usize> {
        if let Some(count) = self.stopped {
            return Ok(count);
        }

        for _ in 0..self.size {
            if self.inlet.send_now(Message::Stop).is_err() {
                warn!("Pool {} closed before all stop messages were sent", self.name);
                break;
            }
        }

        let mut waiting: BTreeSet<usize> = (0..self.size).collect();
        while !waiting.is_empty() {
            match self.acks.recv_blocking() {
                Ok(worker_id) => {
                    waiting.remove(&worker_id);
                }
                Err(Closed) => {
                    warn!(
                        "Pool {}: {} workers went away without acknowledging",
                        self.name,
                        waiting.len()
                    );
                    break;
                }
            }
        }
        let count = self.size - waiting.len();

        self.inlet.close();
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| EngineError::Panicked(format!("pool-{}", self.name)))?;
        }
        info!("Pool {} stopped, {count} workers acknowledged", self.name);
        self.stopped = Some(count);
        Ok(count)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // a pool that was never shut down lets its workers run off the closed pipe
        self.inlet.close();
    }
}

async fn worker_loop(
    pool: String,
    worker_id: usize,
    outlet: Outlet<Message>,
    acks: Inlet<usize>,
    links: NodeLinks,
) {
    debug!("Worker {pool}:{worker_id} started");
    loop {
        match outlet.recv().await {
            Ok(Message::Job(job)) => {
                let ctx = JobContext::new(links.clone(), &pool, worker_id, &job);
                let desc = job.desc();
                let payload = job.payload.clone();
                debug!("Worker {pool}:{worker_id} executing {desc}");
                match AssertUnwindSafe(links.registry().run(&ctx, job))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Job {desc} failed on {pool}:{worker_id} with {payload:?}: {e:?}")
                    }
                    Err(_) => warn!("Job {desc} panicked on {pool}:{worker_id} with {payload:?}"),
                }
            }
            Ok(Message::Stop) => {
                if acks.send(worker_id).await.is_err() {
                    debug!("Nobody waits for the ack of {pool}:{worker_id}");
                }
                break;
            }
            Err(Closed) => break,
        }
    }
    debug!("Worker {pool}:{worker_id} exiting");
}
