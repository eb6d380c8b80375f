// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::clock;
use crate::error::{EngineError, Result};
use crate::job_engine::job::{Job, Payload};
use crate::job_engine::node::NodeLinks;
use crate::job_engine::scheduler::ScheduledEntry;
use crate::stats::{StatsMessage, TelemetryPoint};

pub mod batch;
pub mod closure_worker;
pub mod mailer;

/// Whether a job's execution counts towards latency statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    Track,
    /// Counts towards completion, but not towards latency.
    DoNotTrack,
    /// Emits no telemetry at all.
    Silent,
}

/// Domain logic for one kind of job.
#[async_trait(?Send)]
pub trait Worker: Send + Sync {
    fn tracking(&self) -> Tracking {
        Tracking::Track
    }

    /// Tracking of one particular job.
    fn tracking_of(&self, _payload: &Payload) -> Tracking {
        self.tracking()
    }

    async fn perform(&self, ctx: &JobContext, payload: Payload) -> anyhow::Result<()>;
}

/// Decides whether a job may run on the worker that picked it up. Runs before
/// any telemetry is emitted.
#[async_trait(?Send)]
pub trait AdmissionGate: Send + Sync {
    /// `Some(job)` runs the (possibly rewritten) job right here, `None` means
    /// the gate has already re-routed it.
    async fn admit(&self, ctx: &JobContext, job: Job) -> anyhow::Result<Option<Job>>;
}

struct Registration {
    worker: Arc<dyn Worker>,
    gate: Option<Arc<dyn AdmissionGate>>,
}

/// Maps worker-type names to handlers. Populated before the node starts.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Registration>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, worker: Arc<dyn Worker>) -> Result<()> {
        let name = name.into();
        if self.workers.contains_key(&name) {
            return Err(EngineError::DuplicateWorker(name));
        }
        self.workers
            .insert(name, Registration { worker, gate: None });
        Ok(())
    }

    /// Put an admission gate in front of an already registered worker type.
    pub fn gate(&mut self, name: &str, gate: Arc<dyn AdmissionGate>) -> Result<()> {
        let registration = self
            .workers
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownWorker(name.to_string()))?;
        registration.gate = Some(gate);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Admission, telemetry, then the job body.
    pub(crate) async fn run(&self, ctx: &JobContext, job: Job) -> anyhow::Result<()> {
        let registration = self
            .workers
            .get(&job.worker_type)
            .ok_or_else(|| EngineError::UnknownWorker(job.worker_type.clone()))?;

        let job = match &registration.gate {
            Some(gate) => match gate.admit(ctx, job).await? {
                Some(job) => job,
                None => return Ok(()),
            },
            None => job,
        };

        match registration.worker.tracking_of(&job.payload) {
            Tracking::Silent => {}
            tracking => ctx.report(tracking).await,
        }
        registration.worker.perform(ctx, job.payload).await
    }
}

/// What a running job knows about where it runs, and how it submits more work.
#[derive(Debug, Clone)]
pub struct JobContext {
    links: NodeLinks,
    pool: String,
    worker_id: usize,
    enqueued_at: f64,
    tenant: Option<u64>,
}

impl JobContext {
    pub(crate) fn new(links: NodeLinks, pool: &str, worker_id: usize, job: &Job) -> Self {
        Self {
            links,
            pool: pool.to_string(),
            worker_id,
            enqueued_at: job.enqueued_at,
            tenant: job.tenant(),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn enqueued_at(&self) -> f64 {
        self.enqueued_at
    }

    pub fn tenant(&self) -> Option<u64> {
        self.tenant
    }

    /// Enqueue a follow-up job. It inherits this job's enqueue time.
    pub async fn enqueue(&self, pool: &str, worker_type: &str, payload: Payload) -> Result<()> {
        let job = Job::with_enqueued_at(pool, worker_type, payload, self.enqueued_at);
        self.links.submit(job).await
    }

    /// Run a job of another worker type right here, on this worker. It
    /// shares this job's enqueue time and goes through the same admission and
    /// telemetry as a routed job.
    pub async fn run_inline(&self, worker_type: &str, payload: Payload) -> anyhow::Result<()> {
        let job = Job::with_enqueued_at(&self.pool, worker_type, payload, self.enqueued_at);
        let ctx = JobContext::new(self.links.clone(), &self.pool, self.worker_id, &job);
        self.links.registry().run(&ctx, job).await
    }

    /// Enqueue a follow-up job through the delay scheduler.
    pub async fn schedule_at(
        &self,
        fire_at: f64,
        pool: &str,
        worker_type: &str,
        payload: Payload,
    ) -> Result<()> {
        let job = Job::with_enqueued_at(pool, worker_type, payload, self.enqueued_at);
        self.links
            .schedule(ScheduledEntry {
                fire_at,
                job,
                restamp: false,
            })
            .await
    }

    async fn report(&self, tracking: Tracking) {
        let point = TelemetryPoint {
            pool: self.pool.clone(),
            worker_id: self.worker_id,
            started_at: clock::monotonic(),
            enqueued_at: self.enqueued_at,
            tenant: self.tenant,
            do_not_track: tracking == Tracking::DoNotTrack,
        };
        if self
            .links
            .stats()
            .send(StatsMessage::Point(point))
            .await
            .is_err()
        {
            debug!("Stats closed, telemetry of {}:{} dropped", self.pool, self.worker_id);
        }
    }
}
