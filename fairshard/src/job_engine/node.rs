// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::RemoteHandle;
use futures::task::LocalSpawnExt;
use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::job_engine::job::{Job, Message, Payload};
use crate::job_engine::pipe::{pipe, Inlet, Outlet};
use crate::job_engine::queue::{QueueConfig, WorkerPool};
use crate::job_engine::scheduler::{scheduler_loop, ticker_loop, ScheduledEntry, SchedulerMessage};
use crate::stats::{Reporter, StatsAggregator, StatsMessage, TelemetryPoint};
use crate::worker::WorkerRegistry;

/// Creates a long running future on the node thread.
pub type LoopCreator = Box<
    dyn FnOnce() -> Pin<Box<dyn Future<Output = ()>>> // the future itself stays on the node thread
        + Send // the closure travels there
        + 'static,
>;

/// Everything a producer needs to submit work to a running node. Cheap to
/// clone; every running job gets one through its context.
#[derive(Debug, Clone)]
pub struct NodeLinks {
    intake: Inlet<Message>,
    scheduler: Inlet<SchedulerMessage>,
    pools: Arc<BTreeSet<String>>,
    registry: Arc<WorkerRegistry>,
    stats: Inlet<StatsMessage>,
}

impl NodeLinks {
    pub(crate) fn new(
        intake: Inlet<Message>,
        scheduler: Inlet<SchedulerMessage>,
        pools: BTreeSet<String>,
        registry: Arc<WorkerRegistry>,
        stats: Inlet<StatsMessage>,
    ) -> Self {
        Self {
            intake,
            scheduler,
            pools: Arc::new(pools),
            registry,
            stats,
        }
    }

    fn check(&self, job: &Job) -> Result<()> {
        if !self.pools.contains(&job.pool) {
            return Err(EngineError::UnknownQueue(job.pool.clone()));
        }
        if !self.registry.contains(&job.worker_type) {
            return Err(EngineError::UnknownWorker(job.worker_type.clone()));
        }
        Ok(())
    }

    pub async fn submit(&self, job: Job) -> Result<()> {
        self.check(&job)?;
        self.intake
            .send(Message::Job(job))
            .await
            .map_err(|_| EngineError::Closed("intake"))
    }

    pub fn submit_now(&self, job: Job) -> Result<()> {
        self.check(&job)?;
        self.intake
            .send_now(Message::Job(job))
            .map_err(|_| EngineError::Closed("intake"))
    }

    pub async fn schedule(&self, entry: ScheduledEntry) -> Result<()> {
        self.check(&entry.job)?;
        self.scheduler
            .send(SchedulerMessage::Entry(entry))
            .await
            .map_err(|_| EngineError::Closed("scheduler"))
    }

    pub fn schedule_now(&self, entry: ScheduledEntry) -> Result<()> {
        self.check(&entry.job)?;
        self.scheduler
            .send_now(SchedulerMessage::Entry(entry))
            .map_err(|_| EngineError::Closed("scheduler"))
    }

    pub fn stats(&self) -> &Inlet<StatsMessage> {
        &self.stats
    }

    pub(crate) fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }
}

struct Running {
    links: NodeLinks,
    pools: Vec<WorkerPool>,
    stats: StatsAggregator,
    fatal: Outlet<EngineError>,
    thread_handle: Option<JoinHandle<()>>,
}

enum State {
    Idle,
    Running(Running),
    Stopped,
}

/// Owns the pools, the intake path, the delay scheduler and the stats
/// aggregator. Configure it, `start` it, feed it and wait for completion.
pub struct Node {
    engine: EngineConfig,
    reporter: Arc<dyn Reporter>,
    registry: Option<WorkerRegistry>,
    queues: Vec<QueueConfig>,
    backgrounds: Vec<(String, LoopCreator)>,
    state: State,
}

impl Node {
    pub fn new(engine: EngineConfig, registry: WorkerRegistry, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            engine,
            reporter,
            registry: Some(registry),
            queues: Vec::new(),
            backgrounds: Vec::new(),
            state: State::Idle,
        }
    }

    pub fn queue(&mut self, name: impl Into<String>, size: usize) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(EngineError::AlreadyStarted);
        }
        let name = name.into();
        if self.queues.iter().any(|q| q.name == name) {
            return Err(EngineError::DuplicateQueue(name));
        }
        self.queues.push(QueueConfig::new(name, size));
        Ok(())
    }

    /// Register a loop that runs next to the router for the lifetime of the
    /// node. It is cancelled when the node stops.
    pub fn background(&mut self, desc: impl Into<String>, creator: LoopCreator) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(EngineError::AlreadyStarted);
        }
        self.backgrounds.push((desc.into(), creator));
        Ok(())
    }

    pub fn queues(&self) -> &[QueueConfig] {
        &self.queues
    }

    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(EngineError::AlreadyStarted);
        }
        let registry = Arc::new(self.registry.take().ok_or(EngineError::AlreadyStarted)?);

        let stats = StatsAggregator::spawn(self.engine.refresh_interval, self.reporter.clone())?;
        let (intake, intake_outlet) = pipe::<Message>();
        let (scheduler, scheduler_outlet) = pipe::<SchedulerMessage>();
        let (fatal_inlet, fatal) = pipe::<EngineError>();

        let links = NodeLinks::new(
            intake.clone(),
            scheduler.clone(),
            self.queues.iter().map(|q| q.name.clone()).collect(),
            registry,
            stats.inlet(),
        );

        let mut pools = Vec::with_capacity(self.queues.len());
        let mut routes = BTreeMap::new();
        for config in &self.queues {
            let pool = WorkerPool::start(config.clone(), links.clone())?;
            routes.insert(pool.name().to_string(), pool.inlet());
            pools.push(pool);
        }

        let backgrounds = std::mem::take(&mut self.backgrounds);
        let tick_interval = self.engine.tick_interval;
        let thread_handle = thread::Builder::new()
            .name("node".into())
            .spawn(move || {
                let mut pool = LocalPool::new();
                let spawner = pool.spawner();

                let handles = spawn_backgrounds(&spawner, backgrounds);
                let spawned = spawner
                    .spawn_local(router_loop(
                        intake_outlet,
                        routes,
                        scheduler.clone(),
                        fatal_inlet,
                        handles,
                    ))
                    .and_then(|_| spawner.spawn_local(scheduler_loop(scheduler_outlet, intake)))
                    .and_then(|_| spawner.spawn_local(ticker_loop(scheduler, tick_interval)));
                if let Err(e) = spawned {
                    error!("Could not spawn the node loops: {e}");
                    return;
                }
                pool.run();
            })
            .map_err(|e| EngineError::Spawn("node".into(), e.to_string()))?;

        info!("Node started with {} pools", pools.len());
        self.state = State::Running(Running {
            links,
            pools,
            stats,
            fatal,
            thread_handle: Some(thread_handle),
        });
        Ok(())
    }

    fn running(&self) -> Result<&Running> {
        match &self.state {
            State::Running(running) => Ok(running),
            _ => Err(EngineError::NotStarted),
        }
    }

    pub fn links(&self) -> Result<NodeLinks> {
        Ok(self.running()?.links.clone())
    }

    /// Submit a job for immediate routing.
    pub fn enqueue(&self, pool: &str, worker_type: &str, payload: Payload) -> Result<()> {
        self.running()?
            .links
            .submit_now(Job::new(pool, worker_type, payload))
    }

    /// Submit a job that becomes runnable at `fire_at` (wall-clock epoch
    /// seconds). Its latency counts from the release.
    pub fn schedule_at(
        &self,
        fire_at: f64,
        pool: &str,
        worker_type: &str,
        payload: Payload,
    ) -> Result<()> {
        self.running()?.links.schedule_now(ScheduledEntry {
            fire_at,
            job: Job::new(pool, worker_type, payload),
            restamp: true,
        })
    }

    /// Poll the aggregator until `expected` jobs have started, then stop the
    /// node and return the telemetry. A routing error ends the wait early.
    pub fn wait_till_executed(&mut self, expected: usize) -> Result<Vec<TelemetryPoint>> {
        loop {
            let running = self.running()?;
            let total = running.stats.total()?;
            if total >= expected {
                info!("{total} of {expected} jobs executed");
                break;
            }
            if !running.fatal.is_empty() {
                warn!("Fatal routing error, stopping after {total} of {expected} jobs");
                break;
            }
            debug!("{total} of {expected} jobs executed");
            thread::sleep(self.engine.poll_interval);
        }
        self.stop()
    }

    /// Stop sentinel into the intake, then every pool in registration order,
    /// then the aggregator. Stopping a stopped node returns an empty data set.
    pub fn stop(&mut self) -> Result<Vec<TelemetryPoint>> {
        let mut running = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running(running) => running,
            State::Idle => {
                self.state = State::Idle;
                return Err(EngineError::NotStarted);
            }
            State::Stopped => {
                debug!("Node already stopped");
                return Ok(Vec::new());
            }
        };

        if running.links.intake.send_now(Message::Stop).is_err() {
            warn!("Intake already closed");
        }
        if let Some(handle) = running.thread_handle.take() {
            handle
                .join()
                .map_err(|_| EngineError::Panicked("node".into()))?;
        }
        for pool in running.pools.iter_mut() {
            pool.shutdown()?;
        }

        let points = running.stats.result()?;
        self.reporter.draw_final(&points);
        info!("Node stopped, {} telemetry points", points.len());

        match running.fatal.try_recv() {
            Some(e) => Err(e),
            None => Ok(points),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let State::Running(running) = &self.state {
            // lets the node thread wind down; pools close their pipes on drop
            let _ = running.links.intake.send_now(Message::Stop);
        }
    }
}

fn spawn_backgrounds(
    spawner: &LocalSpawner,
    backgrounds: Vec<(String, LoopCreator)>,
) -> Vec<RemoteHandle<()>> {
    let mut handles = Vec::with_capacity(backgrounds.len());
    for (desc, creator) in backgrounds {
        match spawner.spawn_local_with_handle(creator()) {
            Ok(handle) => {
                info!("Spawned background loop {desc}");
                handles.push(handle);
            }
            Err(e) => warn!("Could not spawn background loop {desc}: {e}"),
        }
    }
    handles
}

/// Forwards every job to its pool's pipe. On stop it cancels the background
/// loops and stops the delay scheduler.
pub(super) async fn router_loop(
    intake: Outlet<Message>,
    routes: BTreeMap<String, Inlet<Message>>,
    scheduler: Inlet<SchedulerMessage>,
    fatal: Inlet<EngineError>,
    background_handles: Vec<RemoteHandle<()>>,
) {
    info!("Router started");
    while let Ok(msg) = intake.recv().await {
        match msg {
            Message::Job(job) => match routes.get(&job.pool) {
                Some(pool) => {
                    debug!("Routing {}", job.desc());
                    if pool.send(Message::Job(job)).await.is_err() {
                        warn!("Pool closed, dropping a job");
                    }
                }
                None => {
                    error!("No pool named {}, dropping {}", job.pool, job.desc());
                    if fatal.send(EngineError::UnknownQueue(job.pool)).await.is_err() {
                        warn!("Nobody is waiting for routing errors any more");
                    }
                }
            },
            Message::Stop => break,
        }
    }

    drop(background_handles);
    if scheduler.send(SchedulerMessage::Stop).await.is_err() {
        debug!("Delay scheduler already gone");
    }
    intake.close();
    info!("Router shutting down gracefully");
}
