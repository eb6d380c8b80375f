// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! One benchmark run: every tenant submits a single batch, the strategy
//! spreads the units over its queues, and the run ends once every unit and
//! every batch dispatch job has started.

use std::sync::Arc;
use std::thread;

use futures::executor::block_on;
use log::info;
use serde::Serialize;

use crate::clock;
use crate::config::Config;
use crate::job_engine::node::Node;
use crate::stats::report::Report;
use crate::stats::{NullReporter, Reporter, TelemetryPoint};
use crate::strategy::{Batch, Strategy, DEFAULT_QUEUE};
use crate::worker::batch::{BatchWorker, BATCH_WORKER};
use crate::worker::mailer::{MailerWorker, MAILER_WORKER};
use crate::worker::{Worker, WorkerRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub points: Vec<TelemetryPoint>,
    pub report: Report,
}

pub struct Scenario {
    config: Config,
    strategy: Arc<dyn Strategy>,
    unit_worker: Arc<dyn Worker>,
    reporter: Arc<dyn Reporter>,
}

impl Scenario {
    pub fn new(config: Config, strategy: Arc<dyn Strategy>) -> Self {
        Self {
            config,
            strategy,
            unit_worker: Arc::new(MailerWorker::default()),
            reporter: Arc::new(NullReporter),
        }
    }

    /// Replace the mailer that executes the units.
    pub fn unit_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.unit_worker = worker;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn run(self) -> anyhow::Result<Outcome> {
        let Scenario {
            config,
            strategy,
            unit_worker,
            reporter,
        } = self;

        let mut registry = WorkerRegistry::new();
        registry.register(MAILER_WORKER, unit_worker)?;
        registry.register(
            BATCH_WORKER,
            Arc::new(BatchWorker::new(strategy.clone(), MAILER_WORKER)),
        )?;
        if let Some(gate) = strategy.admission() {
            registry.gate(MAILER_WORKER, gate)?;
        }

        let mut node = Node::new(config.engine.clone(), registry, reporter);
        for queue in strategy.topology() {
            node.queue(queue.name, queue.size)?;
        }
        if let Some(creator) = strategy.background() {
            node.background(format!("{} companion", strategy.name()), creator)?;
        }
        node.start()?;
        info!(
            "Running {} with {} tenants, {} jobs expected",
            strategy.name(),
            config.scales.len(),
            config.total_jobs()
        );

        for (tenant, scale) in config.tenants() {
            if tenant > 0 {
                thread::sleep(config.submit_gap);
            }
            let mut batch = Batch::new(tenant, scale.size);
            block_on(strategy.plan(&mut batch))?;
            let payload = batch.to_payload();
            match scale.delay {
                None => node.enqueue(DEFAULT_QUEUE, BATCH_WORKER, payload)?,
                Some(delay) => node.schedule_at(
                    clock::wall() + delay.as_secs_f64(),
                    DEFAULT_QUEUE,
                    BATCH_WORKER,
                    payload,
                )?,
            }
            info!("Submitted batch of {} for tenant {tenant}", scale.size);
        }

        let points = node.wait_till_executed(config.total_jobs())?;
        let report = Report::build(
            &points,
            config.head_size,
            config.stats_reset_interval.as_secs_f64(),
        );
        Ok(Outcome { points, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, Scale, StrategyKind, StrategyOptions};
    use crate::strategy;
    use std::time::Duration;

    fn quick_config(scales: &[u64]) -> Config {
        Config {
            concurrency: 4,
            scales: scales
                .iter()
                .map(|&size| Scale { size, delay: None })
                .collect(),
            submit_gap: Duration::from_millis(5),
            engine: EngineConfig {
                tick_interval: Duration::from_millis(10),
                poll_interval: Duration::from_millis(10),
                refresh_interval: Duration::from_millis(50),
            },
            ..Config::default()
        }
    }

    fn quick_mailer() -> Arc<dyn Worker> {
        Arc::new(MailerWorker::new(Duration::from_millis(2), Duration::from_millis(1)))
    }

    #[test]
    fn test_baseline_executes_units_and_dispatch_jobs() {
        let config = quick_config(&[10, 5]);
        let strategy =
            strategy::build(StrategyKind::Baseline, &config, &StrategyOptions::default()).unwrap();
        let outcome = Scenario::new(config, strategy)
            .unit_worker(quick_mailer())
            .run()
            .unwrap();

        assert_eq!(outcome.points.len(), 17);
        assert_eq!(outcome.points.iter().filter(|p| p.do_not_track).count(), 2);
        assert_eq!(outcome.report.executed, 17);
        assert_eq!(outcome.report.overall.count, 15);
        assert_eq!(outcome.report.tenants.len(), 2);
        assert_eq!(outcome.report.tenants[0].all.count, 10);
        assert_eq!(outcome.report.tenants[1].all.count, 5);
    }

    #[test]
    fn test_delayed_batch_is_still_awaited() {
        let mut config = quick_config(&[3, 2]);
        config.scales[1].delay = Some(Duration::from_millis(100));
        let strategy =
            strategy::build(StrategyKind::Baseline, &config, &StrategyOptions::default()).unwrap();
        let outcome = Scenario::new(config, strategy)
            .unit_worker(quick_mailer())
            .run()
            .unwrap();
        assert_eq!(outcome.points.len(), 7);
    }
}
