// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! Telemetry collection.
//!
//! Every worker reports one [`TelemetryPoint`] right before a job body runs.
//! A single aggregator thread owns the ordered sequence of points, answers
//! running-count queries from the node, hands the full data set over once on
//! shutdown and drives the live view through a [`Reporter`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::job_engine::pipe::{pipe, Inlet, Outlet};

pub mod report;

/// One job execution, recorded before the job body runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub pool: String,
    pub worker_id: usize,
    /// Monotonic seconds.
    pub started_at: f64,
    /// Monotonic seconds.
    pub enqueued_at: f64,
    pub tenant: Option<u64>,
    /// Synthetic jobs (batch dispatch) count towards completion but not
    /// towards any latency statistic.
    pub do_not_track: bool,
}

impl TelemetryPoint {
    pub fn latency(&self) -> f64 {
        self.started_at - self.enqueued_at
    }
}

/// Renders the data set. Implemented outside the engine (terminal, logs, ...).
pub trait Reporter: Send + Sync {
    /// Called at most once per refresh interval while collecting, and once
    /// more when the result is requested.
    fn draw_live(&self, _points: &[TelemetryPoint]) {}

    /// Called by the node with the final data set.
    fn draw_final(&self, _points: &[TelemetryPoint]) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

#[derive(Debug)]
pub enum StatsMessage {
    Point(TelemetryPoint),
    Total(Inlet<usize>),
    Result(Inlet<Vec<TelemetryPoint>>),
}

/// Handle to the aggregator thread.
#[derive(Debug)]
pub struct StatsAggregator {
    inlet: Inlet<StatsMessage>,
    thread_handle: Option<JoinHandle<()>>,
}

impl StatsAggregator {
    pub fn spawn(refresh_interval: Duration, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let (inlet, outlet) = pipe();
        let thread_handle = thread::Builder::new()
            .name("stats".into())
            .spawn(move || {
                futures::executor::block_on(collect(outlet, refresh_interval, reporter))
            })
            .map_err(|e| EngineError::Spawn("stats aggregator".into(), e.to_string()))?;

        Ok(Self {
            inlet,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn inlet(&self) -> Inlet<StatsMessage> {
        self.inlet.clone()
    }

    /// Number of points received so far.
    pub fn total(&self) -> Result<usize> {
        let (reply, answer) = pipe();
        self.inlet
            .send_now(StatsMessage::Total(reply))
            .map_err(|_| EngineError::Closed("stats"))?;
        answer.recv_blocking().map_err(|_| EngineError::Closed("stats"))
    }

    /// Stop collecting and take the full, ordered data set.
    pub fn result(&mut self) -> Result<Vec<TelemetryPoint>> {
        let (reply, answer) = pipe();
        self.inlet
            .send_now(StatsMessage::Result(reply))
            .map_err(|_| EngineError::Closed("stats"))?;
        let data = answer
            .recv_blocking()
            .map_err(|_| EngineError::Closed("stats"))?;
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| EngineError::Panicked("stats".into()))?;
        }
        Ok(data)
    }
}

async fn collect(
    mailbox: Outlet<StatsMessage>,
    refresh_interval: Duration,
    reporter: Arc<dyn Reporter>,
) {
    let mut data: Vec<TelemetryPoint> = Vec::new();
    let mut prev_frame = Instant::now();

    while let Ok(msg) = mailbox.recv().await {
        match msg {
            StatsMessage::Point(point) => {
                data.push(point);
                if prev_frame.elapsed() > refresh_interval {
                    reporter.draw_live(&data);
                    prev_frame = Instant::now();
                }
            }
            StatsMessage::Total(reply) => {
                let _ = reply.send_now(data.len());
            }
            StatsMessage::Result(reply) => {
                reporter.draw_live(&data);
                info!("Collected {} telemetry points", data.len());
                if reply.send_now(std::mem::take(&mut data)).is_err() {
                    debug!("Result requester went away");
                }
                break;
            }
        }
    }
    // late points from draining workers are rejected from here on
    mailbox.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingReporter {
        live: Mutex<Vec<usize>>,
    }

    impl Reporter for CountingReporter {
        fn draw_live(&self, points: &[TelemetryPoint]) {
            self.live.lock().unwrap().push(points.len());
        }
    }

    fn point(tenant: u64, started_at: f64) -> TelemetryPoint {
        TelemetryPoint {
            pool: "default".into(),
            worker_id: 0,
            started_at,
            enqueued_at: 0.0,
            tenant: Some(tenant),
            do_not_track: false,
        }
    }

    #[test]
    fn test_total_and_result_keep_arrival_order() {
        let reporter = Arc::new(CountingReporter::default());
        let mut stats = StatsAggregator::spawn(Duration::from_secs(60), reporter.clone()).unwrap();
        let inlet = stats.inlet();

        for i in 0..5 {
            inlet
                .send_now(StatsMessage::Point(point(i % 2, i as f64)))
                .unwrap();
        }
        assert_eq!(stats.total().unwrap(), 5);
        assert_eq!(stats.total().unwrap(), 5);

        let data = stats.result().unwrap();
        let started: Vec<f64> = data.iter().map(|p| p.started_at).collect();
        assert_eq!(started, [0.0, 1.0, 2.0, 3.0, 4.0]);

        // the final live frame is drawn on result
        assert_eq!(*reporter.live.lock().unwrap(), [5]);
        assert!(inlet.send_now(StatsMessage::Point(point(0, 9.0))).is_err());
    }

    #[test]
    fn test_live_view_is_rate_limited() {
        let reporter = Arc::new(CountingReporter::default());
        let mut stats = StatsAggregator::spawn(Duration::ZERO, reporter.clone()).unwrap();
        let inlet = stats.inlet();
        inlet.send_now(StatsMessage::Point(point(0, 0.0))).unwrap();
        thread::sleep(Duration::from_millis(5));
        inlet.send_now(StatsMessage::Point(point(0, 1.0))).unwrap();
        let _ = stats.result().unwrap();
        let frames = reporter.live.lock().unwrap().clone();
        assert_eq!(frames.last(), Some(&2));
        assert!(frames.len() >= 2);
    }

    #[test]
    fn test_latency() {
        let mut p = point(0, 2.5);
        p.enqueued_at = 1.0;
        assert_eq!(p.latency(), 1.5);
    }
}
