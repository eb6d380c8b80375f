// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::time::Duration;

use async_io::Timer;
use log::{debug, info, warn};

use crate::clock;
use crate::job_engine::job::{Job, Message};
use crate::job_engine::pipe::{Inlet, Outlet};

/// A job waiting for its fire time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEntry {
    /// Wall-clock seconds since the epoch.
    pub fire_at: f64,
    pub job: Job,
    /// Reset `enqueued_at` on release. Set for external submissions, whose
    /// latency counts from the moment they become runnable.
    pub restamp: bool,
}

/// Backlog kept sorted ascending by `fire_at`. Entries with equal fire times
/// keep their insertion order.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: VecDeque<ScheduledEntry>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ScheduledEntry) {
        let idx = self.entries.partition_point(|e| e.fire_at <= entry.fire_at);
        self.entries.insert(idx, entry);
    }

    /// Remove and return every entry with `fire_at <= now`, in order.
    pub fn pop_due(&mut self, now: f64) -> Vec<ScheduledEntry> {
        let mut due = Vec::new();
        while self.entries.front().is_some_and(|e| e.fire_at <= now) {
            if let Some(entry) = self.entries.pop_front() {
                due.push(entry);
            }
        }
        due
    }

    pub fn next_fire_at(&self) -> Option<f64> {
        self.entries.front().map(|e| e.fire_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub enum SchedulerMessage {
    Entry(ScheduledEntry),
    Tick,
    Stop,
}

/// Owns the backlog. New entries are only inserted; releases happen on `Tick`,
/// so a job runs at most one tick interval after its fire time.
pub async fn scheduler_loop(mailbox: Outlet<SchedulerMessage>, intake: Inlet<Message>) {
    let mut backlog = Backlog::new();
    info!("Delay scheduler started");

    while let Ok(msg) = mailbox.recv().await {
        match msg {
            SchedulerMessage::Entry(entry) => {
                debug!("Scheduled {} at {:.3}", entry.job.desc(), entry.fire_at);
                backlog.insert(entry);
            }
            SchedulerMessage::Tick => {
                for entry in backlog.pop_due(clock::wall()) {
                    let mut job = entry.job;
                    if entry.restamp {
                        job.enqueued_at = clock::monotonic();
                    }
                    debug!("Releasing {}", job.desc());
                    if intake.send(Message::Job(job)).await.is_err() {
                        warn!("Intake closed, dropping a released job");
                    }
                }
            }
            SchedulerMessage::Stop => break,
        }
    }

    // the ticker notices the closed mailbox and exits
    mailbox.close();
    if !backlog.is_empty() {
        warn!(
            "Delay scheduler stopped with {} pending entries",
            backlog.len()
        );
    }
    info!("Delay scheduler shutting down gracefully");
}

pub async fn ticker_loop(mailbox: Inlet<SchedulerMessage>, interval: Duration) {
    loop {
        Timer::after(interval).await;
        if mailbox.send(SchedulerMessage::Tick).await.is_err() {
            break;
        }
    }
    debug!("Ticker exiting");
}
