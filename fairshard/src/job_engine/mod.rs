// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Pooled Job Executor
//!
//! ## Overview
//! A small actor-style engine for running jobs on named worker pools.
//!
//! - The node thread runs the router, the delay scheduler and its ticker.
//! - Each pool owns one unbounded pipe (no backpressure) and a fixed number
//!   of workers, all running as local tasks on the pool's own thread.
//! - Jobs are plain data (`Job`); the worker registry maps the worker type
//!   to the code that runs it.
//! - Shutdown is cooperative: a `Stop` message travels behind the real jobs,
//!   every worker acknowledges it, only then the pipe is closed.
//!
//! ```text
//!       Node::enqueue         Node::schedule_at
//!            |                       |
//!            |               +-------v--------+   Tick   +--------+
//!            |               | delay scheduler|<---------| ticker |
//!            |               +-------+--------+          +--------+
//!            v                       |
//!         +--+-----------------------v--+
//!         |        router (intake)      |
//!         +----+-----------+--------+---+
//!              |           |        |
//!         +----v----+ +----v---+ +--v-----+
//!         | default | |  fast  | |  slow  |   ... one pipe per pool
//!         | workers | | workers| | workers|
//!         +----+----+ +----+---+ +--+-----+
//!              |           |        |
//!              +-----------v--------+
//!                   stats aggregator
//! ```

pub mod job;
pub mod node;
pub mod pipe;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
mod tests;
