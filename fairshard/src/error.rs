// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

/// Errors raised by the job engine itself. Job bodies report their own
/// failures through `anyhow`; those never end up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("queue already registered: {0}")]
    DuplicateQueue(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("worker type already registered: {0}")]
    DuplicateWorker(String),

    #[error("unknown worker type: {0}")]
    UnknownWorker(String),

    #[error("node already started")]
    AlreadyStarted,

    #[error("node not started")]
    NotStarted,

    #[error("{0} pipe closed")]
    Closed(&'static str),

    #[error("failed to spawn {0}: {1}")]
    Spawn(String, String),

    #[error("{0} thread panicked")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
