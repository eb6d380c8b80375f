// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! In-memory key-value store owned by a single thread.
//!
//! Every operation is a request/response round trip through the owner, so all
//! callers observe one consistent interleaving per key. There is no
//! cross-key atomicity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job_engine::pipe::{pipe, Inlet, Outlet};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store is not running")]
    Closed,

    #[error("reply {got} does not match request {expected}")]
    Mismatch { expected: String, got: String },

    #[error("failed to spawn store thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    fn incremented(self) -> Self {
        match self {
            Value::Int(v) => Value::Int(v + 1),
            Value::Float(v) => Value::Float(v + 1.0),
        }
    }

    /// One step down, never below zero. `None` when already at zero.
    fn decremented(self) -> Option<Self> {
        match self {
            Value::Int(v) if v > 0 => Some(Value::Int(v - 1)),
            Value::Float(v) if v > 0.0 => Some(Value::Float((v - 1.0).max(0.0))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Get(String),
    Set(String, Value),
    Incr(String),
    Decr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestId {
    caller: u64,
    seq: u64,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.caller, self.seq)
    }
}

#[derive(Debug)]
struct Request {
    id: RequestId,
    command: Command,
    reply: Inlet<Response>,
}

#[derive(Debug)]
struct Response {
    id: RequestId,
    value: Option<Value>,
}

static NEXT_CALLER: AtomicU64 = AtomicU64::new(1);

pub struct SharedStore;

impl SharedStore {
    /// Start the owner thread. It runs until every client is dropped.
    pub fn spawn() -> Result<StoreClient, StoreError> {
        let (requests, mailbox) = pipe();
        thread::Builder::new()
            .name("shared-store".into())
            .spawn(move || futures::executor::block_on(serve(mailbox)))
            .map_err(|e| StoreError::Spawn(e.to_string()))?;
        Ok(StoreClient::new(requests))
    }
}

async fn serve(mailbox: Outlet<Request>) {
    let mut store: HashMap<String, Value> = HashMap::new();
    info!("Shared store started");
    while let Ok(request) = mailbox.recv().await {
        let value = apply(&mut store, request.command);
        if request
            .reply
            .send(Response {
                id: request.id,
                value,
            })
            .await
            .is_err()
        {
            debug!("Caller of request {} went away", request.id);
        }
    }
    info!("Shared store shutting down, {} keys", store.len());
}

fn apply(store: &mut HashMap<String, Value>, command: Command) -> Option<Value> {
    match command {
        Command::Get(key) => store.get(&key).copied(),
        Command::Set(key, value) => {
            store.insert(key, value);
            Some(value)
        }
        Command::Incr(key) => {
            let entry = store.entry(key).or_insert(Value::Int(0));
            *entry = entry.incremented();
            Some(*entry)
        }
        Command::Decr(key) => match store.get_mut(&key) {
            Some(current) => {
                if let Some(next) = current.decremented() {
                    *current = next;
                }
                Some(*current)
            }
            None => None,
        },
    }
}

/// A caller of the store. Each client (and each clone) has its own caller id;
/// replies are checked against the id of the request they answer.
#[derive(Debug)]
pub struct StoreClient {
    caller: u64,
    seq: AtomicU64,
    requests: Inlet<Request>,
}

impl Clone for StoreClient {
    fn clone(&self) -> Self {
        Self::new(self.requests.clone())
    }
}

impl StoreClient {
    fn new(requests: Inlet<Request>) -> Self {
        Self {
            caller: NEXT_CALLER.fetch_add(1, Ordering::Relaxed),
            seq: AtomicU64::new(0),
            requests,
        }
    }

    pub fn caller_id(&self) -> u64 {
        self.caller
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.call(Command::Get(key.into())).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        Ok(self
            .call(Command::Set(key.into(), value))
            .await?
            .unwrap_or(value))
    }

    /// Absent keys count as zero.
    pub async fn incr(&self, key: &str) -> Result<Value, StoreError> {
        Ok(self
            .call(Command::Incr(key.into()))
            .await?
            .unwrap_or(Value::Int(1)))
    }

    /// Saturating decrement: a value already at zero is returned unchanged,
    /// an absent key stays absent.
    pub async fn decr(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.call(Command::Decr(key.into())).await
    }

    async fn call(&self, command: Command) -> Result<Option<Value>, StoreError> {
        let id = RequestId {
            caller: self.caller,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let (reply, answer) = pipe();
        self.requests
            .send(Request { id, command, reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        let response = answer.recv().await.map_err(|_| StoreError::Closed)?;
        if response.id != id {
            return Err(StoreError::Mismatch {
                expected: id.to_string(),
                got: response.id.to_string(),
            });
        }
        Ok(response.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_get_absent_and_set() {
        let store = SharedStore::spawn().unwrap();
        block_on(async {
            assert_eq!(store.get("a").await.unwrap(), None);
            assert_eq!(store.set("a", Value::Int(4)).await.unwrap(), Value::Int(4));
            assert_eq!(store.get("a").await.unwrap(), Some(Value::Int(4)));
            store.set("a", Value::Float(1.5)).await.unwrap();
            assert_eq!(store.get("a").await.unwrap(), Some(Value::Float(1.5)));
        });
    }

    #[test]
    fn test_incr_starts_from_zero() {
        let store = SharedStore::spawn().unwrap();
        block_on(async {
            assert_eq!(store.incr("n").await.unwrap(), Value::Int(1));
            assert_eq!(store.incr("n").await.unwrap(), Value::Int(2));
        });
    }

    #[test]
    fn test_decr_saturates_at_zero() {
        let store = SharedStore::spawn().unwrap();
        block_on(async {
            assert_eq!(store.decr("missing").await.unwrap(), None);
            assert_eq!(store.get("missing").await.unwrap(), None);

            store.set("c", Value::Int(3)).await.unwrap();
            let mut seen = Vec::new();
            for _ in 0..6 {
                seen.push(store.decr("c").await.unwrap().unwrap().as_i64());
            }
            assert_eq!(seen, [2, 1, 0, 0, 0, 0]);
            assert!(seen.windows(2).all(|w| w[0] >= w[1]));
        });
    }

    #[test]
    fn test_concurrent_incr_is_linearized() {
        let store = SharedStore::spawn().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = store.clone();
                thread::spawn(move || {
                    block_on(async {
                        for _ in 0..100 {
                            client.incr("shared").await.unwrap();
                        }
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let total = block_on(store.get("shared")).unwrap();
        assert_eq!(total, Some(Value::Int(800)));
    }

    #[test]
    fn test_clones_are_distinct_callers() {
        let store = SharedStore::spawn().unwrap();
        let other = store.clone();
        assert_ne!(store.caller_id(), other.caller_id());
    }

    #[test]
    fn test_float_decrement_clamps() {
        let store = SharedStore::spawn().unwrap();
        block_on(async {
            store.set("f", Value::Float(0.5)).await.unwrap();
            assert_eq!(store.decr("f").await.unwrap(), Some(Value::Float(0.0)));
            assert_eq!(store.decr("f").await.unwrap(), Some(Value::Float(0.0)));
        });
    }
}
