// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

use crate::clock;

/// Open, string-keyed job arguments.
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub const TENANT_KEY: &str = "tenant";

/// A unit of work travelling from a producer to exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Name the worker registry resolves to a handler.
    pub worker_type: String,
    /// Pool (queue) the router forwards this job to.
    pub pool: String,
    pub payload: Payload,
    /// Monotonic seconds. Jobs spawned by a running job inherit the parent's
    /// value so latency is measured from the original submission.
    pub enqueued_at: f64,
}

impl Job {
    pub fn new(pool: impl Into<String>, worker_type: impl Into<String>, payload: Payload) -> Self {
        Self::with_enqueued_at(pool, worker_type, payload, clock::monotonic())
    }

    pub fn with_enqueued_at(
        pool: impl Into<String>,
        worker_type: impl Into<String>,
        payload: Payload,
        enqueued_at: f64,
    ) -> Self {
        Self {
            worker_type: worker_type.into(),
            pool: pool.into(),
            payload,
            enqueued_at,
        }
    }

    pub fn tenant(&self) -> Option<u64> {
        self.payload.get(TENANT_KEY).and_then(|v| v.as_u64())
    }

    /// Free-form description, used for logging
    pub fn desc(&self) -> String {
        match self.tenant() {
            Some(tenant) => format!("{}@{} (tenant {})", self.worker_type, self.pool, tenant),
            None => format!("{}@{}", self.worker_type, self.pool),
        }
    }
}

/// What travels through the intake and the pool pipes. `Stop` is the
/// cooperative shutdown sentinel; it is ordered with real jobs, so everything
/// sent before it is still delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Job(Job),
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tenant_from_payload() {
        let mut payload = Payload::new();
        payload.insert(TENANT_KEY.into(), json!(3));
        let job = Job::new("default", "mailer", payload);
        assert_eq!(job.tenant(), Some(3));
        assert_eq!(job.desc(), "mailer@default (tenant 3)");
    }

    #[test]
    fn test_job_without_tenant() {
        let job = Job::with_enqueued_at("a", "mailer", Payload::new(), 1.5);
        assert_eq!(job.tenant(), None);
        assert_eq!(job.enqueued_at, 1.5);
        assert_eq!(job.desc(), "mailer@a");
    }
}
