// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggedExecution {
    pub tenant: Option<u64>,

    pub pool: String,

    pub worker_id: usize,

    /// Monotonic seconds, taken when the job body starts.
    pub started_at: f64,

    pub finished_at: f64,

    /// Payload keys the job body received.
    pub keys: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExecLog {
    pub executions: Vec<LoggedExecution>,
}

impl ExecLog {
    pub fn by_tenant(&self) -> BTreeMap<Option<u64>, Vec<&LoggedExecution>> {
        let mut tenants: BTreeMap<Option<u64>, Vec<&LoggedExecution>> = BTreeMap::new();
        for execution in &self.executions {
            tenants.entry(execution.tenant).or_default().push(execution);
        }
        tenants
    }

    /// How many jobs of `tenant` ran on each pool.
    pub fn pools_of(&self, tenant: u64) -> BTreeMap<String, usize> {
        let mut pools = BTreeMap::new();
        for execution in self.executions.iter().filter(|e| e.tenant == Some(tenant)) {
            *pools.entry(execution.pool.clone()).or_insert(0) += 1;
        }
        pools
    }
}
