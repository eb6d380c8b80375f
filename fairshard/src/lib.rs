// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! fairshard: a multi-tenant background job engine for comparing fairness
//! strategies on a shared worker budget.

pub mod clock;
pub mod config;
pub mod error;
pub mod job_engine;
pub mod scenario;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod worker;
