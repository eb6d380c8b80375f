// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::BTreeMap;

use serde::Serialize;

use super::TelemetryPoint;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Value at index `floor(0.9 * n)` of the ascending-sorted input.
pub fn p90(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let idx = ((0.9 * sorted.len() as f64) as usize).min(sorted.len() - 1);
    Some(sorted[idx])
}

/// Population standard deviation.
pub fn stddev(values: &[f64]) -> Option<f64> {
    let from = mean(values)?;
    let var = values.iter().map(|v| (v - from).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: Option<f64>,
    pub p90: Option<f64>,
}

impl Summary {
    pub fn of(latencies: &[f64]) -> Self {
        Self {
            count: latencies.len(),
            mean: mean(latencies),
            p90: p90(latencies),
        }
    }
}

/// Latency history of one tenant, split into heads: a new head starts when
/// the gap to the previous enqueue time exceeds the reset interval, and each
/// head keeps at most `head_size` points.
#[derive(Debug, Clone)]
pub struct TenantStat {
    id: u64,
    head_size: usize,
    reset_interval: f64,
    latencies: Vec<f64>,
    heads: Vec<Vec<f64>>,
    last_enqueued_at: Option<f64>,
}

impl TenantStat {
    pub fn new(id: u64, head_size: usize, reset_interval: f64) -> Self {
        Self {
            id,
            head_size,
            reset_interval,
            latencies: Vec::new(),
            heads: Vec::new(),
            last_enqueued_at: None,
        }
    }

    pub fn push(&mut self, point: &TelemetryPoint) {
        let lat = point.latency();
        self.latencies.push(lat);

        let reset = match self.last_enqueued_at {
            None => true,
            Some(last) => point.enqueued_at - last > self.reset_interval,
        };
        if reset {
            let mut head = Vec::with_capacity(self.head_size);
            if self.head_size > 0 {
                head.push(lat);
            }
            self.heads.push(head);
        } else if let Some(head) = self.heads.last_mut() {
            if head.len() < self.head_size {
                head.push(lat);
            }
        }

        self.last_enqueued_at = Some(point.enqueued_at);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.latencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latencies.is_empty()
    }

    pub fn latencies(&self) -> &[f64] {
        &self.latencies
    }

    pub fn heads(&self) -> &[Vec<f64>] {
        &self.heads
    }

    pub fn head_latencies(&self) -> Vec<f64> {
        self.heads.iter().flatten().copied().collect()
    }

    pub fn heads_total(&self) -> usize {
        self.heads.len()
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.latencies)
    }

    pub fn head_summary(&self) -> Summary {
        Summary::of(&self.head_latencies())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantRow {
    pub tenant: u64,
    pub heads_total: usize,
    pub head: Summary,
    pub all: Summary,
}

/// Standard deviation of each per-tenant column across tenants. Lower means
/// fairer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Spread {
    pub head_mean: Option<f64>,
    pub head_p90: Option<f64>,
    pub mean: Option<f64>,
    pub p90: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub tenants: Vec<TenantRow>,
    pub overall: Summary,
    /// Every point received, tracked or not.
    pub executed: usize,
    /// Seconds from the first enqueue to the last start of tracked points.
    pub span: Option<f64>,
    pub spread: Spread,
}

impl Report {
    pub fn build(points: &[TelemetryPoint], head_size: usize, reset_interval: f64) -> Self {
        let mut tenants: BTreeMap<u64, TenantStat> = BTreeMap::new();
        let mut all = Vec::new();
        let mut min_start: Option<f64> = None;
        let mut max_end: Option<f64> = None;

        for point in points.iter().filter(|p| !p.do_not_track) {
            min_start = Some(min_start.map_or(point.enqueued_at, |m| m.min(point.enqueued_at)));
            max_end = Some(max_end.map_or(point.started_at, |m| m.max(point.started_at)));
            all.push(point.latency());

            if let Some(tenant) = point.tenant {
                tenants
                    .entry(tenant)
                    .or_insert_with(|| TenantStat::new(tenant, head_size, reset_interval))
                    .push(point);
            }
        }

        let rows: Vec<TenantRow> = tenants
            .values()
            .map(|stat| TenantRow {
                tenant: stat.id(),
                heads_total: stat.heads_total(),
                head: stat.head_summary(),
                all: stat.summary(),
            })
            .collect();

        let column = |f: fn(&TenantRow) -> Option<f64>| -> Option<f64> {
            let values: Vec<f64> = rows.iter().filter_map(f).collect();
            stddev(&values)
        };
        let spread = Spread {
            head_mean: column(|r| r.head.mean),
            head_p90: column(|r| r.head.p90),
            mean: column(|r| r.all.mean),
            p90: column(|r| r.all.p90),
        };

        Self {
            overall: Summary::of(&all),
            executed: points.len(),
            span: min_start.zip(max_end).map(|(start, end)| end - start),
            spread,
            tenants: rows,
        }
    }
}

/// Tenant sequence processed by each `pool:worker`, in execution order. Feeds
/// the live per-worker view.
pub fn worker_lanes(points: &[TelemetryPoint]) -> BTreeMap<String, Vec<Option<u64>>> {
    let mut lanes: BTreeMap<String, Vec<Option<u64>>> = BTreeMap::new();
    for point in points.iter().filter(|p| !p.do_not_track) {
        lanes
            .entry(format!("{}:{}", point.pool, point.worker_id))
            .or_default()
            .push(point.tenant);
    }
    lanes
}
