// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io::Write;
use std::sync::Mutex;

use fairshard::stats::report::{worker_lanes, Report, Summary};
use fairshard::stats::{Reporter, TelemetryPoint};

/// `z` for tenant 0, `y` for tenant 1 and so on; wraps after 26 tenants.
fn tenant_mark(tenant: Option<u64>) -> char {
    match tenant {
        Some(t) => (b'z' - (t % 26) as u8) as char,
        None => '?',
    }
}

/// One line per `pool:worker` with a mark per executed job. Lines longer
/// than `width` keep their tail.
pub fn lanes_text(points: &[TelemetryPoint], width: usize) -> Vec<String> {
    worker_lanes(points)
        .into_iter()
        .map(|(worker, tenants)| {
            let marks: String = tenants.into_iter().map(tenant_mark).collect();
            let label = format!("{worker:>12} ");
            let room = width.saturating_sub(label.len() + 3).max(1);
            if marks.len() > room {
                format!("{label}...{}", &marks[marks.len() - room..])
            } else {
                format!("{label}{marks}")
            }
        })
        .collect()
}

/// Redraws the worker lanes in place on stdout.
pub struct TerminalReporter {
    width: usize,
    drawn: Mutex<usize>,
}

impl TerminalReporter {
    pub fn new() -> Self {
        let width = std::env::var("COLUMNS")
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(120);
        Self {
            width,
            drawn: Mutex::new(0),
        }
    }

    fn draw(&self, points: &[TelemetryPoint]) {
        let Ok(mut drawn) = self.drawn.lock() else {
            return;
        };
        let lines = lanes_text(points, self.width);
        let mut out = std::io::stdout().lock();
        if *drawn > 0 {
            // cursor up, clear to the end of the screen
            let _ = write!(out, "\x1b[{}A\x1b[J", *drawn);
        }
        for line in &lines {
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
        *drawn = lines.len();
    }
}

impl Reporter for TerminalReporter {
    fn draw_live(&self, points: &[TelemetryPoint]) {
        self.draw(points);
    }

    fn draw_final(&self, points: &[TelemetryPoint]) {
        self.draw(points);
    }
}

fn secs(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => "-".into(),
    }
}

fn row(name: &str, jobs: String, heads: String, head: Summary, all: Summary) -> String {
    format!(
        "{name:>8} | {jobs:>6} | {heads:>5} | {:>9} | {:>8} | {:>8} | {:>8}",
        secs(head.mean),
        secs(head.p90),
        secs(all.mean),
        secs(all.p90)
    )
}

pub fn report_text(report: &Report) -> String {
    let mut lines = vec![
        format!(
            "{:>8} | {:>6} | {:>5} | {:>9} | {:>8} | {:>8} | {:>8}",
            "tenant", "jobs", "heads", "head mean", "head p90", "mean", "p90"
        ),
        "-".repeat(72),
    ];
    for tenant in &report.tenants {
        lines.push(row(
            &format!("{} ({})", tenant_mark(Some(tenant.tenant)), tenant.tenant),
            tenant.all.count.to_string(),
            tenant.heads_total.to_string(),
            tenant.head,
            tenant.all,
        ));
    }
    lines.push("-".repeat(72));
    lines.push(row(
        "overall",
        report.overall.count.to_string(),
        String::new(),
        Summary::default(),
        report.overall,
    ));
    lines.push(row(
        "stddev",
        String::new(),
        String::new(),
        Summary {
            count: 0,
            mean: report.spread.head_mean,
            p90: report.spread.head_p90,
        },
        Summary {
            count: 0,
            mean: report.spread.mean,
            p90: report.spread.p90,
        },
    ));
    lines.push(format!(
        "{} jobs executed in {}s",
        report.executed,
        secs(report.span)
    ));
    lines.join("\n")
}
