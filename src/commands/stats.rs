//! Command statistics
//!
//! Per-command-kind tallies of runs, failures and files written, plus the number of
//! actions currently waiting on the analyzer. Each run holds a [`RunGuard`]; dropping it
//! without reporting an outcome counts as a failure.

use crate::proto::CommandKind;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub runs: u64,
    pub failed: u64,
    pub artifacts_written: u64,
    pub persist_failures: u64,
    pub last_duration: Option<Duration>,
}

#[derive(Debug, Default)]
struct Tally {
    in_flight: u64,
    by_kind: HashMap<CommandKind, KindStats>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandStats {
    tally: Arc<Mutex<Tally>>,
}

impl CommandStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, kind: CommandKind) -> RunGuard {
        self.update(|tally| {
            tally.in_flight += 1;
            tally.by_kind.entry(kind).or_default().runs += 1;
        });

        RunGuard {
            stats: self.clone(),
            kind,
            started: Instant::now(),
            settled: false,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot {
            in_flight: tally.in_flight,
            by_kind: CommandKind::ALL
                .into_iter()
                .filter_map(|kind| tally.by_kind.get(&kind).map(|stats| (kind, *stats)))
                .collect(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Tally)) {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tally);
    }
}

/// One action waiting on the analyzer.
pub struct RunGuard {
    stats: CommandStats,
    kind: CommandKind,
    started: Instant,
    settled: bool,
}

impl RunGuard {
    pub fn succeeded(mut self, written: usize, persist_failures: usize) {
        self.settle(|stats, elapsed| {
            stats.artifacts_written += written as u64;
            stats.persist_failures += persist_failures as u64;
            stats.last_duration = Some(elapsed);
        });
    }

    pub fn failed(mut self) {
        self.settle(|stats, _| stats.failed += 1);
    }

    fn settle(&mut self, f: impl FnOnce(&mut KindStats, Duration)) {
        if self.settled {
            return;
        }
        self.settled = true;

        let (kind, elapsed) = (self.kind, self.started.elapsed());
        self.stats.update(|tally| {
            tally.in_flight = tally.in_flight.saturating_sub(1);
            f(tally.by_kind.entry(kind).or_default(), elapsed);
        });
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.settle(|stats, _| stats.failed += 1);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub in_flight: u64,
    /// Only kinds that have run, in [`CommandKind::ALL`] order.
    pub by_kind: Vec<(CommandKind, KindStats)>,
}

impl StatsSnapshot {
    pub fn get(&self, kind: CommandKind) -> KindStats {
        self.by_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, stats)| *stats)
            .unwrap_or_default()
    }

    pub fn total_runs(&self) -> u64 {
        self.by_kind.iter().map(|(_, s)| s.runs).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.by_kind.iter().map(|(_, s)| s.failed).sum()
    }

    /// One line per kind that has run, e.g. `call-graph: 2 run(s), 0 failed, 2 file(s), last 140ms`.
    pub fn summary_lines(&self) -> Vec<String> {
        self.by_kind
            .iter()
            .map(|(kind, s)| {
                let mut line = format!(
                    "{}: {} run(s), {} failed, {} file(s)",
                    kind.action_name(),
                    s.runs,
                    s.failed,
                    s.artifacts_written
                );
                if s.persist_failures > 0 {
                    line.push_str(&format!(", {} not saved", s.persist_failures));
                }
                if let Some(last) = s.last_duration {
                    line.push_str(&format!(", last {}ms", last.as_millis()));
                }
                line
            })
            .collect()
    }
}
