//! Per-CPU transport accounting
//!
//! Each reader task owns the recorder for its CPU; the consumer takes
//! snapshots. Counters only ever grow and belong to one session: a new session
//! builds a new `TransportStats`, which starts at zero.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CpuCounters {
    cpu: u32,
    delivered: AtomicU64,
    lost: AtomicU64,
    malformed: AtomicU64,
}

impl CpuCounters {
    fn new(cpu: u32) -> Self {
        Self {
            cpu,
            delivered: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }
}

/// Point-in-time counters for one CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CpuStats {
    pub cpu: u32,
    /// Records decoded and handed to the consumer
    pub delivered: u64,
    /// Records the kernel dropped because the CPU's buffer was full
    pub lost: u64,
    /// Records whose size did not match the expected layout
    pub malformed: u64,
}

impl CpuStats {
    /// Every syscall entry the probe saw on this CPU ends up in exactly one
    /// of the three counters.
    pub fn observed(&self) -> u64 {
        self.delivered + self.lost + self.malformed
    }
}

/// Shared handle on the counters of every CPU in a session
#[derive(Debug, Clone)]
pub struct TransportStats {
    cpus: Arc<[CpuCounters]>,
}

impl TransportStats {
    pub fn new(cpus: &[u32]) -> Self {
        Self {
            cpus: cpus.iter().copied().map(CpuCounters::new).collect(),
        }
    }

    /// Recorder for one CPU, or `None` if the CPU was not registered.
    pub fn recorder(&self, cpu: u32) -> Option<CpuRecorder> {
        let index = self.cpus.iter().position(|c| c.cpu == cpu)?;
        Some(CpuRecorder {
            stats: self.clone(),
            index,
        })
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn snapshot(&self) -> Vec<CpuStats> {
        self.cpus
            .iter()
            .map(|c| CpuStats {
                cpu: c.cpu,
                delivered: c.delivered.load(Ordering::Relaxed),
                lost: c.lost.load(Ordering::Relaxed),
                malformed: c.malformed.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Sum over all CPUs; `cpu` is meaningless in the result and left at 0.
    pub fn totals(&self) -> CpuStats {
        self.snapshot()
            .into_iter()
            .fold(CpuStats::default(), |acc, s| CpuStats {
                cpu: 0,
                delivered: acc.delivered + s.delivered,
                lost: acc.lost + s.lost,
                malformed: acc.malformed + s.malformed,
            })
    }
}

/// Write side of one CPU's counters
#[derive(Debug, Clone)]
pub struct CpuRecorder {
    stats: TransportStats,
    index: usize,
}

impl CpuRecorder {
    pub fn cpu(&self) -> u32 {
        self.counters().cpu
    }

    pub fn record_delivered(&self, n: u64) {
        self.counters().delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_lost(&self, n: u64) {
        self.counters().lost.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, n: u64) {
        self.counters().malformed.fetch_add(n, Ordering::Relaxed);
    }

    fn counters(&self) -> &CpuCounters {
        &self.stats.cpus[self.index]
    }
}
