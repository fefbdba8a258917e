use crate::ebpf::stats::CpuStats;
use crate::Result;
use prometheus::{IntCounterVec, Opts, Registry};

/// Prometheus view of the per-CPU transport counters.
///
/// The transport owns the authoritative counts; `observe` brings the
/// registry up to date with a snapshot by adding only the difference.
pub struct MetricsCollector {
    registry: Registry,
    delivered: IntCounterVec,
    lost: IntCounterVec,
    malformed: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let delivered = IntCounterVec::new(
            Opts::new(
                "syscap_events_delivered_total",
                "Syscall records delivered to the consumer",
            ),
            &["cpu"],
        )?;
        let lost = IntCounterVec::new(
            Opts::new(
                "syscap_events_lost_total",
                "Syscall records dropped by the kernel because a per-CPU buffer was full",
            ),
            &["cpu"],
        )?;
        let malformed = IntCounterVec::new(
            Opts::new(
                "syscap_events_malformed_total",
                "Syscall records skipped because their size did not match the layout",
            ),
            &["cpu"],
        )?;

        registry.register(Box::new(delivered.clone()))?;
        registry.register(Box::new(lost.clone()))?;
        registry.register(Box::new(malformed.clone()))?;

        Ok(Self {
            registry,
            delivered,
            lost,
            malformed,
        })
    }

    pub fn observe(&self, snapshot: &[CpuStats]) {
        for stats in snapshot {
            let cpu = stats.cpu.to_string();
            advance(&self.delivered, &cpu, stats.delivered);
            advance(&self.lost, &cpu, stats.lost);
            advance(&self.malformed, &cpu, stats.malformed);
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn advance(counter: &IntCounterVec, cpu: &str, value: u64) {
    let counter = counter.with_label_values(&[cpu]);
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}
