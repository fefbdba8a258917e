//! A capture session: one probe variant attached, one transport draining it

use crate::config::TraceConfig;
use crate::ebpf::events::SyscallRecord;
use crate::ebpf::loader::ProbeManager;
use crate::ebpf::stats::TransportStats;
use crate::ebpf::transport::Transport;
use crate::ebpf::{Probe, Variant};
use crate::Result;
use aya_log::EbpfLogger;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// aya-log's readers cannot be stopped, so at most one session per process
/// gets them.
static PROBE_LOGS: OnceLock<()> = OnceLock::new();

pub struct TraceSession {
    manager: ProbeManager,
    transport: Transport,
    started: Instant,
}

impl TraceSession {
    /// Load, register buffers, then attach.
    ///
    /// Any failure (pre-flight, layout mismatch, load, attach) is returned
    /// here and nothing is left attached.
    pub async fn start(config: &TraceConfig) -> Result<Self> {
        let mut session = Self::prepare(config).await?;
        if let Err(e) = session.attach() {
            session.stop().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Load the probe and register one buffer per CPU without attaching.
    ///
    /// Counters are all zero until [`attach`](Self::attach).
    pub async fn prepare(config: &TraceConfig) -> Result<Self> {
        let mut manager = ProbeManager::new(config)?;
        let map = manager.take_events_map()?;
        let transport = Transport::open(map, config.variant, config)?;

        Ok(Self {
            manager,
            transport,
            started: Instant::now(),
        })
    }

    /// Forward the probe's own log records into `tracing`.
    ///
    /// Only the first call in a process does anything: the forwarding tasks
    /// live until the process exits. Call before [`attach`](Self::attach).
    pub fn forward_probe_logs(&mut self) {
        if PROBE_LOGS.set(()).is_err() {
            debug!("Probe log forwarding already running in this process");
            return;
        }
        if let Err(e) = EbpfLogger::init(self.manager.bpf_mut()) {
            warn!(
                "Failed to initialize EbpfLogger: {}. eBPF probe logs will not be visible.",
                e
            );
        }
    }

    /// Attach the probe. On failure nothing is attached and the session
    /// still has to be stopped to release its buffers.
    pub fn attach(&mut self) -> Result<()> {
        self.manager.attach()?;

        self.started = Instant::now();
        info!(
            "Capturing syscall entries via {} on {} CPUs",
            self.variant().attach_point(),
            self.transport.stats().cpu_count()
        );
        Ok(())
    }

    pub fn variant(&self) -> Variant {
        self.manager.variant()
    }

    pub fn is_attached(&self) -> bool {
        self.manager.is_attached()
    }

    pub async fn recv(&mut self) -> Option<SyscallRecord> {
        self.transport.recv().await
    }

    pub fn stats(&self) -> &TransportStats {
        self.transport.stats()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Detach first so no new records arrive, then stop the readers and
    /// release every kernel object.
    pub async fn stop(mut self) -> TransportStats {
        if let Err(e) = self.manager.detach() {
            warn!("Failed to detach probe: {}", e);
        }
        let stats = self.transport.close().await;
        self.manager.unload();

        let totals = stats.totals();
        info!(
            "Session stopped after {:.1}s: {} delivered, {} lost, {} malformed",
            self.started.elapsed().as_secs_f64(),
            totals.delivered,
            totals.lost,
            totals.malformed
        );
        stats
    }
}
