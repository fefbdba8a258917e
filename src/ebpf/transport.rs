//! Userspace side of the per-CPU perf buffer transport
//!
//! Each online CPU gets its own perf ring, mapped into this process. The probe
//! on that CPU is the only writer, the reader task for that CPU the only
//! reader, so no locking happens on either side. When a ring is full the kernel
//! drops the record and reports the count with the next read; those counts
//! feed the per-CPU lost counters.

use crate::config::TraceConfig;
use crate::ebpf::events::SyscallRecord;
use crate::ebpf::stats::{CpuRecorder, TransportStats};
use crate::ebpf::Variant;
use crate::{Result, SyscapError};
use aya::maps::{
    perf::{AsyncPerfEventArray, AsyncPerfEventArrayBuffer, Events},
    Map, MapData,
};
use bytes::BytesMut;
use futures::future::join_all;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Records pulled from a perf ring per wakeup
const READ_BATCH: usize = 64;

/// Consumer handle on the per-CPU perf buffers of one session
pub struct Transport {
    variant: Variant,
    rx: mpsc::Receiver<SyscallRecord>,
    stats: TransportStats,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Register one perf buffer per online CPU on `map` and start a reader for
    /// each. Must run before the probe is attached, so the first record
    /// already has somewhere to go.
    pub fn open(map: Map, variant: Variant, config: &TraceConfig) -> Result<Self> {
        let mut events = AsyncPerfEventArray::try_from(map)
            .map_err(|e| SyscapError::EbpfError(format!("perf event array: {}", e)))?;

        let cpus = aya::util::online_cpus()
            .map_err(|(msg, e)| SyscapError::EbpfError(format!("online_cpus: {}: {}", msg, e)))?;
        debug!(
            "Registering {} pages of perf buffer on {} CPUs",
            config.per_cpu_pages,
            cpus.len()
        );

        let stats = TransportStats::new(&cpus);
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();
        let mut readers = Vec::with_capacity(cpus.len());

        for cpu in cpus {
            let buffer = events
                .open(cpu, Some(config.per_cpu_pages))
                .map_err(|e| SyscapError::EbpfError(format!("perf buffer cpu {}: {}", cpu, e)))?;
            let recorder = stats.recorder(cpu).ok_or_else(|| {
                SyscapError::EbpfError(format!("cpu {} missing from transport stats", cpu))
            })?;

            let reader = CpuReader {
                buffer,
                variant,
                recorder,
                tx: tx.clone(),
            };
            readers.push(tokio::spawn(reader.run(cancel.clone())));
        }

        Ok(Self {
            variant,
            rx,
            stats,
            cancel,
            readers,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Wait for the next record from any CPU.
    ///
    /// Returns `None` once every reader has stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<SyscallRecord> {
        self.rx.recv().await
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Stop every reader and release the per-CPU buffers.
    ///
    /// Records still queued are discarded; the returned counters are final.
    pub async fn close(self) -> TransportStats {
        let Transport {
            rx,
            stats,
            cancel,
            readers,
            ..
        } = self;

        // Readers blocked on a full queue see the closed channel and exit.
        drop(rx);
        cancel.cancel();
        for result in join_all(readers).await {
            if let Err(e) = result {
                warn!("Perf reader task failed: {}", e);
            }
        }
        debug!("All perf readers stopped");
        stats
    }
}

/// Drains one CPU's perf ring
struct CpuReader {
    buffer: AsyncPerfEventArrayBuffer<MapData>,
    variant: Variant,
    recorder: CpuRecorder,
    tx: mpsc::Sender<SyscallRecord>,
}

impl CpuReader {
    async fn run(mut self, cancel: CancellationToken) {
        let cpu = self.recorder.cpu();
        let capacity = self.variant.record_size() + 8;
        let mut bufs: Vec<BytesMut> = (0..READ_BATCH)
            .map(|_| BytesMut::with_capacity(capacity))
            .collect();

        loop {
            let events = tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("[cpu {}] reader cancelled", cpu);
                    return;
                }
                events = self.buffer.read_events(&mut bufs) => events,
            };

            let events = match events {
                Ok(events) => events,
                Err(e) => {
                    warn!("[cpu {}] perf buffer read failed: {}", cpu, e);
                    return;
                }
            };

            if deliver_batch(self.variant, &self.recorder, &self.tx, events, &bufs)
                .await
                .is_break()
            {
                trace!("[cpu {}] consumer gone, stopping", cpu);
                return;
            }
        }
    }
}

/// Account for one `read_events` result and forward its records.
///
/// Breaks once the consumer has dropped its receiver.
async fn deliver_batch(
    variant: Variant,
    recorder: &CpuRecorder,
    tx: &mpsc::Sender<SyscallRecord>,
    events: Events,
    bufs: &[BytesMut],
) -> ControlFlow<()> {
    let cpu = recorder.cpu();

    if events.lost > 0 {
        recorder.record_lost(events.lost as u64);
        debug!("[cpu {}] kernel dropped {} records", cpu, events.lost);
    }

    for raw in bufs.iter().take(events.read) {
        match SyscallRecord::decode(variant, cpu, raw) {
            Ok(record) => {
                if tx.send(record).await.is_err() {
                    return ControlFlow::Break(());
                }
                recorder.record_delivered(1);
            }
            Err(e) => {
                recorder.record_malformed(1);
                warn!("[cpu {}] skipping record: {}", cpu, e);
            }
        }
    }

    ControlFlow::Continue(())
}
