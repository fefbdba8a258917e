use crate::cli::{Commands, OutputFormat, SessionArgs};
use crate::Result;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use crate::ebpf::events::SyscallRecord;

#[cfg(target_os = "linux")]
const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Check { session } => handle_check(session).await,
        Commands::Trace {
            session,
            duration,
            format,
            metrics,
        } => handle_trace(session, duration, format, metrics).await,
    }
}

#[cfg(not(target_os = "linux"))]
async fn handle_check(_session: SessionArgs) -> Result<()> {
    Err(crate::SyscapError::UnsupportedFeature(
        "eBPF capture requires Linux".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
async fn handle_trace(
    _session: SessionArgs,
    _duration: Option<u64>,
    _format: OutputFormat,
    _metrics: Option<PathBuf>,
) -> Result<()> {
    Err(crate::SyscapError::UnsupportedFeature(
        "eBPF capture requires Linux".to_string(),
    ))
}

#[cfg(target_os = "linux")]
async fn handle_check(session: SessionArgs) -> Result<()> {
    use crate::ebpf::loader::run_preflight_checks;

    let config = session.resolve()?;
    let report = run_preflight_checks(&config)?;

    println!("Kernel:     {}", report.kernel_release);
    println!(
        "BTF:        {}",
        if report.btf_available { "available" } else { "missing" }
    );
    println!(
        "Privileges: {}",
        if report.privileged { "ok" } else { "insufficient" }
    );
    match &report.tracefs_root {
        Some(root) => println!("Layout:     raw_syscalls:sys_enter OK ({})", root.display()),
        None => println!(
            "Layout:     raw context, syscall id at index {}",
            config.syscall_id_index
        ),
    }
    println!("Variant {} ready to attach", config.variant);
    Ok(())
}

#[cfg(target_os = "linux")]
async fn handle_trace(
    session: SessionArgs,
    duration: Option<u64>,
    format: OutputFormat,
    metrics: Option<PathBuf>,
) -> Result<()> {
    use crate::metrics::{MetricsCollector, PrometheusExporter};
    use crate::session::TraceSession;
    use std::io::{BufWriter, Write};
    use std::time::Duration;
    use tracing::info;

    let config = session.resolve()?;
    let mut trace = TraceSession::prepare(&config).await?;
    trace.forward_probe_logs();
    if let Err(e) = trace.attach() {
        trace.stop().await;
        return Err(e);
    }

    // Built once so a signal arriving mid-write is still observed.
    let stop = async move {
        let deadline = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = deadline => info!("Trace duration elapsed"),
        }
    };

    let mut out = BufWriter::new(std::io::stdout());
    info!("Tracing; press Ctrl-C to stop");
    let outcome = stream_records(&mut trace, &mut out, format, stop).await;
    // A closed stdout (e.g. `| head`) is not worth reporting on top of the summary.
    let _ = out.flush();
    drop(out);

    let stats = trace.stop().await;
    let snapshot = stats.snapshot();

    eprintln!("{:>5} {:>12} {:>10} {:>10}", "CPU", "DELIVERED", "LOST", "MALFORMED");
    for cpu in &snapshot {
        eprintln!(
            "{:>5} {:>12} {:>10} {:>10}",
            cpu.cpu, cpu.delivered, cpu.lost, cpu.malformed
        );
    }
    let totals = stats.totals();
    eprintln!(
        "{:>5} {:>12} {:>10} {:>10}",
        "all", totals.delivered, totals.lost, totals.malformed
    );

    if let Some(path) = metrics {
        let collector = MetricsCollector::new()?;
        collector.observe(&snapshot);
        PrometheusExporter::new(&collector).write_to(&path)?;
    }

    outcome
}

/// Anything the trace loop can pull decoded records from
#[cfg(target_os = "linux")]
trait RecordSource {
    async fn next_record(&mut self) -> Option<SyscallRecord>;
}

#[cfg(target_os = "linux")]
impl RecordSource for crate::session::TraceSession {
    async fn next_record(&mut self) -> Option<SyscallRecord> {
        self.recv().await
    }
}

/// Print records until `stop` resolves or the source runs dry.
#[cfg(target_os = "linux")]
async fn stream_records<S, W, F>(
    source: &mut S,
    out: &mut W,
    format: OutputFormat,
    stop: F,
) -> Result<()>
where
    S: RecordSource,
    W: std::io::Write,
    F: std::future::Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut flush = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            record = source.next_record() => match record {
                Some(record) => write_record(&mut *out, &record, format)?,
                None => {
                    tracing::warn!("All perf readers stopped");
                    break;
                }
            },
            _ = flush.tick() => out.flush()?,
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn write_record<W: std::io::Write>(
    out: &mut W,
    record: &SyscallRecord,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", record)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, record).map_err(std::io::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tokio::sync::mpsc;

    impl RecordSource for mpsc::Receiver<SyscallRecord> {
        async fn next_record(&mut self) -> Option<SyscallRecord> {
            self.recv().await
        }
    }

    fn record(pid: u32) -> SyscallRecord {
        SyscallRecord {
            cpu: 0,
            pid,
            syscall_id: 0,
            args: None,
        }
    }

    /// Sends SIGINT to the test process from inside its first write.
    #[derive(Default)]
    struct InterruptingWriter {
        raised: bool,
        written: Vec<u8>,
    }

    impl Write for InterruptingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.raised {
                self.raised = true;
                unsafe { libc::raise(libc::SIGINT) };
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_record_formats() {
        let record = SyscallRecord {
            cpu: 1,
            ..record(42)
        };

        let mut text = Vec::new();
        write_record(&mut text, &record, OutputFormat::Text).unwrap();
        assert_eq!(String::from_utf8(text).unwrap(), "cpu=1 pid=42 syscall=0\n");

        let mut json = Vec::new();
        write_record(&mut json, &record, OutputFormat::Json).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            "{\"cpu\":1,\"pid\":42,\"syscall_id\":0}\n"
        );
    }

    #[tokio::test]
    async fn test_stream_stops_when_source_closes() {
        let (tx, mut rx) = mpsc::channel(8);
        for pid in 1..=3 {
            tx.send(record(pid)).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        stream_records(&mut rx, &mut out, OutputFormat::Text, std::future::pending())
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("pid=3"));
    }

    #[tokio::test]
    async fn test_interrupt_during_write_stops_stream() {
        let (tx, mut rx) = mpsc::channel(16);
        for pid in 0..8 {
            tx.send(record(pid)).await.unwrap();
        }

        let stop = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let mut out = InterruptingWriter::default();

        // The sender stays open, so only the interrupt can end the stream.
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            stream_records(&mut rx, &mut out, OutputFormat::Text, stop),
        )
        .await;

        assert!(out.raised);
        assert!(finished.is_ok(), "SIGINT raised during a write was lost");
        drop(tx);
    }
}
