use crate::metrics::collector::MetricsCollector;
use crate::Result;
use prometheus::{Encoder, TextEncoder};
use std::path::Path;
use tracing::info;

/// Renders the collector in Prometheus text exposition format
pub struct PrometheusExporter<'a> {
    collector: &'a MetricsCollector,
}

impl<'a> PrometheusExporter<'a> {
    pub fn new(collector: &'a MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn format_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.collector.registry().gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::SyscapError::MetricsError(format!("non-UTF-8 exposition: {}", e)))
    }

    /// Write the exposition to `path`, e.g. for the node-exporter textfile collector.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let text = self.format_metrics()?;
        std::fs::write(path, text)?;
        info!("Wrote metrics to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebpf::stats::CpuStats;

    #[test]
    fn test_format_metrics() {
        let collector = MetricsCollector::new().unwrap();
        collector.observe(&[CpuStats {
            cpu: 3,
            delivered: 42,
            lost: 2,
            malformed: 0,
        }]);

        let text = PrometheusExporter::new(&collector).format_metrics().unwrap();

        assert!(text.contains("# TYPE syscap_events_delivered_total counter"));
        assert!(text.contains("syscap_events_delivered_total{cpu=\"3\"} 42"));
        assert!(text.contains("syscap_events_lost_total{cpu=\"3\"} 2"));
    }

    #[test]
    fn test_write_to_file() {
        let collector = MetricsCollector::new().unwrap();
        collector.observe(&[CpuStats::default()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syscap.prom");
        PrometheusExporter::new(&collector).write_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("syscap_events_lost_total{cpu=\"0\"} 0"));
    }
}
