//! Session configuration
//!
//! Loaded from an optional YAML file; CLI flags override individual values.
//!
//! ```yaml
//! variant: raw
//! per_cpu_pages: 128
//! syscall_id_index: 1
//! channel_capacity: 4096
//! tracefs_root: /sys/kernel/tracing
//! ```

use crate::ebpf::Variant;
use crate::{Result, SyscapError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use syscap_common::raw_context;

/// 64 pages = 256KB per CPU with 4K pages, ~4K structured records.
pub const DEFAULT_PER_CPU_PAGES: usize = 64;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Attachment point, fixed for the whole session
    pub variant: Variant,
    /// Perf buffer size per CPU, in pages. Must be a power of two.
    pub per_cpu_pages: usize,
    /// Position of the syscall number in the raw tracepoint context
    pub syscall_id_index: u32,
    /// Records buffered between the per-CPU readers and the consumer
    pub channel_capacity: usize,
    /// tracefs mount point; auto-detected when unset
    pub tracefs_root: Option<PathBuf>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            per_cpu_pages: DEFAULT_PER_CPU_PAGES,
            syscall_id_index: raw_context::DEFAULT_SYSCALL_ID_INDEX,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tracefs_root: None,
        }
    }
}

impl TraceConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: TraceConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SyscapError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_cpu_pages == 0 || !self.per_cpu_pages.is_power_of_two() {
            return Err(SyscapError::ConfigError(format!(
                "per_cpu_pages must be a non-zero power of two, got {}",
                self.per_cpu_pages
            )));
        }

        if self.syscall_id_index > raw_context::MAX_SYSCALL_ID_INDEX {
            return Err(SyscapError::ConfigError(format!(
                "syscall_id_index must be at most {}, got {}",
                raw_context::MAX_SYSCALL_ID_INDEX,
                self.syscall_id_index
            )));
        }

        if self.channel_capacity == 0 {
            return Err(SyscapError::ConfigError(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TraceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.variant, Variant::Structured);
        assert_eq!(config.syscall_id_index, 1);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TraceConfig::from_yaml_str("variant: raw\nper_cpu_pages: 8\n").unwrap();

        assert_eq!(config.variant, Variant::Raw);
        assert_eq!(config.per_cpu_pages, 8);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.tracefs_root.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(TraceConfig::from_yaml_str("per_cpu_pages: 48").is_err());
        assert!(TraceConfig::from_yaml_str("per_cpu_pages: 0").is_err());
        assert!(TraceConfig::from_yaml_str("syscall_id_index: 2").is_err());
        assert!(TraceConfig::from_yaml_str("channel_capacity: 0").is_err());
        assert!(TraceConfig::from_yaml_str("variant: kprobe").is_err());
        assert!(TraceConfig::from_yaml_str("buffer: 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "variant: raw").unwrap();
        writeln!(file, "syscall_id_index: 0").unwrap();
        writeln!(file, "tracefs_root: /sys/kernel/debug/tracing").unwrap();

        let config = TraceConfig::load(file.path()).unwrap();
        assert_eq!(config.syscall_id_index, 0);
        assert_eq!(
            config.tracefs_root.as_deref(),
            Some(Path::new("/sys/kernel/debug/tracing"))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = TraceConfig::load(Path::new("/nonexistent/syscap.yaml")).unwrap_err();
        assert!(matches!(err, SyscapError::ConfigError(_)));
    }
}
