pub mod events;
pub mod format;
pub mod stats;

#[cfg(target_os = "linux")]
pub mod loader;
#[cfg(target_os = "linux")]
pub mod transport;

use crate::Result;
use serde::{Deserialize, Serialize};
use syscap_common::{names, RawSyscallEvent, SyscallEvent};

/// Lifecycle of an attachable kernel probe.
pub trait Probe {
    fn attach(&mut self) -> Result<()>;

    fn detach(&mut self) -> Result<()>;

    fn is_attached(&self) -> bool;
}

/// Which kernel tracing facility the probe attaches to.
///
/// Chosen once per session. There is no fallback from one to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// `raw_syscalls:sys_enter` tracepoint: syscall id and all six arguments.
    #[default]
    Structured,
    /// `sys_enter` raw tracepoint: syscall id only, ABI-stable attachment.
    Raw,
}

impl Variant {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Variant::Structured => "structured",
            Variant::Raw => "raw",
        }
    }

    pub const fn program_name(&self) -> &'static str {
        match self {
            Variant::Structured => names::STRUCTURED_PROGRAM,
            Variant::Raw => names::RAW_PROGRAM,
        }
    }

    pub const fn map_name(&self) -> &'static str {
        match self {
            Variant::Structured => names::STRUCTURED_EVENTS_MAP,
            Variant::Raw => names::RAW_EVENTS_MAP,
        }
    }

    /// Size of one wire record produced by this variant.
    pub const fn record_size(&self) -> usize {
        match self {
            Variant::Structured => SyscallEvent::SIZE,
            Variant::Raw => RawSyscallEvent::SIZE,
        }
    }

    pub const fn captures_args(&self) -> bool {
        matches!(self, Variant::Structured)
    }

    /// Human-readable attachment point.
    pub const fn attach_point(&self) -> &'static str {
        match self {
            Variant::Structured => "tracepoint raw_syscalls:sys_enter",
            Variant::Raw => "raw_tracepoint sys_enter",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
