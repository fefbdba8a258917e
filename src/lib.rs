//! Syscall-entry capture with eBPF
//!
//! A probe attached to the syscall-entry tracepoint builds one fixed-size
//! record per syscall and writes it into the current CPU's perf buffer; the
//! [`session::TraceSession`] drains every CPU's buffer and hands decoded
//! records to the caller together with per-CPU delivered and lost counts.

pub mod cli;
pub mod config;
pub mod ebpf;
pub mod error;
pub mod metrics;
#[cfg(target_os = "linux")]
pub mod session;

pub use error::{Result, SyscapError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
