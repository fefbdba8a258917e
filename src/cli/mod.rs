pub mod commands;

use crate::config::TraceConfig;
use crate::ebpf::Variant;
use crate::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "syscap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capture syscall entries with eBPF and stream them to user space", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run pre-flight checks and validate the capture layout without attaching")]
    Check {
        #[command(flatten)]
        session: SessionArgs,
    },
    #[command(about = "Attach a probe and print captured syscall entries")]
    Trace {
        #[command(flatten)]
        session: SessionArgs,

        #[arg(short, long, help = "Stop after this many seconds")]
        duration: Option<u64>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, help = "Record output format")]
        format: OutputFormat,

        #[arg(short, long, help = "Write Prometheus text exposition of the counters here on exit")]
        metrics: Option<PathBuf>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Check { .. } => "check",
            Commands::Trace { .. } => "trace",
        }
    }
}

/// Session settings shared by every subcommand. Flags override the file.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    #[arg(short, long, help = "YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Probe variant (structured, raw)")]
    pub variant: Option<Variant>,

    #[arg(long, help = "Perf buffer pages per CPU (power of two)")]
    pub pages: Option<usize>,

    #[arg(long, help = "Raw tracepoint context index holding the syscall number")]
    pub syscall_id_index: Option<u32>,

    #[arg(long, help = "tracefs mount point")]
    pub tracefs: Option<PathBuf>,
}

impl SessionArgs {
    pub fn resolve(&self) -> Result<TraceConfig> {
        let mut config = match &self.config {
            Some(path) => TraceConfig::load(path)?,
            None => TraceConfig::default(),
        };

        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(pages) = self.pages {
            config.per_cpu_pages = pages;
        }
        if let Some(index) = self.syscall_id_index {
            config.syscall_id_index = index;
        }
        if let Some(root) = &self.tracefs {
            config.tracefs_root = Some(root.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
