use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyscapError {
    #[error("eBPF error: {0}")]
    EbpfError(String),

    #[error("Failed to load eBPF program: {0}")]
    ProgramLoadFailed(String),

    #[error("Failed to attach eBPF program: {0}")]
    AttachFailed(String),

    #[error("Map {name} not found in eBPF object. Available maps: {available:?}")]
    MapNotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("Capture context mismatch on field `{field}`: expected {expected}, found {found}")]
    ContextMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid tracepoint format: {0}")]
    TracepointFormat(String),

    #[error("Malformed record: expected {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Kernel version {version} is too old. Minimum required: {min_version}")]
    KernelVersionTooOld {
        version: String,
        min_version: String,
    },

    #[error("Unsupported feature on this system: {0}")]
    UnsupportedFeature(String),
}

impl From<serde_yaml::Error> for SyscapError {
    fn from(e: serde_yaml::Error) -> Self {
        SyscapError::ConfigError(e.to_string())
    }
}

impl From<prometheus::Error> for SyscapError {
    fn from(e: prometheus::Error) -> Self {
        SyscapError::MetricsError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyscapError>;
