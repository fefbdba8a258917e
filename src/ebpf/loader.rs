//! eBPF probe loader and lifecycle management

use crate::config::TraceConfig;
use crate::ebpf::format::{locate_tracefs, sys_enter_format_path, TracepointFormat};
use crate::ebpf::{Probe, Variant};
use crate::{Result, SyscapError};
use aya::{
    maps::Map,
    programs::{
        raw_trace_point::RawTracePointLinkId, trace_point::TracePointLinkId, RawTracePoint,
        TracePoint,
    },
    Ebpf, EbpfLoader,
};
use std::fs;
use std::path::{Path, PathBuf};
use syscap_common::names;
use tracing::{debug, info, warn};

/// Minimum kernel for CAP_BPF and the perf/raw tracepoint features used here
const MIN_KERNEL: (u32, u32) = (5, 8);

fn probe_object() -> &'static [u8] {
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/syscall_probe"))
}

enum ProbeLink {
    TracePoint(TracePointLinkId),
    RawTracePoint(RawTracePointLinkId),
}

/// Manages the syscall probe lifecycle for one session
pub struct ProbeManager {
    bpf: Ebpf,
    variant: Variant,
    loaded: bool,
    link: Option<ProbeLink>,
}

impl ProbeManager {
    /// Run pre-flight checks and load the probe object for `config.variant`.
    ///
    /// Nothing is attached yet; every check that can reject the session runs
    /// here, before any capture starts.
    pub fn new(config: &TraceConfig) -> Result<Self> {
        config.validate()?;
        run_preflight_checks(config)?;

        info!("Loading syscall probe ({} variant)...", config.variant);
        let bpf = load_syscall_probe(config)?;

        Ok(Self {
            bpf,
            variant: config.variant,
            loaded: false,
            link: None,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Get mutable reference to the Ebpf object for initializing the EbpfLogger.
    pub fn bpf_mut(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }

    /// Take ownership of the events perf array for this variant.
    pub fn take_events_map(&mut self) -> Result<Map> {
        let name = self.variant.map_name();
        // Collect map names first to avoid borrow conflict in error path
        let available: Vec<_> = self.bpf.maps().map(|(name, _)| name.to_string()).collect();
        self.bpf
            .take_map(name)
            .ok_or_else(|| SyscapError::MapNotFound {
                name: name.to_string(),
                available,
            })
    }

    /// Detach and unload the probe
    pub fn unload(mut self) {
        info!("Unloading syscall probe...");
        if let Err(e) = self.detach() {
            warn!("Failed to detach probe cleanly: {}", e);
        }
        drop(self.bpf);
        info!("Probe unloaded");
    }

    fn attach_structured(&mut self) -> Result<ProbeLink> {
        let program: &mut TracePoint = self
            .bpf
            .program_mut(names::STRUCTURED_PROGRAM)
            .ok_or_else(|| missing_program(names::STRUCTURED_PROGRAM))?
            .try_into()
            .map_err(|e| SyscapError::ProgramLoadFailed(format!("{}", e)))?;

        if !self.loaded {
            program
                .load()
                .map_err(|e| SyscapError::ProgramLoadFailed(format!("{}", e)))?;
            self.loaded = true;
        }

        let link = program
            .attach("raw_syscalls", "sys_enter")
            .map_err(|e| SyscapError::AttachFailed(format!("raw_syscalls:sys_enter: {}", e)))?;
        Ok(ProbeLink::TracePoint(link))
    }

    fn attach_raw(&mut self) -> Result<ProbeLink> {
        let program: &mut RawTracePoint = self
            .bpf
            .program_mut(names::RAW_PROGRAM)
            .ok_or_else(|| missing_program(names::RAW_PROGRAM))?
            .try_into()
            .map_err(|e| SyscapError::ProgramLoadFailed(format!("{}", e)))?;

        if !self.loaded {
            program
                .load()
                .map_err(|e| SyscapError::ProgramLoadFailed(format!("{}", e)))?;
            self.loaded = true;
        }

        let link = program
            .attach("sys_enter")
            .map_err(|e| SyscapError::AttachFailed(format!("raw sys_enter: {}", e)))?;
        Ok(ProbeLink::RawTracePoint(link))
    }
}

impl Probe for ProbeManager {
    fn attach(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        info!("Attaching probe to {}...", self.variant.attach_point());
        let link = match self.variant {
            Variant::Structured => self.attach_structured()?,
            Variant::Raw => self.attach_raw()?,
        };
        self.link = Some(link);

        info!("Probe attached to {}", self.variant.attach_point());
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        debug!("Detaching probe from {}", self.variant.attach_point());
        let program = self
            .bpf
            .program_mut(self.variant.program_name())
            .ok_or_else(|| missing_program(self.variant.program_name()))?;

        let result = match link {
            ProbeLink::TracePoint(id) => {
                let program: &mut TracePoint = program
                    .try_into()
                    .map_err(|e| SyscapError::EbpfError(format!("{}", e)))?;
                program.detach(id)
            }
            ProbeLink::RawTracePoint(id) => {
                let program: &mut RawTracePoint = program
                    .try_into()
                    .map_err(|e| SyscapError::EbpfError(format!("{}", e)))?;
                program.detach(id)
            }
        };

        result.map_err(|e| SyscapError::EbpfError(format!("detach failed: {}", e)))
    }

    fn is_attached(&self) -> bool {
        self.link.is_some()
    }
}

fn missing_program(name: &str) -> SyscapError {
    SyscapError::ProgramLoadFailed(format!("{} program not found in eBPF object", name))
}

/// Load the probe object with the raw syscall-id index patched in
fn load_syscall_probe(config: &TraceConfig) -> Result<Ebpf> {
    let object = probe_object();
    if object.is_empty() {
        return Err(SyscapError::ProgramLoadFailed(
            "probe object was not built; rebuild on Linux with bpf-linker installed".to_string(),
        ));
    }

    let bpf = EbpfLoader::new()
        .set_global(
            names::SYSCALL_ID_INDEX_GLOBAL,
            &config.syscall_id_index,
            true,
        )
        .load(object)
        .map_err(|e| SyscapError::ProgramLoadFailed(format!("{}", e)))?;

    Ok(bpf)
}

/// What the pre-flight checks found
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub kernel_release: String,
    pub btf_available: bool,
    pub privileged: bool,
    pub tracefs_root: Option<PathBuf>,
}

/// Run pre-flight checks to validate the system can run the chosen variant
pub fn run_preflight_checks(config: &TraceConfig) -> Result<PreflightReport> {
    info!("Running pre-flight checks...");

    let kernel_release = check_kernel_version()?;
    let btf_available = check_btf();
    let privileged = check_capabilities();
    bump_memlock_rlimit();

    let tracefs_root = match config.variant {
        Variant::Structured => Some(check_sys_enter_layout(config.tracefs_root.as_deref())?),
        Variant::Raw => {
            info!(
                "Raw variant reads the syscall id at context index {}; \
                 verify this matches the target kernel/architecture",
                config.syscall_id_index
            );
            None
        }
    };

    info!("Pre-flight checks passed");
    Ok(PreflightReport {
        kernel_release,
        btf_available,
        privileged,
        tracefs_root,
    })
}

/// Check the running kernel's sys_enter layout against the probe's offsets
fn check_sys_enter_layout(explicit_root: Option<&Path>) -> Result<PathBuf> {
    let root = locate_tracefs(explicit_root)?;
    let format = TracepointFormat::load(&sys_enter_format_path(&root))?;
    format.validate_sys_enter()?;

    info!(
        "raw_syscalls:sys_enter layout matches (tracefs at {})",
        root.display()
    );
    Ok(root)
}

/// Check if kernel version is >= MIN_KERNEL
fn check_kernel_version() -> Result<String> {
    let release = fs::read_to_string("/proc/sys/kernel/osrelease")?;
    let release = release.trim().to_string();
    let (major, minor) = parse_kernel_version(&release)?;

    if (major, minor) < MIN_KERNEL {
        return Err(SyscapError::KernelVersionTooOld {
            version: release,
            min_version: format!("{}.{}", MIN_KERNEL.0, MIN_KERNEL.1),
        });
    }

    info!("Kernel version: {} (supported)", release);
    Ok(release)
}

/// Parse `major.minor` out of a release string like `6.8.0-45-generic`
pub fn parse_kernel_version(release: &str) -> Result<(u32, u32)> {
    let invalid =
        || SyscapError::UnsupportedFeature(format!("Could not parse kernel version: {}", release));

    let mut parts = release.trim().split('.');
    let major: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor: u32 = parts
        .next()
        .map(|p| p.split(|c: char| !c.is_ascii_digit()).next().unwrap_or(p))
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;

    Ok((major, minor))
}

/// Check if BTF (BPF Type Format) is available
fn check_btf() -> bool {
    let btf_path = Path::new("/sys/kernel/btf/vmlinux");

    if !btf_path.exists() {
        warn!("BTF not found at /sys/kernel/btf/vmlinux");
        warn!("Some eBPF features may not work. Consider rebuilding kernel with CONFIG_DEBUG_INFO_BTF=y");
        return false;
    }

    info!("BTF available");
    true
}

/// Check if process has necessary capabilities to load eBPF programs
fn check_capabilities() -> bool {
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        warn!("Not running as root (euid={}). Ensure CAP_BPF and CAP_PERFMON capabilities are granted.", euid);
        return false;
    }

    info!("Running with root privileges");
    true
}

/// Bump the memlock rlimit. This is needed for older kernels that don't use
/// memcg based accounting for BPF maps.
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(parse_kernel_version("6.8.0-45-generic").unwrap(), (6, 8));
        assert_eq!(parse_kernel_version("5.15.167.4-microsoft-standard-WSL2").unwrap(), (5, 15));
        assert_eq!(parse_kernel_version("6.10-rc3\n").unwrap(), (6, 10));
        assert_eq!(parse_kernel_version("4.19.0").unwrap(), (4, 19));
    }

    #[test]
    fn test_parse_kernel_version_invalid() {
        assert!(parse_kernel_version("").is_err());
        assert!(parse_kernel_version("six.eight").is_err());
        assert!(parse_kernel_version("6").is_err());
    }

    #[test]
    fn test_min_kernel_ordering() {
        assert!((5, 4) < MIN_KERNEL);
        assert!((5, 8) >= MIN_KERNEL);
        assert!((6, 0) > MIN_KERNEL);
    }
}
