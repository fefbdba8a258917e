//! Shared types between eBPF (kernel) and userspace
//!
//! This crate defines the syscall records that must be:
//! - `#[repr(C)]` for stable memory layout
//! - `no_std` compatible for eBPF
//! - Shared between the kernel probe and the userspace reader
//!
//! Record construction lives here as well, so the probe and host tests run the
//! exact same code.

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Number of raw argument registers passed to a syscall.
pub const SYSCALL_ARGS_COUNT: usize = 6;

/// Offsets inside the `raw_syscalls:sys_enter` tracepoint record.
///
/// From `/sys/kernel/tracing/events/raw_syscalls/sys_enter/format`:
///
/// ```text
/// field:unsigned short common_type;	offset:0;	size:2;	signed:0;
/// field:unsigned char common_flags;	offset:2;	size:1;	signed:0;
/// field:unsigned char common_preempt_count;	offset:3;	size:1;	signed:0;
/// field:int common_pid;	offset:4;	size:4;	signed:1;
///
/// field:long id;	offset:8;	size:8;	signed:1;
/// field:unsigned long args[6];	offset:16;	size:48;	signed:0;
/// ```
pub mod sys_enter {
    pub const ID_OFFSET: usize = 8;
    pub const ID_SIZE: usize = 8;
    pub const ARGS_OFFSET: usize = 16;
    pub const ARGS_SIZE: usize = 8 * super::SYSCALL_ARGS_COUNT;
}

/// Raw tracepoint context layout for `sys_enter`.
///
/// The raw context is an untyped `u64` array holding the tracepoint's
/// prototype arguments, `(struct pt_regs *regs, long id)` on x86_64 and
/// aarch64. Nothing guarantees that layout across architectures or kernel
/// versions, so the index is a load-time setting rather than a constant.
pub mod raw_context {
    /// Index of the syscall number on x86_64 and aarch64.
    pub const DEFAULT_SYSCALL_ID_INDEX: u32 = 1;
    /// Highest index the probe can read. `sys_enter` has two context words
    /// and the kernel refuses to attach a program that reads past them.
    pub const MAX_SYSCALL_ID_INDEX: u32 = 1;
}

/// Names shared between the probe object and the loader.
pub mod names {
    pub const STRUCTURED_PROGRAM: &str = "sys_enter_structured";
    pub const RAW_PROGRAM: &str = "sys_enter_raw";
    pub const STRUCTURED_EVENTS_MAP: &str = "EVENTS";
    pub const RAW_EVENTS_MAP: &str = "RAW_EVENTS";
    pub const SYSCALL_ID_INDEX_GLOBAL: &str = "SYSCALL_ID_INDEX";
}

/// Extract the thread-group id (the userspace "pid") from the combined
/// `pid_tgid` word returned by `bpf_get_current_pid_tgid`.
#[inline(always)]
pub const fn tgid_of(pid_tgid: u64) -> u32 {
    (pid_tgid >> 32) as u32
}

/// Fill all argument slots from `read`, in order.
///
/// The bound is a compile-time constant and the body is forced inline, so the
/// loop is fully unrolled in the probe and each read gets a constant offset.
#[inline(always)]
pub fn capture_args<F>(mut read: F) -> [u64; SYSCALL_ARGS_COUNT]
where
    F: FnMut(usize) -> u64,
{
    let mut args = [0u64; SYSCALL_ARGS_COUNT];
    for (i, slot) in args.iter_mut().enumerate() {
        *slot = read(i);
    }
    args
}

/// Syscall entry record emitted by the structured tracepoint probe
///
/// Layout (64 bytes total, 8-byte aligned):
/// - pid: Thread-group id of the caller
/// - _padding: Always zero
/// - syscall_id: Raw architecture syscall number
/// - args: The six argument registers, verbatim
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct SyscallEvent {
    pub pid: u32,
    pub _padding: u32,
    pub syscall_id: u64,
    pub args: [u64; SYSCALL_ARGS_COUNT],
}

impl SyscallEvent {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// An all-zero record. Every field not explicitly written stays defined.
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            pid: 0,
            _padding: 0,
            syscall_id: 0,
            args: [0; SYSCALL_ARGS_COUNT],
        }
    }

    #[inline(always)]
    pub fn capture(pid_tgid: u64, syscall_id: u64, args: [u64; SYSCALL_ARGS_COUNT]) -> Self {
        let mut event = Self::zeroed();
        event.pid = tgid_of(pid_tgid);
        event.syscall_id = syscall_id;
        event.args = args;
        event
    }
}

/// Syscall entry record emitted by the raw tracepoint probe
///
/// Layout (16 bytes total, 8-byte aligned). Same header as [`SyscallEvent`],
/// without arguments.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct RawSyscallEvent {
    pub pid: u32,
    pub _padding: u32,
    pub syscall_id: u64,
}

impl RawSyscallEvent {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            pid: 0,
            _padding: 0,
            syscall_id: 0,
        }
    }

    #[inline(always)]
    pub fn capture(pid_tgid: u64, syscall_id: u64) -> Self {
        let mut event = Self::zeroed();
        event.pid = tgid_of(pid_tgid);
        event.syscall_id = syscall_id;
        event
    }
}

const _: () = {
    assert!(
        core::mem::size_of::<SyscallEvent>() == 64,
        "SyscallEvent must be exactly 64 bytes"
    );
    assert!(
        core::mem::align_of::<SyscallEvent>() == 8,
        "SyscallEvent must be 8-byte aligned"
    );
    assert!(
        core::mem::size_of::<RawSyscallEvent>() == 16,
        "RawSyscallEvent must be exactly 16 bytes"
    );
    assert!(
        core::mem::align_of::<RawSyscallEvent>() == 8,
        "RawSyscallEvent must be 8-byte aligned"
    );
    assert!(sys_enter::ARGS_SIZE == 48);
    assert!(raw_context::DEFAULT_SYSCALL_ID_INDEX <= raw_context::MAX_SYSCALL_ID_INDEX);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tgid_is_upper_half() {
        let pid_tgid = (4242u64 << 32) | 4243;
        assert_eq!(tgid_of(pid_tgid), 4242);
        assert_eq!(tgid_of(u64::MAX), u32::MAX);
        assert_eq!(tgid_of(0xFFFF_FFFF), 0);
    }

    #[test]
    fn test_capture_structured() {
        let args = [3, 0x80000, 0o644, 0, 0, 7];
        let event = SyscallEvent::capture((100u64 << 32) | 101, 257, args);

        assert_eq!(event.pid, 100);
        assert_eq!(event.syscall_id, 257);
        assert_eq!(event.args, args);
        assert_eq!(event._padding, 0);
    }

    #[test]
    fn test_capture_raw_matches_structured_header() {
        let pid_tgid = (77u64 << 32) | 78;
        let full = SyscallEvent::capture(pid_tgid, 60, [1; SYSCALL_ARGS_COUNT]);
        let raw = RawSyscallEvent::capture(pid_tgid, 60);

        assert_eq!(full.pid, raw.pid);
        assert_eq!(full.syscall_id, raw.syscall_id);
    }

    #[test]
    fn test_capture_args_reads_every_slot_in_order() {
        let mut seen = Vec::new();
        let args = capture_args(|i| {
            seen.push(i);
            (i as u64 + 1) * 10
        });

        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(args, [10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_zeroed_records() {
        assert_eq!(SyscallEvent::zeroed().args, [0; SYSCALL_ARGS_COUNT]);
        assert_eq!(RawSyscallEvent::zeroed().syscall_id, 0);
        assert_eq!(SyscallEvent::SIZE, 64);
        assert_eq!(RawSyscallEvent::SIZE, 16);
    }
}
