//! Syscall-entry probes that send fixed-size records via perf buffers
//!
//! Two alternative programs live in this object; the loader attaches exactly
//! one of them per session:
//! - `sys_enter_structured`: `raw_syscalls:sys_enter` tracepoint. Reads the
//!   named `id` and `args[6]` fields at their documented offsets.
//! - `sys_enter_raw`: `sys_enter` raw tracepoint. ABI-stable attachment, but the
//!   context is an untyped word array, so only the syscall number is read, from
//!   the index configured at load time.
//!
//! Neither program can fail towards the traced task: both always return 0, and
//! a full perf buffer drops the record in the kernel, which counts it as lost
//! for the userspace reader.
//!
//! Note: This binary must be built for the bpfel-unknown-none target. Use the
//! root crate's build.rs which handles cross-compilation automatically.

#![no_std]
#![no_main]

use aya_ebpf::{
    helpers::bpf_get_current_pid_tgid,
    macros::{map, raw_tracepoint, tracepoint},
    maps::PerfEventArray,
    programs::{RawTracePointContext, TracePointContext},
};
use aya_log_ebpf::error;
use syscap_common::{
    capture_args, raw_context, sys_enter, RawSyscallEvent, SyscallEvent, SYSCALL_ARGS_COUNT,
};

#[map]
static EVENTS: PerfEventArray<SyscallEvent> = PerfEventArray::new(0);

#[map]
static RAW_EVENTS: PerfEventArray<RawSyscallEvent> = PerfEventArray::new(0);

/// Position of the syscall number in the raw tracepoint context.
/// Rewritten by the loader before the object is loaded.
#[no_mangle]
static SYSCALL_ID_INDEX: u32 = raw_context::DEFAULT_SYSCALL_ID_INDEX;

#[tracepoint]
pub fn sys_enter_structured(ctx: TracePointContext) -> u32 {
    let pid_tgid = bpf_get_current_pid_tgid();

    let syscall_id = match unsafe { ctx.read_at::<i64>(sys_enter::ID_OFFSET) } {
        Ok(id) => id as u64,
        Err(ret) => {
            error!(
                &ctx,
                "sys_enter: failed to read id at offset {}: {}",
                sys_enter::ID_OFFSET,
                ret
            );
            0
        }
    };

    let mut failed_reads = 0u32;
    let args = capture_args(|i| {
        match unsafe { ctx.read_at::<u64>(sys_enter::ARGS_OFFSET + i * 8) } {
            Ok(arg) => arg,
            Err(_) => {
                failed_reads += 1;
                0
            }
        }
    });
    if failed_reads != 0 {
        error!(
            &ctx,
            "sys_enter: {} of {} args unreadable for syscall {}",
            failed_reads,
            SYSCALL_ARGS_COUNT,
            syscall_id
        );
    }

    let event = SyscallEvent::capture(pid_tgid, syscall_id, args);
    EVENTS.output(&ctx, &event, 0);

    0
}

#[raw_tracepoint(tracepoint = "sys_enter")]
pub fn sys_enter_raw(ctx: RawTracePointContext) -> i32 {
    let pid_tgid = bpf_get_current_pid_tgid();
    let syscall_id = raw_syscall_id(&ctx);

    let event = RawSyscallEvent::capture(pid_tgid, syscall_id);
    RAW_EVENTS.output(&ctx, &event, 0);

    0
}

/// Context accesses must use constant offsets, so each supported index is
/// its own branch. Out-of-range values fall back to the default index; the
/// loader rejects them before they get here.
#[inline(always)]
fn raw_syscall_id(ctx: &RawTracePointContext) -> u64 {
    let index = unsafe { core::ptr::read_volatile(&SYSCALL_ID_INDEX) };
    unsafe {
        match index {
            0 => ctx.arg::<u64>(0),
            _ => ctx.arg::<u64>(1),
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

// bpf_perf_event_output is GPL-only.
#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
