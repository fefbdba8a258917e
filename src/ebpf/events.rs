//! Decoding of wire records read from the per-CPU perf buffers

use crate::ebpf::Variant;
use crate::{Result, SyscapError};
use serde::Serialize;
use std::fmt;
use syscap_common::{RawSyscallEvent, SyscallEvent, SYSCALL_ARGS_COUNT};

/// Perf pads each raw sample so that its `u32` size header plus data stay
/// 8-byte aligned; the reported length includes that tail.
const PERF_RAW_ALIGN: usize = 8;

/// A syscall entry as handed to the consumer.
///
/// `args` is `None` for records produced by the raw tracepoint variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyscallRecord {
    pub cpu: u32,
    pub pid: u32,
    pub syscall_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<[u64; SYSCALL_ARGS_COUNT]>,
}

impl SyscallRecord {
    pub fn from_event(cpu: u32, event: &SyscallEvent) -> Self {
        Self {
            cpu,
            pid: event.pid,
            syscall_id: event.syscall_id,
            args: Some(event.args),
        }
    }

    pub fn from_raw_event(cpu: u32, event: &RawSyscallEvent) -> Self {
        Self {
            cpu,
            pid: event.pid,
            syscall_id: event.syscall_id,
            args: None,
        }
    }

    /// Decode one record of the given variant.
    ///
    /// The length must be the variant's layout plus at most the perf alignment
    /// tail; anything else is a layout disagreement between probe and reader
    /// and is never reinterpreted.
    pub fn decode(variant: Variant, cpu: u32, bytes: &[u8]) -> Result<Self> {
        let expected = variant.record_size();
        if bytes.len() < expected || bytes.len() - expected >= PERF_RAW_ALIGN {
            return Err(SyscapError::MalformedRecord {
                expected,
                actual: bytes.len(),
            });
        }

        // SAFETY: length checked above, both layouts are plain `repr(C)` integers
        // valid for any bit pattern.
        let record = match variant {
            Variant::Structured => {
                let event: SyscallEvent =
                    unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const SyscallEvent) };
                Self::from_event(cpu, &event)
            }
            Variant::Raw => {
                let event: RawSyscallEvent =
                    unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const RawSyscallEvent) };
                Self::from_raw_event(cpu, &event)
            }
        };

        Ok(record)
    }
}

impl fmt::Display for SyscallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} pid={} syscall={}",
            self.cpu, self.pid, self.syscall_id
        )?;
        if let Some(args) = &self.args {
            write!(
                f,
                " args=[{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}]",
                args[0], args[1], args[2], args[3], args[4], args[5]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of<T: Copy>(value: &T) -> Vec<u8> {
        let ptr = value as *const T as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<T>()) }.to_vec()
    }

    #[test]
    fn test_decode_structured() {
        let event = SyscallEvent::capture((1234u64 << 32) | 1240, 72, [9, 1030, 0, 0, 0, 0]);
        let record = SyscallRecord::decode(Variant::Structured, 2, &bytes_of(&event)).unwrap();

        assert_eq!(record.cpu, 2);
        assert_eq!(record.pid, 1234);
        assert_eq!(record.syscall_id, 72);
        assert_eq!(record.args, Some([9, 1030, 0, 0, 0, 0]));
    }

    #[test]
    fn test_decode_raw_has_no_args() {
        let event = RawSyscallEvent::capture(99u64 << 32, 0);
        let record = SyscallRecord::decode(Variant::Raw, 0, &bytes_of(&event)).unwrap();

        assert_eq!(record.pid, 99);
        assert_eq!(record.syscall_id, 0);
        assert!(record.args.is_none());
    }

    #[test]
    fn test_decode_accepts_perf_padding() {
        let event = SyscallEvent::capture(8u64 << 32, 39, [0; SYSCALL_ARGS_COUNT]);
        let mut buf = bytes_of(&event);
        // 64 bytes of record + 4 bytes of padding: what perf reports for this layout
        buf.extend_from_slice(&[0; 4]);

        let record = SyscallRecord::decode(Variant::Structured, 0, &buf).unwrap();
        assert_eq!(record.syscall_id, 39);

        buf.extend_from_slice(&[0; 4]);
        assert!(SyscallRecord::decode(Variant::Structured, 0, &buf).is_err());
    }

    #[test]
    fn test_decode_unaligned_buffer() {
        let event = SyscallEvent::capture(5u64 << 32, 1, [1, 2, 3, 4, 5, 6]);
        let mut buf = vec![0u8];
        buf.extend(bytes_of(&event));

        let record = SyscallRecord::decode(Variant::Structured, 1, &buf[1..]).unwrap();
        assert_eq!(record.args, Some([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let raw = RawSyscallEvent::capture(1u64 << 32, 3);
        let err = SyscallRecord::decode(Variant::Structured, 0, &bytes_of(&raw)).unwrap_err();

        match err {
            SyscapError::MalformedRecord { expected, actual } => {
                assert_eq!(expected, 64);
                assert_eq!(actual, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display_and_json() {
        let record = SyscallRecord {
            cpu: 0,
            pid: 10,
            syscall_id: 3,
            args: Some([0xff, 0, 0, 0, 0, 0]),
        };
        assert_eq!(
            record.to_string(),
            "cpu=0 pid=10 syscall=3 args=[0xff, 0x0, 0x0, 0x0, 0x0, 0x0]"
        );

        let raw = SyscallRecord { args: None, ..record };
        assert_eq!(raw.to_string(), "cpu=0 pid=10 syscall=3");
        assert_eq!(
            serde_json::to_string(&raw).unwrap(),
            r#"{"cpu":0,"pid":10,"syscall_id":3}"#
        );
    }
}
