//! On-disk protocol shared by the campaign orchestrator and the
//! interception runtime.
//!
//! The two sides of a fault-injection campaign are different process
//! images: the orchestrator spawns the target, and the target is replaced
//! in-place via exec with the interception runtime preloaded ahead of its
//! standard library. Everything the two need to agree on must therefore
//! survive that replacement on disk. This crate defines those records and
//! their fixed little-endian layouts:
//!
//! * [`settings::Settings`] — the campaign's intent for one run (file
//!   `settings`), written by the orchestrator before every spawn and read
//!   once, early, by the runtime.
//! * [`table::CallSiteTable`] — the call sites discovered while
//!   profiling (file `profile`). Its file order defines the campaign's
//!   ordinal numbering, which is why the table is an explicit ordered
//!   list rather than a bare map.
//! * [`crash::CrashRecord`] — evidence correlating a fault with the call
//!   site that caused it (file `crash`).
//! * [`heap::HeapRecord`] — live allocations at the last trace point
//!   (file `heap`), only present when heap tracing is enabled.
//!
//! All records are full-file overwrites; none are appended or locked.

use std::io;

use thiserror::Error;

pub mod crash;
pub mod heap;
pub mod ops;
pub mod settings;
pub mod table;

/// File name of the persisted settings record.
pub const SETTINGS_FILE: &str = "settings";
/// File name of the persisted call-site table.
pub const PROFILE_FILE: &str = "profile";
/// File name of the persisted crash record.
pub const CRASH_FILE: &str = "crash";
/// File name of the persisted heap table.
pub const HEAP_FILE: &str = "heap";
/// File name the interception runtime is staged under in the campaign
/// working directory, referenced by the preload environment variable.
pub const SHIM_FILE: &str = "fault_inject.so";

/// Errors produced while encoding or decoding protocol records.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("record truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unknown mode byte {0:#x}")]
    UnknownMode(u8),
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().unwrap())
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}
