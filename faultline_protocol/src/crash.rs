//! The crash record: evidence written by the interception runtime's
//! signal handler and read back by the orchestrator.

use std::fs;
use std::io;
use std::path::Path;

use crate::{CodecError, CRASH_FILE, read_u64};

/// Encoded length of a crash record: fault address + crash address.
pub const CRASH_RECORD_LEN: usize = 16;

/// Correlates a fatal signal with the call site hypothesized as its
/// cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrashRecord {
    /// The call site whose forced failure preceded the crash.
    pub fault: u64,
    /// The location inside the target that executed the faulting
    /// instruction.
    pub crash: u64,
}

impl CrashRecord {
    pub fn to_bytes(&self) -> [u8; CRASH_RECORD_LEN] {
        let mut buf = [0u8; CRASH_RECORD_LEN];
        buf[0..8].copy_from_slice(&self.fault.to_le_bytes());
        buf[8..16].copy_from_slice(&self.crash.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<CrashRecord, CodecError> {
        if bytes.len() < CRASH_RECORD_LEN {
            return Err(CodecError::Truncated {
                expected: CRASH_RECORD_LEN,
                found: bytes.len(),
            });
        }
        Ok(CrashRecord {
            fault: read_u64(&bytes[0..8]),
            crash: read_u64(&bytes[8..16]),
        })
    }

    /// Truncates the crash file ahead of an injection run so stale
    /// evidence from a previous run cannot be misattributed.
    pub fn clear(dir: &Path) -> io::Result<()> {
        fs::write(dir.join(CRASH_FILE), [])
    }

    /// Reads the crash file. An absent or empty file means no handled
    /// crash was observed — the run may still have died to a signal the
    /// handler could not intercept.
    pub fn load(dir: &Path) -> Result<Option<CrashRecord>, CodecError> {
        let bytes = match fs::read(dir.join(CRASH_FILE)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        CrashRecord::from_bytes(&bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_cleared_files_mean_no_crash() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CrashRecord::load(dir.path()).unwrap(), None);

        CrashRecord::clear(dir.path()).unwrap();
        assert_eq!(CrashRecord::load(dir.path()).unwrap(), None);
    }

    #[test]
    fn written_record_round_trips_both_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let record = CrashRecord {
            fault: 0x4005a0,
            crash: 0x4007ff,
        };
        fs::write(dir.path().join(CRASH_FILE), record.to_bytes()).unwrap();
        assert_eq!(CrashRecord::load(dir.path()).unwrap(), Some(record));
    }
}
