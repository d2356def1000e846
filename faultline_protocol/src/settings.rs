//! The settings record: the campaign's intent for a single target run.

use std::fs;
use std::path::Path;

use crate::ops::OpSet;
use crate::{CodecError, SETTINGS_FILE, read_u32};

/// What the interception runtime should do with the calls it sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Record every attributable call site; never fail a call.
    Profile,
    /// Fail exactly the call site whose ordinal equals `limit`.
    Inject,
}

/// Encoded length of a settings record: `limit` (4) + target path (256)
/// + operation bitmask (4) + mode (1) + heap-trace flag (1).
pub const SETTINGS_LEN: usize = 266;

const PATH_BUF_LEN: usize = 256;

/// The fixed-layout state handed from the orchestrator to the freshly
/// exec'd target process.
///
/// Written (overwritten in place) by the orchestrator before every spawn
/// and read exactly once, early, by the interception runtime. The target
/// path doubles as the image filter for call-stack attribution, so it
/// must be byte-identical to the path the target was exec'd under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    /// Ordinal of the call site to fail in [`Mode::Inject`]; meaningless
    /// while profiling.
    pub limit: i32,
    pub target_path: String,
    pub operations: OpSet,
    pub trace_heap: bool,
}

impl Settings {
    pub fn new(target_path: impl Into<String>) -> Settings {
        Settings {
            mode: Mode::Profile,
            limit: -1,
            target_path: target_path.into(),
            operations: OpSet::default_set(),
            trace_heap: false,
        }
    }

    pub fn to_bytes(&self) -> [u8; SETTINGS_LEN] {
        let mut buf = [0u8; SETTINGS_LEN];
        buf[0..4].copy_from_slice(&self.limit.to_le_bytes());

        // NUL-padded fixed buffer; over-long paths are truncated, which
        // the orchestrator rejects at setup before anything is spawned.
        let path = self.target_path.as_bytes();
        let len = path.len().min(PATH_BUF_LEN - 1);
        buf[4..4 + len].copy_from_slice(&path[..len]);

        buf[260..264].copy_from_slice(&self.operations.bits().to_le_bytes());
        buf[264] = match self.mode {
            Mode::Profile => 0,
            Mode::Inject => 1,
        };
        buf[265] = self.trace_heap as u8;
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Settings, CodecError> {
        if bytes.len() < SETTINGS_LEN {
            return Err(CodecError::Truncated {
                expected: SETTINGS_LEN,
                found: bytes.len(),
            });
        }
        let limit = i32::from_le_bytes(bytes[0..4].try_into().unwrap());

        let path_buf = &bytes[4..4 + PATH_BUF_LEN];
        let path_len = path_buf.iter().position(|&b| b == 0).unwrap_or(PATH_BUF_LEN);
        let target_path = String::from_utf8_lossy(&path_buf[..path_len]).into_owned();

        let operations = OpSet::from_bits(read_u32(&bytes[260..264]));
        let mode = match bytes[264] {
            0 => Mode::Profile,
            1 => Mode::Inject,
            other => return Err(CodecError::UnknownMode(other)),
        };
        let trace_heap = bytes[265] != 0;

        Ok(Settings {
            mode,
            limit,
            target_path,
            operations,
            trace_heap,
        })
    }

    /// Overwrites the settings file in `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), CodecError> {
        fs::write(dir.join(SETTINGS_FILE), self.to_bytes())?;
        Ok(())
    }

    /// Reads the settings file from `dir`.
    pub fn load(dir: &Path) -> Result<Settings, CodecError> {
        let bytes = fs::read(dir.join(SETTINGS_FILE))?;
        Settings::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Op;
    use assert_matches::assert_matches;

    #[test]
    fn round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::new("/usr/bin/victim");
        settings.mode = Mode::Inject;
        settings.limit = 7;
        settings.operations.enable(Op::Fopen);
        settings.trace_heap = true;

        settings.save(dir.path()).unwrap();
        let loaded = Settings::load(dir.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn encoded_length_is_fixed() {
        let settings = Settings::new("victim");
        assert_eq!(settings.to_bytes().len(), SETTINGS_LEN);
    }

    #[test]
    fn over_long_paths_truncate_at_the_buffer() {
        let long = "x".repeat(400);
        let settings = Settings::new(long);
        let decoded = Settings::from_bytes(&settings.to_bytes()).unwrap();
        assert_eq!(decoded.target_path.len(), 255);
    }

    #[test]
    fn short_input_is_rejected() {
        assert_matches!(
            Settings::from_bytes(&[0u8; 12]),
            Err(CodecError::Truncated { expected, found: 12 }) if expected == SETTINGS_LEN
        );
    }

    #[test]
    fn unknown_mode_byte_is_rejected() {
        let mut bytes = Settings::new("victim").to_bytes();
        bytes[264] = 9;
        assert_matches!(Settings::from_bytes(&bytes), Err(CodecError::UnknownMode(9)));
    }
}
