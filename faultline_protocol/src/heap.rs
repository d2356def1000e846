//! The heap table: live allocations at the last trace point, one record
//! per outstanding block. Whatever is still listed when the target exits
//! is a leak.

use std::fs;
use std::io;
use std::path::Path;

use crate::{CodecError, HEAP_FILE, read_u64};

/// Encoded length of one heap record: allocating site + block size.
pub const HEAP_RECORD_LEN: usize = 16;

/// One live allocation, keyed in the runtime by its block address but
/// persisted as (allocating call site, size).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRecord {
    /// Call site that performed the allocation.
    pub site: u64,
    /// Requested size of the block in bytes.
    pub size: u64,
}

impl HeapRecord {
    pub fn to_bytes(&self) -> [u8; HEAP_RECORD_LEN] {
        let mut buf = [0u8; HEAP_RECORD_LEN];
        buf[0..8].copy_from_slice(&self.site.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEAP_RECORD_LEN]) -> HeapRecord {
        HeapRecord {
            site: read_u64(&bytes[0..8]),
            size: read_u64(&bytes[8..16]),
        }
    }
}

/// Overwrites the heap file in `dir` with the current live set.
pub fn save(records: &[HeapRecord], dir: &Path) -> Result<(), CodecError> {
    let mut buf = Vec::with_capacity(records.len() * HEAP_RECORD_LEN);
    for record in records {
        buf.extend_from_slice(&record.to_bytes());
    }
    fs::write(dir.join(HEAP_FILE), buf)?;
    Ok(())
}

/// Reads the heap file from `dir`. An absent file means heap tracing
/// never ran, which callers treat the same as an empty live set.
pub fn load(dir: &Path) -> Result<Vec<HeapRecord>, CodecError> {
    let bytes = match fs::read(dir.join(HEAP_FILE)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() % HEAP_RECORD_LEN != 0 {
        return Err(CodecError::Truncated {
            expected: (bytes.len() / HEAP_RECORD_LEN + 1) * HEAP_RECORD_LEN,
            found: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(HEAP_RECORD_LEN)
        .map(|chunk| HeapRecord::from_bytes(chunk.try_into().unwrap()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_means_no_leaks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_empty());

        save(&[], dir.path()).unwrap();
        assert!(load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn one_leaked_block_surfaces_its_site_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let leak = HeapRecord {
            site: 0x4005a0,
            size: 4096,
        };
        save(&[leak], dir.path()).unwrap();
        assert_eq!(load(dir.path()).unwrap(), vec![leak]);
    }
}
