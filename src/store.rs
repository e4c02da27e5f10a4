//! L0: addressable byte store (spec.md §4.1).
//!
//! A random-access, append-preferring byte container over a memory-mapped
//! file. `allocate` hands out space from a tail pointer and never recycles
//! it — overwritten or abandoned bytes just sit there, per spec.md §9's
//! "no free-space manager" decision.

use crate::error::{Error, Result};
use memmap::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// The sentinel meaning "no address" throughout the format.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

const INITIAL_CAPACITY: u64 = 4096;

/// A random-access read/write byte container backed by a memory-mapped file.
///
/// `len()` is the *logical* end-of-file (the HDF5 `end_of_file_address`),
/// which may be smaller than the mapped capacity — the map is grown in
/// chunks to amortize `mmap`/`mremap` churn.
pub struct ByteStore {
    file: File,
    map: MmapMut,
    eof: u64,
}

impl ByteStore {
    /// Open an existing file for read-write access.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let eof = file.metadata()?.len();
        let cap = eof.max(INITIAL_CAPACITY);
        file.set_len(cap)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(ByteStore { file, map, eof })
    }

    /// Create a new, empty file for read-write access (truncating if it
    /// already exists).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(INITIAL_CAPACITY)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(ByteStore { file, map, eof: 0 })
    }

    /// The logical end-of-file address: the first offset never handed out
    /// by `allocate`.
    pub fn len(&self) -> u64 {
        self.eof
    }

    pub fn is_empty(&self) -> bool {
        self.eof == 0
    }

    /// Read `len` bytes starting at `offset`. Fails with `Truncated` if the
    /// range runs past the logical end-of-file, or if `offset` is the
    /// undefined-address sentinel.
    pub fn read(&self, offset: u64, len: usize) -> Result<&[u8]> {
        if offset == UNDEFINED_ADDRESS {
            return Err(Error::NotFound {
                what: "read at undefined address".into(),
            });
        }
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or(Error::Truncated { offset, wanted: len, available: 0 })?;
        if end as u64 > self.eof {
            let available = self.eof.saturating_sub(offset) as usize;
            return Err(Error::Truncated { offset, wanted: len, available });
        }
        Ok(&self.map[start..end])
    }

    /// Overwrite `bytes` at `offset`. Growing past the current logical EOF
    /// is allowed (callers generally `allocate` first, but in-place index
    /// rewrites may legitimately touch the tail).
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if offset == UNDEFINED_ADDRESS {
            return Err(Error::InvalidPath {
                path: "write at undefined address".into(),
            });
        }
        let end = offset + bytes.len() as u64;
        if end > self.eof {
            self.grow_to(end)?;
        }
        let start = offset as usize;
        self.map[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Advance the tail pointer by `n` bytes and return the previous value
    /// (the address of the newly reserved region).
    pub fn allocate(&mut self, n: u64) -> Result<u64> {
        let prev = self.eof;
        self.grow_to(prev + n)?;
        Ok(prev)
    }

    fn grow_to(&mut self, new_eof: u64) -> Result<()> {
        let cap = self.map.len() as u64;
        if new_eof > cap {
            let new_cap = new_eof.max(cap.saturating_mul(2)).max(INITIAL_CAPACITY);
            self.file.set_len(new_cap)?;
            self.map = unsafe { MmapMut::map_mut(&self.file)? };
        }
        self.eof = new_eof;
        Ok(())
    }

    /// Flush pending writes to the underlying file. Required before the
    /// attribute compact→dense transition returns (spec.md §5), and at
    /// close.
    pub fn flush(&mut self) -> Result<()> {
        self.map.flush()?;
        self.file.set_len(self.eof.max(1))?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TempPath(PathBuf);

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn temp_path() -> TempPath {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-test-{}-{}", std::process::id(), n));
        TempPath(path)
    }

    #[test]
    fn allocate_then_write_then_read_roundtrip() {
        let tmp = temp_path();
        let mut store = ByteStore::create(&tmp.0).unwrap();
        let addr = store.allocate(8).unwrap();
        assert_eq!(addr, 0);
        store.write(addr, b"abcdefgh").unwrap();
        assert_eq!(store.read(addr, 8).unwrap(), b"abcdefgh");
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn read_past_eof_is_truncated() {
        let tmp = temp_path();
        let store = ByteStore::create(&tmp.0).unwrap();
        assert!(matches!(store.read(0, 1), Err(Error::Truncated { .. })));
    }

    #[test]
    fn undefined_address_rejected() {
        let tmp = temp_path();
        let store = ByteStore::create(&tmp.0).unwrap();
        assert!(store.read(UNDEFINED_ADDRESS, 1).is_err());
    }
}
