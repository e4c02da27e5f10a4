//! Fractal Heap (spec.md §4.5/§6): a managed heap of variable-length byte
//! records keyed by an opaque 8-byte heap-id, used here to back dense
//! attribute storage.
//!
//! The growth strategy (single block, relocate-and-abandon-the-old-one when
//! full) mirrors `index::local_heap`'s. Indirect blocks (multi-block heaps)
//! are out of scope here — one direct block is enough for the attribute
//! records this core ever stores, matching spec.md's single-leaf v2-B-tree
//! Open Question in spirit.

use crate::error::{Error, Result};
use crate::store::ByteStore;

const SIGNATURE: &[u8; 4] = b"FRHP";
const HEADER_LEN: usize = 29;
const INITIAL_BLOCK_SIZE: u64 = 256;

/// An 8-byte opaque token: `block_offset` in the low 5 bytes, `length` in
/// the high 3 bytes (spec.md §6).
pub type HeapId = [u8; 8];

fn encode_heap_id(block_offset: u64, length: u32) -> HeapId {
    debug_assert!(block_offset < (1u64 << 40), "block offset exceeds 5 bytes");
    debug_assert!(length < (1u32 << 24), "record length exceeds 3 bytes");
    let mut id = [0u8; 8];
    id[..5].copy_from_slice(&block_offset.to_le_bytes()[..5]);
    id[5..8].copy_from_slice(&length.to_le_bytes()[..3]);
    id
}

fn decode_heap_id(id: HeapId) -> (u64, u32) {
    let mut offset_bytes = [0u8; 8];
    offset_bytes[..5].copy_from_slice(&id[..5]);
    let mut length_bytes = [0u8; 4];
    length_bytes[..3].copy_from_slice(&id[5..8]);
    (u64::from_le_bytes(offset_bytes), u32::from_le_bytes(length_bytes))
}

#[derive(Debug, Clone, Copy)]
pub struct FractalHeapHeader {
    pub header_address: u64,
    pub direct_block_address: u64,
    pub direct_block_size: u64,
    pub next_free_offset: u64,
}

fn encode_header(h: &FractalHeapHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(0); // version
    out.extend_from_slice(&h.direct_block_address.to_le_bytes());
    out.extend_from_slice(&h.direct_block_size.to_le_bytes());
    out.extend_from_slice(&h.next_free_offset.to_le_bytes());
    out
}

fn parse_header(bytes: &[u8], header_address: u64) -> Result<FractalHeapHeader> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != SIGNATURE {
        return Err(Error::Parse("bad fractal heap header".into()));
    }
    let direct_block_address = u64::from_le_bytes(bytes[5..13].try_into().unwrap());
    let direct_block_size = u64::from_le_bytes(bytes[13..21].try_into().unwrap());
    let next_free_offset = u64::from_le_bytes(bytes[21..29].try_into().unwrap());
    Ok(FractalHeapHeader {
        header_address,
        direct_block_address,
        direct_block_size,
        next_free_offset,
    })
}

/// Load a fractal heap header previously persisted at `address`.
pub fn load(store: &ByteStore, address: u64) -> Result<FractalHeapHeader> {
    let bytes = store.read(address, HEADER_LEN)?;
    parse_header(bytes, address)
}

/// Create an empty fractal heap (header + one direct block) and persist it.
pub fn create(store: &mut ByteStore) -> Result<FractalHeapHeader> {
    let direct_block_address = store.allocate(INITIAL_BLOCK_SIZE)?;
    let header_address = store.allocate(HEADER_LEN as u64)?;
    let header = FractalHeapHeader {
        header_address,
        direct_block_address,
        direct_block_size: INITIAL_BLOCK_SIZE,
        next_free_offset: 0,
    };
    store.write(header_address, &encode_header(&header))?;
    Ok(header)
}

/// Insert `bytes`, returning its heap-id.
pub fn insert(store: &mut ByteStore, header: &mut FractalHeapHeader, bytes: &[u8]) -> Result<HeapId> {
    let needed = bytes.len() as u64;
    let remaining = header.direct_block_size - header.next_free_offset;
    if needed > remaining {
        grow(store, header, needed)?;
    }
    let offset = header.next_free_offset;
    store.write(header.direct_block_address + offset, bytes)?;
    header.next_free_offset += needed;
    persist_in_place(store, header)?;
    Ok(encode_heap_id(offset, bytes.len() as u32))
}

/// Read the bytes named by `heap_id`.
pub fn read(store: &ByteStore, header: &FractalHeapHeader, heap_id: HeapId) -> Result<Vec<u8>> {
    let (offset, length) = decode_heap_id(heap_id);
    let bytes = store.read(header.direct_block_address + offset, length as usize)?;
    Ok(bytes.to_vec())
}

/// Overwrite the record named by `heap_id` with `bytes`. If the new
/// payload is the same length the write happens in place and the same
/// heap-id is returned (spec.md §4.8: "modify the heap entry in place").
/// Otherwise the old bytes are abandoned and a fresh heap-id for a new
/// record is returned — callers (the v2 B-tree index) must be updated to
/// the new id in that case.
pub fn modify(
    store: &mut ByteStore,
    header: &mut FractalHeapHeader,
    heap_id: HeapId,
    bytes: &[u8],
) -> Result<HeapId> {
    let (offset, length) = decode_heap_id(heap_id);
    if bytes.len() as u32 == length {
        store.write(header.direct_block_address + offset, bytes)?;
        Ok(heap_id)
    } else {
        insert(store, header, bytes)
    }
}

/// Remove the record named by `heap_id`. The core never reclaims heap
/// space (spec.md §9's Open Question), so this is purely advisory — it
/// exists so the API shape matches spec.md §4.5 and so callers have a
/// place to record the removal in their own index.
pub fn remove(_store: &mut ByteStore, _header: &mut FractalHeapHeader, _heap_id: HeapId) -> Result<()> {
    Ok(())
}

/// Re-persist the header fields at their fixed address. Called after every
/// mutation so a crash between mutation and explicit `flush()` never
/// leaves the on-disk header referring to stale bounds.
pub fn persist_in_place(store: &mut ByteStore, header: &FractalHeapHeader) -> Result<()> {
    store.write(header.header_address, &encode_header(header))
}

fn grow(store: &mut ByteStore, header: &mut FractalHeapHeader, at_least: u64) -> Result<()> {
    let used = header.next_free_offset;
    let new_size = (header.direct_block_size + at_least).max(header.direct_block_size * 2);
    let old_bytes = store.read(header.direct_block_address, used as usize)?.to_vec();
    let new_address = store.allocate(new_size)?;
    store.write(new_address, &old_bytes)?;
    header.direct_block_address = new_address;
    header.direct_block_size = new_size;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-fheap-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn insert_and_read_roundtrip() {
        let mut store = scratch_store();
        let mut header = create(&mut store).unwrap();
        let id = insert(&mut store, &mut header, b"hello attribute").unwrap();
        assert_eq!(read(&store, &header, id).unwrap(), b"hello attribute");
    }

    #[test]
    fn modify_same_length_is_in_place() {
        let mut store = scratch_store();
        let mut header = create(&mut store).unwrap();
        let id = insert(&mut store, &mut header, b"aaaa").unwrap();
        let id2 = modify(&mut store, &mut header, id, b"bbbb").unwrap();
        assert_eq!(id, id2);
        assert_eq!(read(&store, &header, id2).unwrap(), b"bbbb");
    }

    #[test]
    fn insert_forces_growth_when_block_is_small() {
        let mut store = scratch_store();
        let mut header = create(&mut store).unwrap();
        let big = vec![7u8; 1000];
        let id = insert(&mut store, &mut header, &big).unwrap();
        assert_eq!(read(&store, &header, id).unwrap(), big);
    }
}
