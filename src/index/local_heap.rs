//! Local Heap (spec.md §4.5): a group-local contiguous string arena.
//!
//! The read side decodes the `HEAP`-signed header (version, sizes,
//! data-segment address); the write side adds what spec.md §4.8 needs:
//! appending a new null-terminated link name.
//!
//! The free list is modeled as a single tail free block (next-free-offset,
//! size), which is all link creation ever needs: names are appended, never
//! removed. When the tail block is too small the data segment is relocated
//! via the byte store's allocator and the old block is abandoned in place,
//! consistent with the store's no-reclaim policy.

use crate::error::{Error, Result};
use crate::store::{ByteStore, UNDEFINED_ADDRESS};
use nom::bytes::streaming::tag;
use nom::error::{context, VerboseError};
use nom::number::streaming::{le_u32, le_u64, le_u8};

const SIGNATURE: &[u8; 4] = b"HEAP";
const MIN_FREE_BLOCK: u64 = 16;

#[derive(Debug, Clone, Copy)]
pub struct LocalHeap {
    pub header_address: u64,
    pub data_segment_size: u64,
    pub offset_to_head_of_freelist: u64,
    pub data_segment_address: u64,
}

pub fn parse(input: &[u8], header_address: u64) -> Result<LocalHeap> {
    let parse_inner = |input: &[u8]| -> nom::IResult<&[u8], LocalHeap, VerboseError<&[u8]>> {
        context("local heap", |input| {
            let (input, _) = tag(SIGNATURE.as_slice())(input)?;
            let (input, _version) = le_u8(input)?;
            let (input, _) = tag([0, 0, 0])(input)?;
            let (input, data_segment_size) = le_u64(input)?;
            let (input, offset_to_head_of_freelist) = le_u64(input)?;
            let (input, data_segment_address) = le_u64(input)?;
            Ok((
                input,
                LocalHeap {
                    header_address,
                    data_segment_size,
                    offset_to_head_of_freelist,
                    data_segment_address,
                },
            ))
        })(input)
    };
    let (_, heap) = parse_inner(input)?;
    Ok(heap)
}

/// Read a null-terminated string at byte `offset` within the heap's data
/// segment.
pub fn get_string(store: &ByteStore, heap: &LocalHeap, offset: u64) -> Result<String> {
    let addr = heap.data_segment_address + offset;
    let max = (heap.data_segment_size - offset) as usize;
    let bytes = store.read(addr, max)?;
    let nul = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8(bytes[..nul].to_vec())?)
}

fn encode_header(heap: &LocalHeap) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(0); // version
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&heap.data_segment_size.to_le_bytes());
    out.extend_from_slice(&heap.offset_to_head_of_freelist.to_le_bytes());
    out.extend_from_slice(&heap.data_segment_address.to_le_bytes());
    out
}

fn encode_free_block(next_free: u64, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&next_free.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

/// Create a brand-new, empty local heap with `initial_capacity` bytes of
/// data segment, and persist it. Returns its header address.
pub fn create(store: &mut ByteStore, initial_capacity: u64) -> Result<LocalHeap> {
    let capacity = initial_capacity.max(MIN_FREE_BLOCK);
    let data_segment_address = store.allocate(capacity)?;
    let heap = LocalHeap {
        header_address: 0, // filled in below
        data_segment_size: capacity,
        offset_to_head_of_freelist: 0,
        data_segment_address,
    };
    let free_block = encode_free_block(UNDEFINED_ADDRESS, capacity);
    store.write(data_segment_address, &free_block)?;
    let header_address = store.allocate(32)?;
    let heap = LocalHeap {
        header_address,
        ..heap
    };
    store.write(header_address, &encode_header(&heap))?;
    Ok(heap)
}

/// Append `name` (null-terminated) to the heap's data segment, growing and
/// relocating the segment if the tail free block is too small. Returns the
/// byte offset (relative to the data segment) at which `name` now lives.
pub fn append_string(store: &mut ByteStore, heap: &mut LocalHeap, name: &str) -> Result<u64> {
    let needed = pad8(name.len() as u64 + 1);
    let free_addr = heap.data_segment_address + heap.offset_to_head_of_freelist;
    let free_bytes = store.read(free_addr, 16)?;
    let remaining = u64::from_le_bytes(free_bytes[8..16].try_into().unwrap());

    if needed <= remaining {
        write_name(store, free_addr, name)?;
        let new_free_offset = heap.offset_to_head_of_freelist + needed;
        let new_remaining = remaining - needed;
        finish_free_block(store, heap, new_free_offset, new_remaining)?;
        return Ok(heap.offset_to_head_of_freelist - needed);
    }

    // Grow: relocate the whole data segment.
    let used = heap.data_segment_size - remaining;
    let new_size = (heap.data_segment_size + needed).max(heap.data_segment_size * 2);
    let old_used_bytes = store.read(heap.data_segment_address, used as usize)?.to_vec();
    let new_address = store.allocate(new_size)?;
    store.write(new_address, &old_used_bytes)?;

    let name_offset = used;
    write_name(store, new_address + name_offset, name)?;

    heap.data_segment_address = new_address;
    heap.data_segment_size = new_size;
    let new_free_offset = name_offset + needed;
    let new_remaining = new_size - new_free_offset;
    finish_free_block(store, heap, new_free_offset, new_remaining)?;

    Ok(name_offset)
}

fn write_name(store: &mut ByteStore, addr: u64, name: &str) -> Result<()> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 8 != 0 {
        bytes.push(0);
    }
    store.write(addr, &bytes)
}

fn finish_free_block(
    store: &mut ByteStore,
    heap: &mut LocalHeap,
    new_free_offset: u64,
    new_remaining: u64,
) -> Result<()> {
    if new_remaining >= MIN_FREE_BLOCK {
        let block = encode_free_block(UNDEFINED_ADDRESS, new_remaining);
        store.write(heap.data_segment_address + new_free_offset, &block)?;
        heap.offset_to_head_of_freelist = new_free_offset;
    } else {
        // No room left for a free-block header; heap reads as full until
        // the next relocation.
        heap.offset_to_head_of_freelist = heap.data_segment_size.saturating_sub(MIN_FREE_BLOCK);
        let block = encode_free_block(UNDEFINED_ADDRESS, 0);
        store.write(heap.data_segment_address + heap.offset_to_head_of_freelist, &block)?;
    }
    store.write(heap.header_address, &encode_header(heap))?;
    Ok(())
}

fn pad8(n: u64) -> u64 {
    (n + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-heap-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn append_and_read_back_names() {
        let mut store = scratch_store();
        let mut heap = create(&mut store, 64).unwrap();
        let off_a = append_string(&mut store, &mut heap, "alpha").unwrap();
        let off_b = append_string(&mut store, &mut heap, "beta").unwrap();
        assert_eq!(get_string(&store, &heap, off_a).unwrap(), "alpha");
        assert_eq!(get_string(&store, &heap, off_b).unwrap(), "beta");
    }

    #[test]
    fn append_forces_relocation_when_full() {
        let mut store = scratch_store();
        let mut heap = create(&mut store, 16).unwrap();
        let long_name = "a".repeat(100);
        let off = append_string(&mut store, &mut heap, &long_name).unwrap();
        assert_eq!(get_string(&store, &heap, off).unwrap(), long_name);
    }
}
