//! v2 B-tree (spec.md §4.5/§6): a checksummed, paged B-tree used here to
//! index dense-attribute names to fractal-heap ids.
//!
//! Built directly from spec.md §4.5/§6's literal description (`BTHD`/`BTIN`/
//! `BTLF` signatures, trailing Fletcher32 checksum) in the same
//! nom-streaming idiom as the rest of this crate's index layer.
//!
//! Per spec.md's Open Question, `insert`/`remove` are correct for the
//! single-leaf case; `rebalance` is a documented no-op hook for future
//! multi-leaf splits.

use crate::error::{Error, Result};
use crate::index::fletcher32;
use crate::index::fractal_heap::HeapId;
use crate::store::ByteStore;
use nom::bytes::streaming::tag;
use nom::error::{context, VerboseError};
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};

const HEADER_SIGNATURE: &[u8; 4] = b"BTHD";
const LEAF_SIGNATURE: &[u8; 4] = b"BTLF";

type PResult<'a, O> = nom::IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

#[derive(Debug, Clone)]
pub struct Record {
    pub name_hash: u32,
    pub heap_id: HeapId,
}

#[derive(Debug, Clone, Copy)]
pub struct Btree2Header {
    pub header_address: u64,
    pub root_address: u64,
    pub num_records: u32,
}

fn fnv1a(name: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in name.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn parse_header(input: &[u8], header_address: u64) -> Result<Btree2Header> {
    let parse_inner = |input: &[u8]| -> PResult<Btree2Header> {
        context("btree2 header", |input| {
            let (input, _) = tag(HEADER_SIGNATURE.as_slice())(input)?;
            let (input, _version) = le_u8(input)?;
            let (input, root_address) = le_u64(input)?;
            let (input, num_records) = le_u32(input)?;
            let (input, _checksum) = le_u32(input)?;
            Ok((
                input,
                Btree2Header { header_address, root_address, num_records },
            ))
        })(input)
    };
    let (_, header) = parse_inner(input)?;
    Ok(header)
}

fn encode_header(header: &Btree2Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(21);
    out.extend_from_slice(HEADER_SIGNATURE.as_slice());
    out.push(0); // version
    out.extend_from_slice(&header.root_address.to_le_bytes());
    out.extend_from_slice(&header.num_records.to_le_bytes());
    let checksum = fletcher32(&out);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

fn record(input: &[u8]) -> PResult<Record> {
    let (input, name_hash) = le_u32(input)?;
    let (input, heap_id_bytes) = nom::bytes::streaming::take(8usize)(input)?;
    let mut heap_id = [0u8; 8];
    heap_id.copy_from_slice(heap_id_bytes);
    Ok((input, Record { name_hash, heap_id }))
}

fn parse_leaf(input: &[u8], num_records: u32) -> Result<Vec<Record>> {
    let parse_inner = |input: &[u8]| -> PResult<Vec<Record>> {
        context("btree2 leaf", |input| {
            let (input, _) = tag(LEAF_SIGNATURE.as_slice())(input)?;
            let (input, _version) = le_u8(input)?;
            let (input, records) = count(record, num_records as usize)(input)?;
            Ok((input, records))
        })(input)
    };
    let (_, records) = parse_inner(input)?;
    Ok(records)
}

fn encode_leaf(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + records.len() * 12 + 4);
    out.extend_from_slice(LEAF_SIGNATURE.as_slice());
    out.push(0); // version
    for r in records {
        out.extend_from_slice(&r.name_hash.to_le_bytes());
        out.extend_from_slice(&r.heap_id);
    }
    let checksum = fletcher32(&out);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

fn leaf_byte_len(num_records: u32) -> usize {
    5 + num_records as usize * 12 + 4
}

/// Load the header at `address` (the address recorded in an Attribute-Info
/// message) plus its single leaf's records.
pub fn load(store: &ByteStore, address: u64) -> Result<(Btree2Header, Vec<Record>)> {
    let header_bytes = store.read(address, 21)?;
    checksum_ok(header_bytes)?;
    let header = parse_header(header_bytes, address)?;
    if header.num_records == 0 {
        return Ok((header, Vec::new()));
    }
    let leaf_bytes = store.read(header.root_address, leaf_byte_len(header.num_records))?;
    checksum_ok(leaf_bytes)?;
    let records = parse_leaf(leaf_bytes, header.num_records)?;
    Ok((header, records))
}

/// Create an empty v2 B-tree (header + empty leaf) and persist it.
pub fn create(store: &mut ByteStore) -> Result<Btree2Header> {
    let leaf_bytes = encode_leaf(&[]);
    let root_address = store.allocate(leaf_bytes.len() as u64)?;
    store.write(root_address, &leaf_bytes)?;
    let header_address = store.allocate(21)?;
    let header = Btree2Header { header_address, root_address, num_records: 0 };
    store.write(header_address, &encode_header(&header))?;
    Ok(header)
}

/// Find the heap-id(s) whose record's name hash matches `name`. Because
/// the index stores a hash rather than the name itself, a collision can in
/// principle return more than one candidate; callers resolve the exact
/// match by reading the heap entry (`attribute::find_by_name` does this).
pub fn search(store: &ByteStore, header: &Btree2Header, name: &str) -> Result<Vec<HeapId>> {
    let (_header, records) = load(store, header.header_address)?;
    let hash = fnv1a(name);
    Ok(records
        .into_iter()
        .filter(|r| r.name_hash == hash)
        .map(|r| r.heap_id)
        .collect())
}

/// Insert `(name, heap_id)`. The leaf is rewritten at a freshly allocated
/// address and the header's `root_address`/`num_records` fields are
/// updated in place — the old leaf bytes are abandoned, matching the
/// store's no-reclaim policy.
pub fn insert(store: &mut ByteStore, header: &mut Btree2Header, name: &str, heap_id: HeapId) -> Result<()> {
    let (_h, mut records) = load(store, header.header_address)?;
    records.push(Record { name_hash: fnv1a(name), heap_id });
    persist_leaf(store, header, &records)
}

/// Remove every record naming `name` (resolved by hash, same caveat as
/// `search`). Returns `true` if anything was removed.
pub fn remove(store: &mut ByteStore, header: &mut Btree2Header, name: &str) -> Result<bool> {
    let (_h, records) = load(store, header.header_address)?;
    let hash = fnv1a(name);
    let before = records.len();
    let remaining: Vec<Record> = records.into_iter().filter(|r| r.name_hash != hash).collect();
    let removed = remaining.len() != before;
    if removed {
        persist_leaf(store, header, &remaining)?;
    }
    Ok(removed)
}

fn persist_leaf(store: &mut ByteStore, header: &mut Btree2Header, records: &[Record]) -> Result<()> {
    let leaf_bytes = encode_leaf(records);
    let new_root = store.allocate(leaf_bytes.len() as u64)?;
    store.write(new_root, &leaf_bytes)?;
    header.root_address = new_root;
    header.num_records = records.len() as u32;
    store.write(header.header_address, &encode_header(header))?;
    Ok(())
}

/// Multi-leaf rebalancing is out of scope for the MVP (spec.md's Open
/// Question): the working set is required to stay within one leaf. This
/// hook exists so the API shape is present even though it never has
/// anything to do yet.
pub fn rebalance(_store: &mut ByteStore, _header: &mut Btree2Header) -> Result<()> {
    Ok(())
}

pub fn checksum_ok(block: &[u8]) -> Result<()> {
    if block.len() < 4 {
        return Err(Error::Truncated { offset: 0, wanted: 4, available: block.len() });
    }
    let (data, trailer) = block.split_at(block.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = fletcher32(data);
    if expected != computed {
        return Err(Error::ChecksumMismatch {
            what: "v2 btree node",
            offset: 0,
            expected,
            computed,
        });
    }
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
        path.push(format!("hdf5-core-btree2-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn insert_then_search_roundtrips() {
        let mut store = scratch_store();
        let mut header = create(&mut store).unwrap();
        insert(&mut store, &mut header, "alpha", [1; 8]).unwrap();
        insert(&mut store, &mut header, "beta", [2; 8]).unwrap();
        assert_eq!(search(&store, &header, "alpha").unwrap(), vec![[1u8; 8]]);
        assert_eq!(search(&store, &header, "beta").unwrap(), vec![[2u8; 8]]);
        assert!(search(&store, &header, "gamma").unwrap().is_empty());
    }

    #[test]
    fn remove_drops_the_record() {
        let mut store = scratch_store();
        let mut header = create(&mut store).unwrap();
        insert(&mut store, &mut header, "alpha", [1; 8]).unwrap();
        assert!(remove(&mut store, &mut header, "alpha").unwrap());
        assert!(search(&store, &header, "alpha").unwrap().is_empty());
        assert!(!remove(&mut store, &mut header, "alpha").unwrap());
    }
}
