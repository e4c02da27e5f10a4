//! v1 B-tree (spec.md §4.5), used both for group symbol tables and for
//! chunked-dataset chunk indexes.
//!
//! The node layout (`TREE` signature, node type, level, sibling pointers,
//! entry list) decodes group nodes on the read side; chunk nodes and the
//! write side are built against spec.md §4.5/§6.

use crate::error::Result;
use crate::store::{ByteStore, UNDEFINED_ADDRESS};
use nom::bytes::streaming::tag;
use nom::error::{context, VerboseError};
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};

const SIGNATURE: &[u8; 4] = b"TREE";
const NODE_TYPE_GROUP: u8 = 0;
const NODE_TYPE_CHUNK: u8 = 1;

type PResult<'a, O> = nom::IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub heap_name_offset: u64,
    pub child_address: u64,
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub node_level: u8,
    pub entries: Vec<GroupEntry>,
}

fn address(input: &[u8]) -> PResult<u64> {
    le_u64(input)
}

fn group_entry(input: &[u8]) -> PResult<GroupEntry> {
    let (input, heap_name_offset) = address(input)?;
    let (input, child_address) = address(input)?;
    Ok((input, GroupEntry { heap_name_offset, child_address }))
}

fn parse_node_header(input: &[u8]) -> PResult<(u8, u8, u16, u64, u64)> {
    let (input, _) = tag(SIGNATURE.as_slice())(input)?;
    let (input, node_type) = le_u8(input)?;
    let (input, node_level) = le_u8(input)?;
    let (input, entries_used) = le_u16(input)?;
    let (input, left_sibling) = address(input)?;
    let (input, right_sibling) = address(input)?;
    Ok((input, (node_type, node_level, entries_used, left_sibling, right_sibling)))
}

/// The 24-byte node header is fixed size regardless of entry count; peek
/// just `(node_level, entries_used)` so callers know how many bytes to
/// re-read before parsing entries.
fn peek_header(store: &ByteStore, address: u64) -> Result<(u8, u16)> {
    let bytes = store.read(address, 24)?;
    let (_, (_node_type, node_level, entries_used, _left, _right)) = parse_node_header(bytes)?;
    Ok((node_level, entries_used))
}

pub fn parse_group_node(input: &[u8]) -> Result<GroupNode> {
    let parse_inner = |input: &[u8]| -> PResult<GroupNode> {
        context("group btree node", |input| {
            let (input, (node_type, node_level, entries_used, _left, _right)) =
                parse_node_header(input)?;
            debug_assert_eq!(node_type, NODE_TYPE_GROUP);
            let (input, entries) = count(group_entry, entries_used as usize)(input)?;
            Ok((input, GroupNode { node_level, entries }))
        })(input)
    };
    let (_, node) = parse_inner(input)?;
    Ok(node)
}

/// Walk a group B-tree rooted at `address`, returning the `(heap name
/// offset, SNOD address)` pairs at its leaves. Internal nodes are
/// transparently recursed into; this crate's writer only ever creates
/// single-leaf trees (spec.md's Open Question on split/merge), but the
/// reader handles arbitrary depth for files produced elsewhere.
pub fn collect_snod_addresses(store: &ByteStore, address: u64) -> Result<Vec<(u64, u64)>> {
    let (_level, entries_used) = peek_header(store, address)?;
    let full_len = 24 + entries_used as usize * 16;
    let bytes = store.read(address, full_len)?;
    let node = parse_group_node(bytes)?;

    let mut out = Vec::new();
    for entry in &node.entries {
        if node.node_level == 0 {
            out.push((entry.heap_name_offset, entry.child_address));
        } else {
            out.extend(collect_snod_addresses(store, entry.child_address)?);
        }
    }
    Ok(out)
}

/// Encode a single-leaf group B-tree node holding `entries`.
pub fn encode_group_node(entries: &[GroupEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + entries.len() * 16);
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(NODE_TYPE_GROUP);
    out.push(0); // leaf
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    for e in entries {
        out.extend_from_slice(&e.heap_name_offset.to_le_bytes());
        out.extend_from_slice(&e.child_address.to_le_bytes());
    }
    out
}

// ---- chunk B-tree ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub chunk_size: u32,
    pub filter_mask: u32,
    /// Scaled coordinates (`origin[i] / chunk_dim[i]`), one per dataset
    /// dimension, followed by the spec-mandated trailing zero sentinel.
    pub scaled_coord: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub key: ChunkKey,
    pub child_address: u64,
}

#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub node_level: u8,
    pub entries: Vec<ChunkEntry>,
}

fn chunk_key(rank: usize) -> impl Fn(&[u8]) -> PResult<ChunkKey> {
    move |input| {
        let (input, chunk_size) = le_u32(input)?;
        let (input, filter_mask) = le_u32(input)?;
        let (input, mut scaled_coord) = count(le_u64, rank)(input)?;
        let (input, sentinel) = le_u64(input)?;
        debug_assert_eq!(sentinel, 0, "chunk key missing trailing zero sentinel");
        scaled_coord.push(sentinel);
        Ok((
            input,
            ChunkKey { chunk_size, filter_mask, scaled_coord },
        ))
    }
}

fn chunk_entry(rank: usize) -> impl Fn(&[u8]) -> PResult<ChunkEntry> {
    move |input| {
        let (input, key) = chunk_key(rank)(input)?;
        let (input, child_address) = address(input)?;
        Ok((input, ChunkEntry { key, child_address }))
    }
}

pub fn parse_chunk_node(input: &[u8], rank: usize) -> Result<ChunkNode> {
    let parse_inner = |input: &[u8]| -> PResult<ChunkNode> {
        context("chunk btree node", |input| {
            let (input, (node_type, node_level, entries_used, _left, _right)) =
                parse_node_header(input)?;
            debug_assert_eq!(node_type, NODE_TYPE_CHUNK);
            let (input, entries) = count(chunk_entry(rank), entries_used as usize)(input)?;
            Ok((input, ChunkNode { node_level, entries }))
        })(input)
    };
    let (_, node) = parse_inner(input)?;
    Ok(node)
}

fn chunk_node_size(entries_used: usize, rank: usize) -> usize {
    24 + entries_used * (8 + (rank + 1) * 8 + 8)
}

/// A fully-resolved chunk record: its scaled coordinate, its byte address
/// and on-disk size, and the filter mask that was active when it was
/// written.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub scaled: Vec<u64>,
    pub address: u64,
    pub nbytes: u32,
    pub filter_mask: u32,
}

/// Walk the chunk B-tree rooted at `address`, returning every present
/// chunk record. Built once per dataset read/write and then consulted by
/// name (scaled coordinate) — spec.md §4.6.
pub fn enumerate_chunks(store: &ByteStore, address: u64, rank: usize) -> Result<Vec<ChunkRecord>> {
    let (_level, entries_used) = peek_header(store, address)?;
    let full_len = chunk_node_size(entries_used as usize, rank);
    let bytes = store.read(address, full_len)?;
    let node = parse_chunk_node(bytes, rank)?;

    let mut out = Vec::new();
    for entry in &node.entries {
        if node.node_level == 0 {
            out.push(ChunkRecord {
                scaled: entry.key.scaled_coord[..rank].to_vec(),
                address: entry.child_address,
                nbytes: entry.key.chunk_size,
                filter_mask: entry.key.filter_mask,
            });
        } else {
            out.extend(enumerate_chunks(store, entry.child_address, rank)?);
        }
    }
    Ok(out)
}

/// Encode a single-leaf chunk B-tree node holding `entries`.
pub fn encode_chunk_node(entries: &[ChunkEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(NODE_TYPE_CHUNK);
    out.push(0); // leaf
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    out.extend_from_slice(&UNDEFINED_ADDRESS.to_le_bytes());
    for e in entries {
        out.extend_from_slice(&e.key.chunk_size.to_le_bytes());
        out.extend_from_slice(&e.key.filter_mask.to_le_bytes());
        for c in &e.key.scaled_coord {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&e.child_address.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_node_roundtrips() {
        let entries = vec![
            ChunkEntry {
                key: ChunkKey {
                    chunk_size: 400,
                    filter_mask: 0,
                    scaled_coord: vec![0, 0, 0],
                },
                child_address: 1024,
            },
            ChunkEntry {
                key: ChunkKey {
                    chunk_size: 400,
                    filter_mask: 0,
                    scaled_coord: vec![1, 0, 0],
                },
                child_address: 2048,
            },
        ];
        let encoded = encode_chunk_node(&entries);
        let node = parse_chunk_node(&encoded, 2).unwrap();
        assert_eq!(node.entries.len(), 2);
        assert_eq!(node.entries[1].child_address, 2048);
    }

    #[test]
    fn group_node_roundtrips() {
        let entries = vec![
            GroupEntry { heap_name_offset: 0, child_address: 512 },
            GroupEntry { heap_name_offset: 8, child_address: 768 },
        ];
        let encoded = encode_group_node(&entries);
        let node = parse_group_node(&encoded).unwrap();
        assert_eq!(node.entries.len(), 2);
        assert_eq!(node.entries[0].child_address, 512);
    }
}
