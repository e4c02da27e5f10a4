//! L7: group link resolution over two historical representations, plus
//! hard-link creation (spec.md §4.8's "Group resolution" paragraph and its
//! "Link create (hard)" paragraph).
//!
//! The legacy Symbol-Table-Node wire format decodes `symbol_table`/
//! `symbol_table_entry`/`group_node` records; the modern Link-message path
//! and the whole write side are new, built directly against spec.md §4.8 on
//! top of `index::btree1`/`index::local_heap`.

use crate::error::{Error, Result};
use crate::index::{btree1, local_heap};
use crate::message::{Link, LinkTarget, SymbolTable};
use crate::objheader::{self, Message, MessageFlags, ObjectHeader};
use crate::sizes::{parse_sized, Sizes};
use crate::store::ByteStore;
use nom::bytes::streaming::tag;
use nom::error::{context, VerboseError};
use nom::multi::count;
use nom::number::streaming::le_u32;

const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";

type PResult<'a, O> = nom::IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

/// One entry inside a legacy Symbol Table Node: a link name (resolved via
/// the group's Local Heap) and the address of the child object's header.
/// The scratch-pad's cached B-tree/heap addresses (present only when a
/// child is itself a group) are not retained; they are an optimization a
/// reader may ignore and rediscover via the child's own Symbol-Table
/// message.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTableEntry {
    pub link_name_offset: u64,
    pub object_header_address: u64,
}

#[derive(Debug, Clone)]
pub struct SymbolTableNode {
    pub address: u64,
    pub entries: Vec<SymbolTableEntry>,
}

fn snod_entry(sizes: Sizes) -> impl Fn(&[u8]) -> PResult<SymbolTableEntry> {
    move |input| {
        let (input, link_name_offset) = parse_sized(input, sizes.offset_size)?;
        let (input, object_header_address) = parse_sized(input, sizes.offset_size)?;
        let (input, _cache_type) = le_u32(input)?;
        let (input, _reserved) = tag([0u8, 0, 0, 0])(input)?;
        let (input, _scratch) =
            nom::bytes::streaming::take(sizes.offset_size as usize * 2)(input)?;
        Ok((input, SymbolTableEntry { link_name_offset, object_header_address }))
    }
}

fn symbol_table_entry_len(sizes: Sizes) -> usize {
    sizes.offset_size as usize * 2 + 4 + 4 + sizes.offset_size as usize * 2
}

/// Parse a Symbol Table Node at `address`: signature `SNOD`, version,
/// reserved byte, entry count, then that many fixed-size entries.
pub fn parse_snod(store: &ByteStore, address: u64, sizes: Sizes) -> Result<SymbolTableNode> {
    let head = store.read(address, 8)?;
    let entries_used = {
        let parse_head = |input: &[u8]| -> PResult<u16> {
            context("snod head", |input| {
                let (input, _) = tag(SNOD_SIGNATURE.as_slice())(input)?;
                let (input, _version) = nom::number::streaming::le_u8(input)?;
                let (input, _reserved) = nom::number::streaming::le_u8(input)?;
                nom::number::streaming::le_u16(input)
            })(input)
        };
        let (_, n) = parse_head(head)?;
        n
    };
    let entry_len = symbol_table_entry_len(sizes);
    let total_len = 8 + entries_used as usize * entry_len;
    let bytes = store.read(address, total_len)?;

    let parse_inner = |input: &[u8]| -> PResult<Vec<SymbolTableEntry>> {
        context("snod", |input| {
            let (input, _) = tag(SNOD_SIGNATURE.as_slice())(input)?;
            let (input, _version) = nom::number::streaming::le_u8(input)?;
            let (input, _reserved) = nom::number::streaming::le_u8(input)?;
            let (input, _count) = nom::number::streaming::le_u16(input)?;
            count(snod_entry(sizes), entries_used as usize)(input)
        })(input)
    };
    let (_, entries) = parse_inner(bytes)?;
    Ok(SymbolTableNode { address, entries })
}

fn encode_snod(entries: &[SymbolTableEntry], sizes: Sizes) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * symbol_table_entry_len(sizes));
    out.extend_from_slice(SNOD_SIGNATURE.as_slice());
    out.push(1); // version
    out.push(0); // reserved
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in entries {
        out.extend_from_slice(&sizes.address_bytes(e.link_name_offset));
        out.extend_from_slice(&sizes.address_bytes(e.object_header_address));
        out.extend_from_slice(&0u32.to_le_bytes()); // cache_type: not cached
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&vec![0u8; sizes.offset_size as usize * 2]);
    }
    out
}

fn create_snod(store: &mut ByteStore, entries: &[SymbolTableEntry], sizes: Sizes) -> Result<u64> {
    let bytes = encode_snod(entries, sizes);
    let address = store.allocate(bytes.len() as u64)?;
    store.write(address, &bytes)?;
    Ok(address)
}

/// A resolved link, regardless of which on-disk representation produced it.
#[derive(Debug, Clone)]
pub enum LinkEntry {
    Hard { name: String, address: u64 },
    Soft { name: String, path: String },
}

impl LinkEntry {
    pub fn name(&self) -> &str {
        match self {
            LinkEntry::Hard { name, .. } | LinkEntry::Soft { name, .. } => name,
        }
    }
}

/// List every link directly inside a group, dispatching on whichever
/// representation its header carries.
pub fn list_links(store: &ByteStore, header: &ObjectHeader, sizes: Sizes) -> Result<Vec<LinkEntry>> {
    let modern: Vec<&Link> = header.links();
    if !modern.is_empty() {
        return Ok(modern
            .into_iter()
            .map(|l| match &l.target {
                LinkTarget::Hard { object_address } => {
                    LinkEntry::Hard { name: l.name.clone(), address: *object_address }
                }
                LinkTarget::Soft { path } => LinkEntry::Soft { name: l.name.clone(), path: path.clone() },
            })
            .collect());
    }
    if let Some(st) = header.find_symbol_table().copied() {
        return list_legacy(store, &st, sizes);
    }
    Ok(Vec::new())
}

/// Walk a legacy group's B-tree to its leaves. Per spec.md's "Group
/// resolution" paragraph, each leaf address is a Symbol-Table-Node: peeked
/// and parsed directly, never wrapped in an object header.
fn list_legacy(store: &ByteStore, st: &SymbolTable, sizes: Sizes) -> Result<Vec<LinkEntry>> {
    let heap_bytes = store.read(st.local_heap_address, 32)?.to_vec();
    let heap = local_heap::parse(&heap_bytes, st.local_heap_address)?;

    let mut out = Vec::new();
    for (_sort_key, snod_address) in btree1::collect_snod_addresses(store, st.btree_address)? {
        let sig = store.read(snod_address, 4)?;
        if sig != SNOD_SIGNATURE.as_slice() {
            continue;
        }
        let node = parse_snod(store, snod_address, sizes)?;
        for entry in node.entries {
            let name = local_heap::get_string(store, &heap, entry.link_name_offset)?;
            out.push(LinkEntry::Hard { name, address: entry.object_header_address });
        }
    }
    Ok(out)
}

/// Parse the object header at `header_address` and list its links in one
/// call.
pub fn load_group(store: &ByteStore, header_address: u64, sizes: Sizes) -> Result<(ObjectHeader, Vec<LinkEntry>)> {
    let header = objheader::parse(store, header_address, sizes)?;
    let links = list_links(store, &header, sizes)?;
    Ok((header, links))
}

/// Create a brand-new, empty group (modern representation: no messages
/// yet, links are appended as they are created). Legacy (Symbol-Table)
/// groups only ever arise by reading files written elsewhere.
pub fn create_group(store: &mut ByteStore, sizes: Sizes) -> Result<u64> {
    objheader::create(store, &[], sizes)
}

/// Validate a link path per spec.md §4.8: non-empty, starts with `/`, no
/// consecutive slashes, not equal to `/`.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || !path.starts_with('/') || path == "/" || path.contains("//") {
        return Err(Error::InvalidPath { path: path.to_string() });
    }
    Ok(())
}

fn split_segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('/').split('/').collect()
}

/// Split `/a/b/c` into (`/a/b`, `c`); `/c` into (`""`, `c`), where an empty
/// parent means "the root".
fn split_parent(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => (String::new(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

/// Resolve `path` from `root_address` to an object header address,
/// following one link per path segment and re-resolving through soft
/// links from the root.
pub fn resolve(store: &ByteStore, root_address: u64, sizes: Sizes, path: &str) -> Result<u64> {
    if path == "/" {
        return Ok(root_address);
    }
    validate_path(path)?;

    let mut current = root_address;
    for segment in split_segments(path) {
        let header = objheader::parse(store, current, sizes)?;
        let links = list_links(store, &header, sizes)?;
        let found = links.into_iter().find(|l| l.name() == segment);
        match found {
            Some(LinkEntry::Hard { address, .. }) => current = address,
            Some(LinkEntry::Soft { path: target, .. }) => {
                current = resolve(store, root_address, sizes, &target)?
            }
            None => return Err(Error::TargetNotFound { path: path.to_string() }),
        }
    }
    Ok(current)
}

/// Create a hard link at `link_path` pointing at the object already
/// resolvable at `target_path`, incrementing the target's reference count.
/// Per spec.md §4.8: validate the link path; resolve the target
/// (`TargetNotFound`); resolve the parent group (`ParentNotFound`); append
/// a Link message (modern) or insert a Symbol-Table entry (legacy).
pub fn create_hard_link(
    store: &mut ByteStore,
    root_address: u64,
    sizes: Sizes,
    target_path: &str,
    link_path: &str,
) -> Result<()> {
    validate_path(link_path)?;
    let target_address = resolve(store, root_address, sizes, target_path)
        .map_err(|_| Error::TargetNotFound { path: target_path.to_string() })?;

    let (parent_path, name) = split_parent(link_path);
    let parent_address = if parent_path.is_empty() {
        root_address
    } else {
        resolve(store, root_address, sizes, &parent_path)
            .map_err(|_| Error::ParentNotFound { path: parent_path.clone() })?
    };

    let parent_header = objheader::parse(store, parent_address, sizes)?;

    if let Some(st) = parent_header.find_symbol_table().copied() {
        insert_legacy_entry(store, parent_address, &st, &name, target_address, sizes)?;
    } else {
        objheader::append_message(
            store,
            parent_address,
            &Message::Link(Link {
                name,
                target: LinkTarget::Hard { object_address: target_address },
            }),
            MessageFlags::default_writable(),
            sizes,
        )?;
    }

    objheader::increment_reference_count(store, target_address)?;
    Ok(())
}

/// Insert a new entry into a legacy group's (single-leaf, single-SNOD)
/// Symbol Table, relocating the SNOD on growth and patching the B-tree's
/// one leaf entry (or, for a group with no SNOD yet, the Symbol-Table
/// message's B-tree address) in place — the same relocate-and-abandon
/// pattern `index::local_heap`/`index::btree2` already use.
fn insert_legacy_entry(
    store: &mut ByteStore,
    parent_address: u64,
    st: &SymbolTable,
    name: &str,
    target_address: u64,
    sizes: Sizes,
) -> Result<()> {
    let heap_bytes = store.read(st.local_heap_address, 32)?.to_vec();
    let mut heap = local_heap::parse(&heap_bytes, st.local_heap_address)?;
    let name_offset = local_heap::append_string(store, &mut heap, name)?;

    let snod_addresses = btree1::collect_snod_addresses(store, st.btree_address)?;

    let mut entries = if let Some((_, snod_address)) = snod_addresses.first() {
        parse_snod(store, *snod_address, sizes)?.entries
    } else {
        Vec::new()
    };
    entries.push(SymbolTableEntry { link_name_offset: name_offset, object_header_address: target_address });
    let new_snod_address = create_snod(store, &entries, sizes)?;

    if !snod_addresses.is_empty() {
        rewrite_tree_leaf_child(store, st.btree_address, new_snod_address)?;
    } else {
        let new_tree_entries = [btree1::GroupEntry { heap_name_offset: name_offset, child_address: new_snod_address }];
        let new_tree_bytes = btree1::encode_group_node(&new_tree_entries);
        let new_tree_address = store.allocate(new_tree_bytes.len() as u64)?;
        store.write(new_tree_address, &new_tree_bytes)?;

        let new_body = {
            let mut body = Vec::new();
            body.extend_from_slice(&sizes.address_bytes(new_tree_address));
            body.extend_from_slice(&sizes.address_bytes(st.local_heap_address));
            body
        };
        objheader::rewrite_message_body(
            store,
            parent_address,
            sizes,
            |m| matches!(m, Message::SymbolTable(_)),
            &new_body,
        )?;
    }
    Ok(())
}

/// Overwrite a single-leaf group B-tree's one entry's child address in
/// place — the node's entry count never changes under this crate's
/// single-SNOD simplification, only which SNOD it points at.
fn rewrite_tree_leaf_child(store: &mut ByteStore, tree_address: u64, new_child_address: u64) -> Result<()> {
    // header (24 bytes) + heap_name_offset (8 bytes) precede child_address.
    store.write(tree_address + 24 + 8, &new_child_address.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Dataspace;

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-group-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn create_and_link_child_is_resolvable_by_path() {
        let mut store = scratch_store();
        let root = create_group(&mut store, Sizes::WRITE).unwrap();
        let child = create_group(&mut store, Sizes::WRITE).unwrap();
        objheader::append_message(
            &mut store,
            root,
            &Message::Link(Link {
                name: "child".to_string(),
                target: LinkTarget::Hard { object_address: child },
            }),
            MessageFlags::default_writable(),
            Sizes::WRITE,
        )
        .unwrap();

        let resolved = resolve(&store, root, Sizes::WRITE, "/child").unwrap();
        assert_eq!(resolved, child);
    }

    #[test]
    fn hard_link_increments_target_reference_count() {
        let mut store = scratch_store();
        let root = create_group(&mut store, Sizes::WRITE).unwrap();
        let dataset = objheader::create(
            &mut store,
            &[(Message::Dataspace(Dataspace::scalar()), MessageFlags::default_writable())],
            Sizes::WRITE,
        )
        .unwrap();
        objheader::append_message(
            &mut store,
            root,
            &Message::Link(Link {
                name: "ds".to_string(),
                target: LinkTarget::Hard { object_address: dataset },
            }),
            MessageFlags::default_writable(),
            Sizes::WRITE,
        )
        .unwrap();

        create_hard_link(&mut store, root, Sizes::WRITE, "/ds", "/ds_alias").unwrap();

        let header = objheader::parse(&store, dataset, Sizes::WRITE).unwrap();
        assert_eq!(header.reference_count, 2);

        let resolved = resolve(&store, root, Sizes::WRITE, "/ds_alias").unwrap();
        assert_eq!(resolved, dataset);
    }

    #[test]
    fn missing_target_is_target_not_found() {
        let mut store = scratch_store();
        let root = create_group(&mut store, Sizes::WRITE).unwrap();
        assert!(matches!(
            create_hard_link(&mut store, root, Sizes::WRITE, "/nope", "/alias"),
            Err(Error::TargetNotFound { .. })
        ));
    }

    #[test]
    fn missing_parent_is_parent_not_found() {
        let mut store = scratch_store();
        let root = create_group(&mut store, Sizes::WRITE).unwrap();
        let dataset = objheader::create(
            &mut store,
            &[(Message::Dataspace(Dataspace::scalar()), MessageFlags::default_writable())],
            Sizes::WRITE,
        )
        .unwrap();
        objheader::append_message(
            &mut store,
            root,
            &Message::Link(Link {
                name: "ds".to_string(),
                target: LinkTarget::Hard { object_address: dataset },
            }),
            MessageFlags::default_writable(),
            Sizes::WRITE,
        )
        .unwrap();

        assert!(matches!(
            create_hard_link(&mut store, root, Sizes::WRITE, "/ds", "/missing_group/alias"),
            Err(Error::ParentNotFound { .. })
        ));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let mut store = scratch_store();
        let root = create_group(&mut store, Sizes::WRITE).unwrap();
        assert!(matches!(
            create_hard_link(&mut store, root, Sizes::WRITE, "/x", "no-leading-slash"),
            Err(Error::InvalidPath { .. })
        ));
        assert!(matches!(
            create_hard_link(&mut store, root, Sizes::WRITE, "/x", "/"),
            Err(Error::InvalidPath { .. })
        ));
        assert!(matches!(
            create_hard_link(&mut store, root, Sizes::WRITE, "/x", "/a//b"),
            Err(Error::InvalidPath { .. })
        ));
    }
}
