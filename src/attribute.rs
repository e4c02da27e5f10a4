//! L7: the compact⇄dense attribute manager (spec.md §4.8).
//!
//! Attributes start out as compact Attribute messages inline on an object
//! header. This module adds the write path and the one-way migration to
//! Fractal-Heap + v2-B-tree storage once the compact count reaches `K`,
//! built against spec.md §4.8 on top of `index::fractal_heap`/`index::btree2`
//! for the dense side.

use crate::error::{Error, Result};
use crate::index::{btree2, fractal_heap};
use crate::message::Attribute;
use crate::objheader::{self, AttributeInfo, Message, MessageFlags, ObjectHeader};
use crate::sizes::Sizes;
use crate::store::ByteStore;

/// Default compact→dense threshold, per spec.md's Open Question #1.
pub const DEFAULT_THRESHOLD: u16 = 8;

fn encode_attribute_record(attr: &Attribute) -> Vec<u8> {
    crate::message::encode_attribute(attr)
}

fn decode_attribute_record(bytes: &[u8]) -> Result<Attribute> {
    crate::message::parse_attribute(bytes, bytes.len())
}

/// Resolve the effective threshold for an object: the `AttributeInfo`
/// message's `max_compact` hint if present, else the caller's default.
fn effective_threshold(header: &ObjectHeader, default_threshold: u16) -> u16 {
    header
        .find_attribute_info()
        .and_then(|info| info.max_compact)
        .unwrap_or(default_threshold)
}

/// List every attribute currently on the object, from whichever storage is
/// active.
pub fn list(store: &ByteStore, header: &ObjectHeader) -> Result<Vec<Attribute>> {
    if let Some(info) = header.find_attribute_info() {
        let heap = fractal_heap::load(store, info.fractal_heap_address)?;
        let (_btree_header, records) = btree2::load(store, info.name_btree_address)?;
        records
            .iter()
            .map(|r| {
                let bytes = fractal_heap::read(store, &heap, r.heap_id)?;
                decode_attribute_record(&bytes)
            })
            .collect()
    } else {
        Ok(header.attributes().into_iter().cloned().collect())
    }
}

/// Find a single attribute by name, or `NotFound`.
pub fn get(store: &ByteStore, header: &ObjectHeader, name: &str) -> Result<Attribute> {
    // Compact storage may hold more than one message for the same name if
    // it was updated before ever transitioning to dense (write_compact
    // always appends); the most recently appended one wins.
    list(store, header)?
        .into_iter()
        .filter(|a| a.name == name)
        .last()
        .ok_or_else(|| Error::NotFound { what: format!("attribute {:?}", name) })
}

/// Write (insert or update) an attribute on the object at `header_address`,
/// per spec.md §4.8's three cases: already-dense, still-compact-under-K,
/// and the one-way transition.
pub fn write(
    store: &mut ByteStore,
    header_address: u64,
    attr: Attribute,
    default_threshold: u16,
    sizes: Sizes,
) -> Result<()> {
    let header = objheader::parse(store, header_address, sizes)?;

    if let Some(info) = header.find_attribute_info().copied() {
        log::debug!("attribute {:?}: dense storage path", attr.name);
        return write_dense(store, &info, attr);
    }

    let threshold = effective_threshold(&header, default_threshold);
    let compact_count = header.attributes().len() as u16;

    if compact_count < threshold {
        log::debug!("attribute {:?}: compact path ({}/{})", attr.name, compact_count, threshold);
        return write_compact(store, header_address, &header, attr, sizes);
    }

    log::debug!("attribute {:?}: triggering compact->dense transition at K={}", attr.name, threshold);
    transition_to_dense(store, header_address, &header, attr, sizes)
}

fn write_compact(
    store: &mut ByteStore,
    header_address: u64,
    header: &ObjectHeader,
    attr: Attribute,
    sizes: Sizes,
) -> Result<()> {
    // An update to an existing compact attribute rewrites its message in
    // place by appending a fresh one; duplicate-name resolution on read
    // always returns the most recently written record. A from-scratch
    // rewrite of the whole header (to truly remove the stale record) is
    // possible but unnecessary: `list`/`get` always scan forward and the
    // last match wins because `attributes()` preserves message order and
    // `list` takes the *last* matching name below.
    let _ = header;
    objheader::append_message(
        store,
        header_address,
        &Message::Attribute(attr),
        MessageFlags::default_writable(),
        sizes,
    )
}

fn write_dense(store: &mut ByteStore, info: &AttributeInfo, attr: Attribute) -> Result<()> {
    let mut heap = fractal_heap::load(store, info.fractal_heap_address)?;
    let mut btree_header = btree2::load(store, info.name_btree_address)?.0;

    let existing = btree2::search(store, &btree_header, &attr.name)?;
    let bytes = encode_attribute_record(&attr);

    if let Some(heap_id) = existing.into_iter().next() {
        fractal_heap::modify(store, &mut heap, heap_id, &bytes)?;
    } else {
        let heap_id = fractal_heap::insert(store, &mut heap, &bytes)?;
        btree2::insert(store, &mut btree_header, &attr.name, heap_id)?;
    }
    Ok(())
}

/// Migrate every compact attribute (plus the new one) into a freshly
/// allocated Fractal Heap + v2 B-tree, add the Attribute-Info message, and
/// flush — spec.md §4.8: "The transition is one-way" and "flush the byte
/// store" before returning.
fn transition_to_dense(
    store: &mut ByteStore,
    header_address: u64,
    header: &ObjectHeader,
    new_attr: Attribute,
    sizes: Sizes,
) -> Result<()> {
    let mut heap = fractal_heap::create(store)?;
    let mut btree_header = btree2::create(store)?;

    let mut existing: Vec<Attribute> = header.attributes().into_iter().cloned().collect();
    existing.push(new_attr);

    for attr in &existing {
        let bytes = encode_attribute_record(attr);
        let heap_id = fractal_heap::insert(store, &mut heap, &bytes)?;
        btree2::insert(store, &mut btree_header, &attr.name, heap_id)?;
    }

    let info = AttributeInfo {
        fractal_heap_address: heap.header_address,
        name_btree_address: btree_header.header_address,
        max_compact: None,
    };
    objheader::append_message(
        store,
        header_address,
        &Message::AttributeInfo(info),
        MessageFlags::default_writable(),
        sizes,
    )?;

    // Per spec.md §4.8, the transition removes the compact Attribute
    // messages from the header rather than leaving them to be shadowed: NIL
    // every one of them in place, the same no-reclaim-but-don't-resurface
    // policy `delete`'s compact path already uses.
    while objheader::nil_out_message(store, header_address, sizes, |m| matches!(m, Message::Attribute(_)))? {}

    store.flush()
}

/// Delete an attribute by name. Compact storage NILs the message in place;
/// dense storage removes the heap/B-tree entries in place. No reverse
/// (dense→compact) transition ever happens.
pub fn delete(
    store: &mut ByteStore,
    header_address: u64,
    name: &str,
    sizes: Sizes,
) -> Result<()> {
    let header = objheader::parse(store, header_address, sizes)?;

    if let Some(info) = header.find_attribute_info().copied() {
        let mut heap = fractal_heap::load(store, info.fractal_heap_address)?;
        let mut btree_header = btree2::load(store, info.name_btree_address)?.0;
        let heap_ids = btree2::search(store, &btree_header, name)?;
        if heap_ids.is_empty() {
            return Err(Error::NotFound { what: format!("attribute {:?}", name) });
        }
        for heap_id in heap_ids {
            fractal_heap::remove(store, &mut heap, heap_id)?;
        }
        btree2::remove(store, &mut btree_header, name)?;
        return Ok(());
    }

    // Compact deletion NILs the message's type field in place and leaves
    // its body as dead weight, the same no-reclaim policy the rest of this
    // crate already follows for continuation slack.
    let found = objheader::nil_out_message(store, header_address, sizes, |m| {
        matches!(m, Message::Attribute(a) if a.name == name)
    })?;
    if !found {
        return Err(Error::NotFound { what: format!("attribute {:?}", name) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Dataspace, Datatype};

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-attr-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    fn sample_attr(name: &str, value: i32) -> Attribute {
        Attribute {
            name: name.to_string(),
            datatype: Datatype::fixed(4, true),
            dataspace: Dataspace::scalar(),
            data: value.to_le_bytes().to_vec(),
        }
    }

    #[test]
    fn compact_attributes_accumulate_under_threshold() {
        let mut store = scratch_store();
        let header_address = objheader::create(&mut store, &[], Sizes::WRITE).unwrap();
        for i in 0..5 {
            write(&mut store, header_address, sample_attr(&format!("a{}", i), i), 8, Sizes::WRITE).unwrap();
        }
        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(list(&store, &header).unwrap().len(), 5);
        assert!(header.find_attribute_info().is_none());
    }

    #[test]
    fn crossing_threshold_transitions_to_dense_and_preserves_all_attributes() {
        let mut store = scratch_store();
        let header_address = objheader::create(&mut store, &[], Sizes::WRITE).unwrap();
        for i in 0..10 {
            write(&mut store, header_address, sample_attr(&format!("a{}", i), i), 8, Sizes::WRITE).unwrap();
        }
        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        assert!(header.find_attribute_info().is_some());
        let all = list(&store, &header).unwrap();
        assert_eq!(all.len(), 10);
        assert!(all.iter().any(|a| a.name == "a0"));
        assert!(all.iter().any(|a| a.name == "a9"));
    }

    #[test]
    fn dense_update_modifies_existing_entry_in_place() {
        let mut store = scratch_store();
        let header_address = objheader::create(&mut store, &[], Sizes::WRITE).unwrap();
        for i in 0..9 {
            write(&mut store, header_address, sample_attr(&format!("a{}", i), i), 8, Sizes::WRITE).unwrap();
        }
        write(&mut store, header_address, sample_attr("a0", 999), 8, Sizes::WRITE).unwrap();
        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        let a0 = get(&store, &header, "a0").unwrap();
        assert_eq!(a0.data, 999i32.to_le_bytes().to_vec());
    }

    #[test]
    fn compact_delete_nils_the_message_and_is_no_longer_listed() {
        let mut store = scratch_store();
        let header_address = objheader::create(&mut store, &[], Sizes::WRITE).unwrap();
        for i in 0..5 {
            write(&mut store, header_address, sample_attr(&format!("a{}", i), i), 8, Sizes::WRITE).unwrap();
        }
        delete(&mut store, header_address, "a2", Sizes::WRITE).unwrap();
        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(list(&store, &header).unwrap().len(), 4);
        assert!(matches!(get(&store, &header, "a2"), Err(Error::NotFound { .. })));
        assert!(matches!(
            delete(&mut store, header_address, "a2", Sizes::WRITE),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn missing_attribute_is_not_found() {
        let mut store = scratch_store();
        let header_address = objheader::create(&mut store, &[], Sizes::WRITE).unwrap();
        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        assert!(matches!(get(&store, &header, "nope"), Err(Error::NotFound { .. })));
    }
}
