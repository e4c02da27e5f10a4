//! Global Heap (spec.md §4.5/§6): a file-wide blob arena for
//! variable-length datatype payloads, addressed by `(collection address,
//! object index)` pairs.
//!
//! The reader decodes the `GCOL` signature and its slot shape, exposing
//! both a single Nth-item lookup and the whole collection; a writer adds
//! new collections.

use crate::error::{Error, Result};
use crate::store::ByteStore;

const SIGNATURE: &[u8; 4] = b"GCOL";
const COLLECTION_HEADER_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct GlobalHeapObject {
    pub index: u16,
    pub refcount: u16,
    pub bytes: Vec<u8>,
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Parse every object slot out of a collection at `address`.
pub fn load_collection(store: &ByteStore, address: u64) -> Result<Vec<GlobalHeapObject>> {
    let header = store.read(address, COLLECTION_HEADER_LEN)?;
    if &header[0..4] != SIGNATURE {
        return Err(Error::Parse("bad global heap collection signature".into()));
    }
    let version = header[4];
    if version != 1 {
        return Err(Error::UnsupportedVersion { what: "global heap collection", version });
    }
    let collection_size = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;
    let body = store.read(address, collection_size)?;
    let mut objects = Vec::new();
    let mut pos = COLLECTION_HEADER_LEN;
    while pos + 16 <= body.len() {
        let index = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap());
        if index == 0 {
            // The null object marks the start of the collection's free
            // space; nothing more to read.
            break;
        }
        let refcount = u16::from_le_bytes(body[pos + 2..pos + 4].try_into().unwrap());
        let size = u64::from_le_bytes(body[pos + 8..pos + 16].try_into().unwrap()) as usize;
        let data_start = pos + 16;
        let data_end = data_start + size;
        if data_end > body.len() {
            break;
        }
        objects.push(GlobalHeapObject {
            index,
            refcount,
            bytes: body[data_start..data_end].to_vec(),
        });
        pos = data_start + pad8(size);
    }
    Ok(objects)
}

/// Fetch a single object by index, per spec.md §4.5's `get`.
pub fn get(store: &ByteStore, collection_address: u64, index: u16) -> Result<Vec<u8>> {
    let objects = load_collection(store, collection_address)?;
    objects
        .into_iter()
        .find(|o| o.index == index)
        .map(|o| o.bytes)
        .ok_or(Error::NotFound { what: format!("global heap object {}", index) })
}

fn encode_collection(objects: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
    let mut body_len = COLLECTION_HEADER_LEN;
    for (_, _, bytes) in objects {
        body_len += 16 + pad8(bytes.len());
    }
    body_len += 16; // trailing null object terminator

    let mut out = Vec::with_capacity(body_len);
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(1); // version
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(body_len as u64).to_le_bytes());
    for (index, refcount, bytes) in objects {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&refcount.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(bytes);
        let padding = pad8(bytes.len()) - bytes.len();
        out.extend(std::iter::repeat(0u8).take(padding));
    }
    // null terminator object
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&0u64.to_le_bytes());
    out
}

/// Allocate a brand-new single-object collection holding `bytes`, and
/// return `(collection_address, object_index)`.
pub fn insert(store: &mut ByteStore, bytes: &[u8]) -> Result<(u64, u16)> {
    let index = 1u16;
    let encoded = encode_collection(&[(index, 1, bytes.to_vec())]);
    let address = store.allocate(encoded.len() as u64)?;
    store.write(address, &encoded)?;
    Ok((address, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-gheap-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut store = scratch_store();
        let (addr, idx) = insert(&mut store, b"variable length blob").unwrap();
        assert_eq!(get(&store, addr, idx).unwrap(), b"variable length blob");
    }
}
