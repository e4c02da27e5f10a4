//! L6: dataset I/O (spec.md §4.7).
//!
//! Every operation decodes the object header, then dispatches on its
//! `DataLayout` variant (Compact/Contiguous/Chunked). Chunked storage,
//! partial reads, and all writes are built against spec.md §4.7 on top of
//! `message::DataLayout`, `index::btree1`'s chunk B-tree, `selection::
//! Hyperslab`, and `filter`'s codec pipeline.

use crate::error::{Error, Result};
use crate::filter;
use crate::index::btree1::{self, ChunkEntry, ChunkRecord};
use crate::message::{
    encode_data_layout, encode_dataspace, DataLayout, Dataspace, Datatype, FillValue,
    FilterPipeline,
};
use crate::objheader::{self, Message, MessageFlags};
use crate::selection::{self, Hyperslab};
use crate::sizes::Sizes;
use crate::store::ByteStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn require_dataspace(header: &objheader::ObjectHeader) -> Result<Dataspace> {
    header
        .find_dataspace()
        .cloned()
        .ok_or_else(|| Error::NotFound { what: "dataspace message".into() })
}

fn require_datatype(header: &objheader::ObjectHeader) -> Result<Datatype> {
    header
        .find_datatype()
        .cloned()
        .ok_or_else(|| Error::NotFound { what: "datatype message".into() })
}

fn require_layout(header: &objheader::ObjectHeader) -> Result<DataLayout> {
    header
        .find_data_layout()
        .cloned()
        .ok_or_else(|| Error::NotFound { what: "data layout message".into() })
}

/// `element_size` zero-filled bytes repeated `count` times, or the declared
/// fill value if one is set and matches the element size, per spec.md
/// §4.7's "a chunk absent from the index reads back as the dataset's fill
/// value".
fn fill_buffer(fill_value: Option<&FillValue>, element_size: usize, count: usize) -> Vec<u8> {
    match fill_value {
        Some(fv) if fv.defined && fv.bytes.len() == element_size => fv.bytes.repeat(count),
        _ => vec![0u8; element_size * count],
    }
}

/// Object-header message bodies are always stored padded out to a multiple
/// of 8 bytes (`objheader::encode_v1_record`); `rewrite_message_body`
/// requires the replacement to match that stored length exactly, so every
/// body rebuilt here needs the same padding re-applied before the call.
fn pad_to_record(mut body: Vec<u8>) -> Vec<u8> {
    while body.len() % 8 != 0 {
        body.push(0);
    }
    body
}

fn chunk_entry_from_record(record: &ChunkRecord) -> ChunkEntry {
    let mut scaled_coord = record.scaled.clone();
    scaled_coord.push(0); // trailing sentinel, per index::btree1's chunk key layout
    ChunkEntry {
        key: btree1::ChunkKey {
            chunk_size: record.nbytes,
            filter_mask: record.filter_mask,
            scaled_coord,
        },
        child_address: record.address,
    }
}

/// Cartesian product of `ranges` (one inclusive `(first, last)` pair per
/// dimension), calling `f` once per scaled chunk coordinate.
fn for_each_scaled(ranges: &[(u64, u64)], f: &mut impl FnMut(&[u64]) -> Result<()>) -> Result<()> {
    let mut coord = vec![0u64; ranges.len()];
    for_each_scaled_dim(ranges, 0, &mut coord, f)
}

fn for_each_scaled_dim(
    ranges: &[(u64, u64)],
    dim: usize,
    coord: &mut Vec<u64>,
    f: &mut impl FnMut(&[u64]) -> Result<()>,
) -> Result<()> {
    if dim == ranges.len() {
        return f(coord);
    }
    for v in ranges[dim].0..=ranges[dim].1 {
        coord[dim] = v;
        for_each_scaled_dim(ranges, dim + 1, coord, f)?;
    }
    Ok(())
}

// ------------------------------------------------------------------- Reads

/// Read the whole dataset.
pub fn read_all(store: &ByteStore, header_address: u64, sizes: Sizes) -> Result<Vec<u8>> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    read_hyperslab(store, header_address, sizes, &Hyperslab::whole(&dataspace.dims))
}

/// Read a plain `(start, count)` slice, per spec.md §4.7.
pub fn read_slice(
    store: &ByteStore,
    header_address: u64,
    sizes: Sizes,
    start: Vec<u64>,
    count: Vec<u64>,
) -> Result<Vec<u8>> {
    read_hyperslab(store, header_address, sizes, &Hyperslab::slice(start, count))
}

/// Read an arbitrary hyperslab selection, dispatching on layout class.
pub fn read_hyperslab(
    store: &ByteStore,
    header_address: u64,
    sizes: Sizes,
    selection: &Hyperslab,
) -> Result<Vec<u8>> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    let datatype = require_datatype(&header)?;
    let layout = require_layout(&header)?;
    selection.validate(&dataspace.dims)?;

    let element_size = datatype.size as usize;
    let mut dest = vec![0u8; selection.output_size() as usize * element_size];
    let zero_origin = vec![0u64; dataspace.dims.len()];

    match &layout {
        DataLayout::Compact { data } => {
            selection::extract(selection, &zero_origin, &dataspace.dims, element_size, data, &mut dest);
        }
        DataLayout::Contiguous { address, .. } => {
            if selection.is_contiguous(&dataspace.dims) {
                let offset = *address + selection::linear_index(&selection.start, &dataspace.dims) * element_size as u64;
                let bytes = store.read(offset, dest.len())?;
                dest.copy_from_slice(bytes);
            } else {
                let total = dataspace.dims.iter().product::<u64>() as usize * element_size;
                let whole = store.read(*address, total)?;
                selection::extract(selection, &zero_origin, &dataspace.dims, element_size, whole, &mut dest);
            }
        }
        DataLayout::Chunked { chunk_dims, btree_address } => {
            read_chunked(
                store,
                header.find_filter_pipeline(),
                header.find_fill_value(),
                &dataspace.dims,
                chunk_dims,
                *btree_address,
                element_size,
                selection,
                &mut dest,
            )?;
        }
    }
    Ok(dest)
}

#[allow(clippy::too_many_arguments)]
fn read_chunked(
    store: &ByteStore,
    filters: Option<&FilterPipeline>,
    fill_value: Option<&FillValue>,
    dims: &[u64],
    chunk_dims: &[u64],
    btree_address: u64,
    element_size: usize,
    selection: &Hyperslab,
    dest: &mut [u8],
) -> Result<()> {
    let rank = dims.len();
    let records = btree1::enumerate_chunks(store, btree_address, rank)?;
    let by_scaled: HashMap<Vec<u64>, ChunkRecord> =
        records.into_iter().map(|r| (r.scaled.clone(), r)).collect();

    let ranges = selection.chunk_index_range(chunk_dims, dims);
    let chunk_elements: u64 = chunk_dims.iter().product();

    for_each_scaled(&ranges, &mut |scaled: &[u64]| -> Result<()> {
        let origin: Vec<u64> = scaled.iter().zip(chunk_dims).map(|(s, c)| s * c).collect();

        let buffer = match by_scaled.get(scaled) {
            Some(record) => {
                let raw = store.read(record.address, record.nbytes as usize)?.to_vec();
                match filters {
                    Some(pipeline) => filter::apply_inverse(pipeline, &raw)?,
                    None => raw,
                }
            }
            None => fill_buffer(fill_value, element_size, chunk_elements as usize),
        };

        selection::extract(selection, &origin, chunk_dims, element_size, &buffer, dest);
        Ok(())
    })
}

// ------------------------------------------------------------------ Writes

/// Overwrite the whole dataset.
pub fn write_all(store: &mut ByteStore, header_address: u64, sizes: Sizes, data: &[u8]) -> Result<()> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    write_hyperslab(store, header_address, sizes, &Hyperslab::whole(&dataspace.dims), data)
}

/// Overwrite the elements covered by `selection` with `data`, per spec.md
/// §4.7. Compact/Contiguous storage is read-modify-written in place;
/// Chunked storage touches only the chunks the selection overlaps, relocating
/// each rewritten chunk per this crate's no-reclaim allocator policy.
pub fn write_hyperslab(
    store: &mut ByteStore,
    header_address: u64,
    sizes: Sizes,
    selection: &Hyperslab,
    data: &[u8],
) -> Result<()> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    let datatype = require_datatype(&header)?;
    let layout = require_layout(&header)?;
    selection.validate(&dataspace.dims)?;

    let element_size = datatype.size as usize;
    let expected_len = selection.output_size() as usize * element_size;
    if data.len() != expected_len {
        return Err(Error::Truncated { offset: 0, wanted: expected_len, available: data.len() });
    }
    let zero_origin = vec![0u64; dataspace.dims.len()];

    match &layout {
        DataLayout::Compact { data: existing } => {
            let mut buffer = existing.clone();
            selection::scatter(selection, &zero_origin, &dataspace.dims, element_size, data, &mut buffer);
            let new_body = encode_data_layout(&DataLayout::Compact { data: buffer }, sizes);
            objheader::rewrite_message_body(
                store,
                header_address,
                sizes,
                |m| matches!(m, Message::DataLayout(_)),
                &new_body,
            )?;
        }
        DataLayout::Contiguous { address, size } => {
            let mut buffer = store.read(*address, *size as usize)?.to_vec();
            selection::scatter(selection, &zero_origin, &dataspace.dims, element_size, data, &mut buffer);
            store.write(*address, &buffer)?;
        }
        DataLayout::Chunked { chunk_dims, btree_address } => {
            write_chunked(
                store,
                header_address,
                sizes,
                header.find_filter_pipeline(),
                header.find_fill_value(),
                &dataspace.dims,
                chunk_dims,
                *btree_address,
                element_size,
                selection,
                data,
            )?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_chunked(
    store: &mut ByteStore,
    header_address: u64,
    sizes: Sizes,
    filters: Option<&FilterPipeline>,
    fill_value: Option<&FillValue>,
    dims: &[u64],
    chunk_dims: &[u64],
    btree_address: u64,
    element_size: usize,
    selection: &Hyperslab,
    data: &[u8],
) -> Result<()> {
    let rank = dims.len();
    let records = btree1::enumerate_chunks(store, btree_address, rank)?;
    let mut by_scaled: HashMap<Vec<u64>, ChunkRecord> =
        records.into_iter().map(|r| (r.scaled.clone(), r)).collect();

    let ranges = selection.chunk_index_range(chunk_dims, dims);
    let chunk_elements: u64 = chunk_dims.iter().product();

    for_each_scaled(&ranges, &mut |scaled: &[u64]| -> Result<()> {
        let origin: Vec<u64> = scaled.iter().zip(chunk_dims).map(|(s, c)| s * c).collect();

        let mut buffer = match by_scaled.get(scaled) {
            Some(record) => {
                let raw = store.read(record.address, record.nbytes as usize)?.to_vec();
                match filters {
                    Some(pipeline) => filter::apply_inverse(pipeline, &raw)?,
                    None => raw,
                }
            }
            None => fill_buffer(fill_value, element_size, chunk_elements as usize),
        };

        selection::scatter(selection, &origin, chunk_dims, element_size, data, &mut buffer);

        let encoded = match filters {
            Some(pipeline) => filter::apply_forward(pipeline, &buffer)?,
            None => buffer,
        };
        let new_address = store.allocate(encoded.len() as u64)?;
        store.write(new_address, &encoded)?;

        by_scaled.insert(
            scaled.to_vec(),
            ChunkRecord { scaled: scaled.to_vec(), address: new_address, nbytes: encoded.len() as u32, filter_mask: 0 },
        );
        Ok(())
    })?;

    let entries: Vec<ChunkEntry> = by_scaled.values().map(chunk_entry_from_record).collect();
    let node_bytes = btree1::encode_chunk_node(&entries);
    let new_node_address = store.allocate(node_bytes.len() as u64)?;
    store.write(new_node_address, &node_bytes)?;

    let new_layout = DataLayout::Chunked { chunk_dims: chunk_dims.to_vec(), btree_address: new_node_address };
    let new_body = pad_to_record(encode_data_layout(&new_layout, sizes));
    objheader::rewrite_message_body(
        store,
        header_address,
        sizes,
        |m| matches!(m, Message::DataLayout(_)),
        &new_body,
    )?;
    Ok(())
}

// ------------------------------------------------------------------ Create

/// Which on-disk representation a newly created dataset should use.
pub enum LayoutKind {
    Compact,
    Contiguous,
    Chunked { chunk_dims: Vec<u64> },
}

pub struct DatasetSpec {
    pub dataspace: Dataspace,
    pub datatype: Datatype,
    pub layout: LayoutKind,
    pub filters: Option<FilterPipeline>,
    pub fill_value: Option<Vec<u8>>,
}

/// Create a new dataset object header with the requested layout, per
/// spec.md §4.7. Chunked/Contiguous storage starts out entirely
/// fill-value-filled (Chunked: an empty chunk index, every chunk absent);
/// Compact storage is materialized inline immediately.
pub fn create(store: &mut ByteStore, sizes: Sizes, spec: DatasetSpec) -> Result<u64> {
    let element_size = spec.datatype.size as u64;
    let total_elements: u64 = spec.dataspace.dims.iter().product();
    let fill_value_message =
        spec.fill_value.as_ref().map(|b| FillValue { defined: true, bytes: b.clone() });

    let layout = match &spec.layout {
        LayoutKind::Chunked { chunk_dims } => {
            let node_bytes = btree1::encode_chunk_node(&[]);
            let btree_address = store.allocate(node_bytes.len() as u64)?;
            store.write(btree_address, &node_bytes)?;
            DataLayout::Chunked { chunk_dims: chunk_dims.clone(), btree_address }
        }
        LayoutKind::Compact => {
            let bytes =
                fill_buffer(fill_value_message.as_ref(), element_size as usize, total_elements as usize);
            DataLayout::Compact { data: bytes }
        }
        LayoutKind::Contiguous => {
            let size = total_elements * element_size;
            let address = store.allocate(size)?;
            let bytes =
                fill_buffer(fill_value_message.as_ref(), element_size as usize, total_elements as usize);
            store.write(address, &bytes)?;
            DataLayout::Contiguous { address, size }
        }
    };

    let mut messages = vec![
        (Message::Dataspace(spec.dataspace), MessageFlags::default_writable()),
        (Message::Datatype(spec.datatype), MessageFlags::default_writable()),
        (Message::DataLayout(layout), MessageFlags::default_writable()),
    ];
    if let Some(bytes) = spec.fill_value {
        messages.push((Message::FillValue(FillValue { defined: true, bytes }), MessageFlags::default_writable()));
    }
    if let Some(pipeline) = spec.filters {
        messages.push((Message::FilterPipeline(pipeline), MessageFlags::default_writable()));
    }

    objheader::create(store, &messages, sizes)
}

// ------------------------------------------------------------------ Resize

/// Change a dataset's extent in place, per spec.md §4.7. Growing a chunked
/// or contiguous dataset leaves the new region fill-value-filled; shrinking
/// drops trailing chunks from the index (Chunked) or simply stops
/// addressing the tail (Contiguous/Compact) without reclaiming their bytes,
/// per this crate's no-reclaim allocator policy (spec.md §9).
pub fn resize(store: &mut ByteStore, header_address: u64, sizes: Sizes, new_dims: Vec<u64>) -> Result<()> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    let datatype = require_datatype(&header)?;
    let layout = require_layout(&header)?;

    if new_dims.len() != dataspace.dims.len() {
        return Err(Error::RankMismatch { selection_rank: new_dims.len(), dataspace_rank: dataspace.dims.len() });
    }
    let element_size = datatype.size as usize;

    match &layout {
        DataLayout::Chunked { chunk_dims, btree_address } => {
            let rank = dataspace.dims.len();
            let records = btree1::enumerate_chunks(store, *btree_address, rank)?;
            let retained: Vec<ChunkRecord> = records
                .into_iter()
                .filter(|r| r.scaled.iter().zip(chunk_dims).zip(&new_dims).all(|((s, c), d)| s * c < *d))
                .collect();
            let entries: Vec<ChunkEntry> = retained.iter().map(chunk_entry_from_record).collect();
            let node_bytes = btree1::encode_chunk_node(&entries);
            let new_node_address = store.allocate(node_bytes.len() as u64)?;
            store.write(new_node_address, &node_bytes)?;

            let new_layout = DataLayout::Chunked { chunk_dims: chunk_dims.clone(), btree_address: new_node_address };
            let new_body = pad_to_record(encode_data_layout(&new_layout, sizes));
            objheader::rewrite_message_body(
                store,
                header_address,
                sizes,
                |m| matches!(m, Message::DataLayout(_)),
                &new_body,
            )?;
        }
        DataLayout::Contiguous { address, .. } => {
            let new_total = new_dims.iter().product::<u64>() * element_size as u64;
            let old_total = dataspace.dims.iter().product::<u64>() * element_size as u64;
            let new_address = store.allocate(new_total)?;
            let copy_len = old_total.min(new_total);
            if copy_len > 0 {
                let old_bytes = store.read(*address, copy_len as usize)?.to_vec();
                store.write(new_address, &old_bytes)?;
            }
            if new_total > copy_len {
                let extra_elements = (new_total - copy_len) as usize / element_size;
                let fill = fill_buffer(header.find_fill_value(), element_size, extra_elements);
                store.write(new_address + copy_len, &fill)?;
            }
            let new_layout = DataLayout::Contiguous { address: new_address, size: new_total };
            let new_body = pad_to_record(encode_data_layout(&new_layout, sizes));
            objheader::rewrite_message_body(
                store,
                header_address,
                sizes,
                |m| matches!(m, Message::DataLayout(_)),
                &new_body,
            )?;
        }
        DataLayout::Compact { data } => {
            let new_total = new_dims.iter().product::<u64>() as usize * element_size;
            let mut new_data = vec![0u8; new_total];
            let copy_len = data.len().min(new_total);
            new_data[..copy_len].copy_from_slice(&data[..copy_len]);
            if new_total > copy_len {
                let fill = fill_buffer(header.find_fill_value(), element_size, (new_total - copy_len) / element_size);
                new_data[copy_len..].copy_from_slice(&fill);
            }
            objheader::nil_out_message(store, header_address, sizes, |m| matches!(m, Message::DataLayout(_)))?;
            objheader::append_message(
                store,
                header_address,
                &Message::DataLayout(DataLayout::Compact { data: new_data }),
                MessageFlags::default_writable(),
                sizes,
            )?;
        }
    }

    let new_dataspace = Dataspace { dims: new_dims, max_dims: dataspace.max_dims.clone() };
    let new_body = pad_to_record(encode_dataspace(&new_dataspace));
    objheader::rewrite_message_body(
        store,
        header_address,
        sizes,
        |m| matches!(m, Message::Dataspace(_)),
        &new_body,
    )?;
    Ok(())
}

// -------------------------------------------------------- Cancellable iteration

/// A single atomic boolean the caller can flip from elsewhere to stop an
/// in-flight chunk iteration, per spec.md §5: "no cancellation primitives
/// are exposed" beyond this one poll-at-boundaries token.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Iterates a chunked dataset's chunks in scaled-coordinate (row-major)
/// order, one decoded buffer at a time, polling a `CancellationToken` at
/// each chunk boundary, per spec.md §5's cancellable chunk iterator.
pub struct ChunkIter<'a> {
    store: &'a ByteStore,
    chunks: HashMap<Vec<u64>, ChunkRecord>,
    filters: Option<FilterPipeline>,
    fill_value: Option<FillValue>,
    chunk_dims: Vec<u64>,
    ranges: Vec<(u64, u64)>,
    coord: Vec<u64>,
    element_size: usize,
    done: bool,
    token: CancellationToken,
}

impl<'a> ChunkIter<'a> {
    /// Fetch the next chunk's decoded bytes and its scaled coordinate, or
    /// `None` once every chunk has been visited. Returns `Err(Cancelled)`
    /// at the first boundary after the token is flipped.
    pub fn advance(&mut self) -> Result<Option<(Vec<u64>, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        if self.token.is_cancelled() {
            self.done = true;
            return Err(Error::Cancelled);
        }

        let scaled = self.coord.clone();
        let chunk_elements: u64 = self.chunk_dims.iter().product();
        let buffer = match self.chunks.get(&scaled) {
            Some(record) => {
                let raw = self.store.read(record.address, record.nbytes as usize)?.to_vec();
                match &self.filters {
                    Some(pipeline) => filter::apply_inverse(pipeline, &raw)?,
                    None => raw,
                }
            }
            None => fill_buffer(self.fill_value.as_ref(), self.element_size, chunk_elements as usize),
        };

        self.advance_coord();
        Ok(Some((scaled, buffer)))
    }

    fn advance_coord(&mut self) {
        if self.ranges.is_empty() {
            self.done = true;
            return;
        }
        for i in (0..self.ranges.len()).rev() {
            self.coord[i] += 1;
            if self.coord[i] <= self.ranges[i].1 {
                return;
            }
            self.coord[i] = self.ranges[i].0;
        }
        self.done = true;
    }
}

/// Build a `ChunkIter` over every chunk in the dataset's extent, in
/// row-major scaled-coordinate order.
pub fn iter_chunks<'a>(
    store: &'a ByteStore,
    header_address: u64,
    sizes: Sizes,
    token: CancellationToken,
) -> Result<ChunkIter<'a>> {
    let header = objheader::parse(store, header_address, sizes)?;
    let dataspace = require_dataspace(&header)?;
    let datatype = require_datatype(&header)?;
    let layout = require_layout(&header)?;

    let (chunk_dims, btree_address) = match layout {
        DataLayout::Chunked { chunk_dims, btree_address } => (chunk_dims, btree_address),
        _ => return Err(Error::NotFound { what: "chunked data layout".into() }),
    };

    let rank = dataspace.dims.len();
    let records = btree1::enumerate_chunks(store, btree_address, rank)?;
    let chunks: HashMap<Vec<u64>, ChunkRecord> = records.into_iter().map(|r| (r.scaled.clone(), r)).collect();
    let ranges: Vec<(u64, u64)> =
        (0..rank).map(|i| (0u64, (dataspace.dims[i] - 1) / chunk_dims[i])).collect();
    let coord = ranges.iter().map(|(first, _)| *first).collect();

    Ok(ChunkIter {
        store,
        chunks,
        filters: header.find_filter_pipeline().cloned(),
        fill_value: header.find_fill_value().cloned(),
        chunk_dims,
        ranges,
        coord,
        element_size: datatype.size as usize,
        done: false,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FilterDescriptor;

    fn scratch_store() -> ByteStore {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-dataset-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    fn i32_elements(n: i32) -> Vec<u8> {
        (0..n).flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn contiguous_round_trips_whole_dataset() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4, 3], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Contiguous,
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();

        let data = i32_elements(12);
        write_all(&mut store, header_address, Sizes::WRITE, &data).unwrap();
        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn contiguous_partial_hyperslab_overwrites_only_selected_row() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![3, 2], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Contiguous,
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();

        write_all(&mut store, header_address, Sizes::WRITE, &i32_elements(6)).unwrap();

        let row = Hyperslab::slice(vec![1, 0], vec![1, 2]);
        write_hyperslab(&mut store, header_address, Sizes::WRITE, &row, &[99i32.to_le_bytes(), 98i32.to_le_bytes()].concat())
            .unwrap();

        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        let elements: Vec<i32> = crate::selection::decode_elements(&back);
        assert_eq!(elements, vec![0, 1, 99, 98, 4, 5]);
    }

    #[test]
    fn chunked_write_then_read_round_trips_across_chunk_boundaries() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4, 4], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Chunked { chunk_dims: vec![2, 2] },
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();

        let data = i32_elements(16);
        write_all(&mut store, header_address, Sizes::WRITE, &data).unwrap();
        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn missing_chunk_reads_back_as_fill_value() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4, 4], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Chunked { chunk_dims: vec![2, 2] },
                filters: None,
                fill_value: Some(7i32.to_le_bytes().to_vec()),
            },
        )
        .unwrap();

        // Write only the top-left chunk; bottom-right chunk never written.
        let slab = Hyperslab::slice(vec![0, 0], vec![2, 2]);
        write_hyperslab(&mut store, header_address, Sizes::WRITE, &slab, &i32_elements(4)).unwrap();

        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        let elements: Vec<i32> = crate::selection::decode_elements(&back);
        assert_eq!(elements[3 * 4 + 3], 7);
        assert_eq!(elements[0], 0);
    }

    #[test]
    fn chunked_dataset_with_filters_round_trips() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4], max_dims: None };
        let pipeline = FilterPipeline {
            filters: vec![FilterDescriptor { filter_id: filter::FILTER_SHUFFLE, client_data: vec![4] }],
        };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Chunked { chunk_dims: vec![2] },
                filters: Some(pipeline),
                fill_value: None,
            },
        )
        .unwrap();

        let data = i32_elements(4);
        write_all(&mut store, header_address, Sizes::WRITE, &data).unwrap();
        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn resize_shrink_drops_trailing_chunk_without_reclaiming_bytes() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4, 4], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Chunked { chunk_dims: vec![2, 2] },
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();
        write_all(&mut store, header_address, Sizes::WRITE, &i32_elements(16)).unwrap();

        resize(&mut store, header_address, Sizes::WRITE, vec![2, 2]).unwrap();

        let header = objheader::parse(&store, header_address, Sizes::WRITE).unwrap();
        assert_eq!(header.find_dataspace().unwrap().dims, vec![2, 2]);
        let back = read_all(&store, header_address, Sizes::WRITE).unwrap();
        let elements: Vec<i32> = crate::selection::decode_elements(&back);
        assert_eq!(elements, vec![0, 1, 4, 5]);
    }

    #[test]
    fn compact_dataset_round_trips_and_resizes() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![3], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Compact,
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();

        write_all(&mut store, header_address, Sizes::WRITE, &i32_elements(3)).unwrap();
        assert_eq!(
            crate::selection::decode_elements::<i32>(&read_all(&store, header_address, Sizes::WRITE).unwrap()),
            vec![0, 1, 2]
        );

        resize(&mut store, header_address, Sizes::WRITE, vec![5]).unwrap();
        let elements: Vec<i32> =
            crate::selection::decode_elements(&read_all(&store, header_address, Sizes::WRITE).unwrap());
        assert_eq!(&elements[..3], &[0, 1, 2]);
    }

    #[test]
    fn chunk_iter_visits_every_chunk_and_respects_cancellation() {
        let mut store = scratch_store();
        let dataspace = Dataspace { dims: vec![4, 4], max_dims: None };
        let header_address = create(
            &mut store,
            Sizes::WRITE,
            DatasetSpec {
                dataspace,
                datatype: Datatype::fixed(4, true),
                layout: LayoutKind::Chunked { chunk_dims: vec![2, 2] },
                filters: None,
                fill_value: None,
            },
        )
        .unwrap();
        write_all(&mut store, header_address, Sizes::WRITE, &i32_elements(16)).unwrap();

        let token = CancellationToken::new();
        let mut iter = iter_chunks(&store, header_address, Sizes::WRITE, token.clone()).unwrap();
        let mut visited = 0;
        while let Some(_) = iter.advance().unwrap() {
            visited += 1;
        }
        assert_eq!(visited, 4);

        let mut iter = iter_chunks(&store, header_address, Sizes::WRITE, token.clone()).unwrap();
        token.cancel();
        assert!(matches!(iter.advance(), Err(Error::Cancelled)));
    }
}
