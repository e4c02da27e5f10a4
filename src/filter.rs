//! L6 helper: the filter pipeline's concrete codecs (spec.md §4.4/§4.7).
//!
//! `flate2` provides the deflate codec: a plain `Compress`/`Decompress` pair
//! around a byte buffer, no streaming needed since chunks are already fully
//! materialized in memory by the time a filter runs.

use crate::error::{Error, Result};
use crate::index::fletcher32;
use crate::message::{FilterDescriptor, FilterPipeline};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

fn deflate_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::FilterFailure { filter_id: FILTER_DEFLATE as u8, reason: e.to_string() })?;
    encoder
        .finish()
        .map_err(|e| Error::FilterFailure { filter_id: FILTER_DEFLATE as u8, reason: e.to_string() })
}

fn deflate_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder
        .write_all(data)
        .map_err(|e| Error::FilterFailure { filter_id: FILTER_DEFLATE as u8, reason: e.to_string() })?;
    decoder
        .finish()
        .map_err(|e| Error::FilterFailure { filter_id: FILTER_DEFLATE as u8, reason: e.to_string() })
}

fn shuffle_encode(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte_index in 0..element_size {
        for elem in 0..count {
            out[byte_index * count + elem] = data[elem * element_size + byte_index];
        }
    }
    out
}

fn shuffle_decode(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte_index in 0..element_size {
        for elem in 0..count {
            out[elem * element_size + byte_index] = data[byte_index * count + elem];
        }
    }
    out
}

fn fletcher32_encode(data: &[u8]) -> Vec<u8> {
    let checksum = fletcher32(data);
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(data);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

fn fletcher32_decode(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(Error::Truncated { offset: 0, wanted: 4, available: data.len() });
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = fletcher32(body);
    if expected != computed {
        return Err(Error::ChecksumMismatch { what: "chunk", offset: 0, expected, computed });
    }
    Ok(body.to_vec())
}

fn element_size_hint(descriptor: &FilterDescriptor) -> usize {
    descriptor.client_data.first().copied().unwrap_or(4) as usize
}

/// Run the pipeline forward (write path), in declared order, per spec.md
/// §4.4.
pub fn apply_forward(pipeline: &FilterPipeline, data: &[u8]) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    for filter in &pipeline.filters {
        buf = match filter.filter_id {
            FILTER_DEFLATE => deflate_encode(&buf)?,
            FILTER_SHUFFLE => shuffle_encode(&buf, element_size_hint(filter)),
            FILTER_FLETCHER32 => fletcher32_encode(&buf),
            other => {
                return Err(Error::FilterFailure {
                    filter_id: other as u8,
                    reason: "unrecognised filter id".into(),
                })
            }
        };
    }
    Ok(buf)
}

/// Run the pipeline in reverse (read path), per spec.md §4.4.
pub fn apply_inverse(pipeline: &FilterPipeline, data: &[u8]) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    for filter in pipeline.filters.iter().rev() {
        buf = match filter.filter_id {
            FILTER_DEFLATE => deflate_decode(&buf)?,
            FILTER_SHUFFLE => shuffle_decode(&buf, element_size_hint(filter)),
            FILTER_FLETCHER32 => fletcher32_decode(&buf)?,
            other => {
                return Err(Error::FilterFailure {
                    filter_id: other as u8,
                    reason: "unrecognised filter id".into(),
                })
            }
        };
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_roundtrips() {
        let data: Vec<u8> = (0u8..32).collect();
        let shuffled = shuffle_encode(&data, 4);
        let back = shuffle_decode(&shuffled, 4);
        assert_eq!(back, data);
    }

    #[test]
    fn fletcher32_filter_roundtrips_and_detects_corruption() {
        let data = b"some chunk payload".to_vec();
        let encoded = fletcher32_encode(&data);
        let decoded = fletcher32_decode(&encoded).unwrap();
        assert_eq!(decoded, data);

        let mut corrupted = encoded.clone();
        corrupted[0] ^= 0xFF;
        assert!(fletcher32_decode(&corrupted).is_err());
    }

    #[test]
    fn deflate_roundtrips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbb".to_vec();
        let encoded = deflate_encode(&data).unwrap();
        let decoded = deflate_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn pipeline_forward_then_inverse_roundtrips() {
        let pipeline = FilterPipeline {
            filters: vec![
                FilterDescriptor { filter_id: FILTER_SHUFFLE, client_data: vec![4] },
                FilterDescriptor { filter_id: FILTER_DEFLATE, client_data: vec![] },
                FilterDescriptor { filter_id: FILTER_FLETCHER32, client_data: vec![] },
            ],
        };
        let data: Vec<u8> = (0i32..20).flat_map(|v| v.to_le_bytes()).collect();
        let forward = apply_forward(&pipeline, &data).unwrap();
        let back = apply_inverse(&pipeline, &forward).unwrap();
        assert_eq!(back, data);
    }
}
