//! L1: superblock & global constants (spec.md §4.2).

use crate::error::{Error, Result};
use nom::bytes::streaming::tag;
use nom::error::{context, VerboseError};
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};
use nom::IResult;

pub const SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

type PResult<'a, O> = IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

/// Byte order of addressable file content. Only little-endian files are
/// produced or accepted, per spec.md §6; the field is kept on the struct so
/// callers have somewhere to look it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
}

/// The legacy (v0) symbol-table entry for the root group: a B-tree root plus
/// a local heap, in addition to the root group's own object-header address.
#[derive(Debug, Clone, Copy)]
pub struct RootSymbolTable {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    pub byte_order: ByteOrder,
    pub base_address: u64,
    pub end_of_file_address: u64,
    pub root_group_header_address: u64,
    /// Only populated for superblock version 0 (legacy symbol-table root).
    pub root_symbol_table: Option<RootSymbolTable>,
}

fn address<'a>(len: u8) -> impl Fn(&'a [u8]) -> PResult<'a, u64> {
    move |input| {
        nom::combinator::map_parser(nom::bytes::streaming::take(len), le_u64_sized(len))(input)
    }
}

fn le_u64_sized<'a>(len: u8) -> impl Fn(&'a [u8]) -> PResult<'a, u64> {
    move |input: &'a [u8]| {
        if len == 4 {
            let (rest, v) = le_u32(input)?;
            Ok((rest, v as u64))
        } else {
            le_u64(input)
        }
    }
}

/// Parse the superblock beginning at offset 0 (after verifying the 8-byte
/// signature). Dispatches on the version byte per spec.md §4.2.
pub fn parse(input: &[u8]) -> Result<(usize, Superblock)> {
    let total_len = input.len();
    let (rest, _) = context("signature", tag(SIGNATURE.as_slice()))(input)
        .map_err(|_: nom::Err<VerboseError<&[u8]>>| Error::BadSignature { offset: 0 })?;
    let (rest, version) =
        le_u8::<_, VerboseError<&[u8]>>(rest).map_err(|_| Error::Truncated {
            offset: 8,
            wanted: 1,
            available: 0,
        })?;
    let sb = match version {
        0 => parse_v0(rest)?,
        2 | 3 => parse_v2_v3(rest, version)?,
        other => {
            return Err(Error::UnsupportedVersion {
                what: "superblock",
                version: other,
            })
        }
    };
    if sb.root_group_header_address >= total_len as u64 && sb.root_group_header_address != u64::MAX
    {
        return Err(Error::InvalidAddress {
            what: "root group header",
            address: sb.root_group_header_address,
            file_size: total_len as u64,
        });
    }
    // consumed length is not tracked precisely (streaming parser); callers
    // only care about the parsed struct.
    Ok((total_len, sb))
}

fn parse_v0(input: &[u8]) -> Result<Superblock> {
    let parse_inner = |input: &[u8]| -> PResult<Superblock> {
        let (input, _free_space_storage_version) = le_u8(input)?;
        let (input, _root_group_symbol_table_entry_version) = le_u8(input)?;
        let (input, _reserved) = tag([0])(input)?;
        let (input, _shared_header_message_format_version) = le_u8(input)?;
        let (input, offset_size) = le_u8(input)?;
        let (input, length_size) = le_u8(input)?;
        let (input, _reserved) = tag([0])(input)?;
        let (input, _group_leaf_node_k) = le_u16(input)?;
        let (input, _group_internal_node_k) = le_u16(input)?;
        let (input, _file_consistency_flags) = le_u32(input)?;
        let (input, base_address) = address(offset_size)(input)?;
        let (input, _address_of_file_free_space_info) = address(offset_size)(input)?;
        let (input, end_of_file_address) = address(offset_size)(input)?;
        let (input, _driver_information_block_address) = address(offset_size)(input)?;
        // root group symbol table entry
        let (input, link_name_offset) = address(offset_size)(input)?;
        let (input, object_header_address) = address(offset_size)(input)?;
        let (input, _cache_type) = le_u32(input)?;
        let (input, _reserved4) = tag([0, 0, 0, 0])(input)?;
        let (input, btree_address) = address(offset_size)(input)?;
        let (input, local_heap_address) = address(offset_size)(input)?;
        let _ = link_name_offset;

        Ok((
            input,
            Superblock {
                version: 0,
                offset_size,
                length_size,
                byte_order: ByteOrder::Little,
                base_address,
                end_of_file_address,
                root_group_header_address: object_header_address,
                root_symbol_table: Some(RootSymbolTable {
                    btree_address,
                    local_heap_address,
                }),
            },
        ))
    };
    let (_, sb) = parse_inner(input)?;
    Ok(sb)
}

fn parse_v2_v3(input: &[u8], version: u8) -> Result<Superblock> {
    let parse_inner = |input: &[u8]| -> PResult<Superblock> {
        let (input, offset_size) = le_u8(input)?;
        let (input, length_size) = le_u8(input)?;
        let (input, _file_consistency_flags) = le_u8(input)?;
        let (input, base_address) = address(offset_size)(input)?;
        let (input, _superblock_extension_address) = address(offset_size)(input)?;
        let (input, end_of_file_address) = address(offset_size)(input)?;
        let (input, root_group_header_address) = address(offset_size)(input)?;
        let (input, _checksum) = le_u32(input)?;

        Ok((
            input,
            Superblock {
                version,
                offset_size,
                length_size,
                byte_order: ByteOrder::Little,
                base_address,
                end_of_file_address,
                root_group_header_address,
                root_symbol_table: None,
            },
        ))
    };
    let (_, sb) = parse_inner(input)?;
    Ok(sb)
}

/// Encode a superblock. Always emits the v2 layout (the simplest modern
/// shape); there is no reason for a writer to ever emit v0 or v3.
pub fn encode(offset_size: u8, length_size: u8, eof_address: u64, root_header_address: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + 4 * offset_size as usize);
    out.extend_from_slice(SIGNATURE.as_slice());
    out.push(2); // version
    out.push(offset_size);
    out.push(length_size);
    out.push(0); // file consistency flags
    push_address(&mut out, offset_size, 0); // base address
    push_address(&mut out, offset_size, u64::MAX); // no superblock extension
    push_address(&mut out, offset_size, eof_address);
    push_address(&mut out, offset_size, root_header_address);
    let checksum = crate::index::fletcher32(&out[8..]);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

fn push_address(out: &mut Vec<u8>, size: u8, value: u64) {
    if size == 4 {
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_signature_is_rejected() {
        let bytes = [0u8; 16];
        assert!(matches!(parse(&bytes), Err(Error::BadSignature { .. })));
    }

    #[test]
    fn v2_roundtrips_addresses() {
        let encoded = encode(8, 8, 4096, 96);
        let (_, sb) = parse(&encoded).unwrap();
        assert_eq!(sb.version, 2);
        assert_eq!(sb.offset_size, 8);
        assert_eq!(sb.end_of_file_address, 4096);
        assert_eq!(sb.root_group_header_address, 96);
    }

    #[test]
    fn out_of_range_root_group_address_is_rejected() {
        let encoded = encode(8, 8, 4096, 1_000_000);
        assert!(matches!(
            parse(&encoded),
            Err(Error::InvalidAddress { what: "root group header", .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut encoded = encode(8, 8, 4096, 96);
        encoded[8] = 1; // mutate version byte to the unsupported v1
        assert!(matches!(
            parse(&encoded),
            Err(Error::UnsupportedVersion { version: 1, .. })
        ));
    }
}
