//! L2: object headers (spec.md §4.2/§4.3).
//!
//! Two historical representations exist side by side, exactly as real HDF5
//! files do: version 1 (the flat 16-byte-prefixed record list) and version 2
//! (the `OHDR`-signed, Fletcher32-checksummed chunk format). Both are parsed
//! and both can be emitted (`create`/`append_message` for v1,
//! `create_v2`/`append_message_v2` for v2); this crate's own object-creation
//! call sites (`dataset.rs`, `group.rs`, `attribute.rs`) all choose v1, which
//! needs no checksum maintenance on every append.
//! Continuations are chained, never rewritten in place: the writer reserves
//! `CONT_RESERVE` (or its v2 equivalent) bytes of slack at the tail of every
//! block it creates so a later continuation message can always be appended
//! without moving anything already on disk.

use crate::error::{Error, Result};
use crate::index::fletcher32;
use crate::message::*;
use crate::sizes::{parse_sized, Sizes};
use crate::store::ByteStore;
use nom::error::VerboseError;
use nom::number::streaming::{le_u16, le_u32};

const V1_PREFIX_LEN: usize = 16;
const V1_RECORD_HEADER_LEN: usize = 8;
const V2_SIGNATURE: &[u8; 4] = b"OHDR";
const V2_CONT_SIGNATURE: &[u8; 4] = b"OCHK";

/// Bytes reserved at the end of every block/chunk the writer creates, sized
/// to fit exactly one Continuation message record, so a future
/// continuation can be appended without relocating the block.
const CONT_RESERVE: u64 = (V1_RECORD_HEADER_LEN + 16) as u64;

pub const MSG_NIL: u16 = 0x0000;
pub const MSG_DATASPACE: u16 = 0x0001;
pub const MSG_LINK_INFO: u16 = 0x0002;
pub const MSG_DATATYPE: u16 = 0x0003;
pub const MSG_FILL_VALUE: u16 = 0x0005;
pub const MSG_LINK: u16 = 0x0006;
pub const MSG_DATA_LAYOUT: u16 = 0x0008;
pub const MSG_GROUP_INFO: u16 = 0x000A;
pub const MSG_FILTER_PIPELINE: u16 = 0x000B;
pub const MSG_ATTRIBUTE: u16 = 0x000C;
pub const MSG_OBJECT_COMMENT: u16 = 0x000D;
pub const MSG_CONTINUATION: u16 = 0x0010;
pub const MSG_SYMBOL_TABLE: u16 = 0x0011;
pub const MSG_MODIFICATION_TIME: u16 = 0x0012;
pub const MSG_ATTRIBUTE_INFO: u16 = 0x0015;
pub const MSG_OBJECT_REFERENCE_COUNT: u16 = 0x0016;

#[derive(Debug, Clone)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo { fractal_heap_address: Option<u64> },
    Datatype(Datatype),
    FillValue(FillValue),
    Link(Link),
    DataLayout(DataLayout),
    GroupInfo { max_compact_links: Option<u16> },
    FilterPipeline(FilterPipeline),
    Attribute(Attribute),
    ObjectComment(String),
    SymbolTable(SymbolTable),
    ObjectModificationTime(u32),
    AttributeInfo(AttributeInfo),
    ObjectReferenceCount(u32),
    /// A message type this crate does not model; preserved verbatim so a
    /// round trip through this library never drops data it does not
    /// understand (spec.md §4.3: "unknown optional messages are preserved
    /// verbatim").
    Unknown { message_type: u16, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFlags {
    pub constant: bool,
    pub shared: bool,
    pub fail_if_unknown_and_writable: bool,
}

impl MessageFlags {
    fn from_byte(b: u8) -> Self {
        MessageFlags {
            constant: b & 0x01 != 0,
            shared: b & 0x02 != 0,
            fail_if_unknown_and_writable: b & 0x04 != 0,
        }
    }

    fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.constant {
            b |= 0x01;
        }
        if self.shared {
            b |= 0x02;
        }
        if self.fail_if_unknown_and_writable {
            b |= 0x04;
        }
        b
    }

    pub fn default_writable() -> Self {
        MessageFlags { constant: false, shared: false, fail_if_unknown_and_writable: false }
    }
}

#[derive(Debug, Clone)]
pub struct HeaderMessage {
    pub flags: MessageFlags,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub address: u64,
    pub version: u8,
    pub reference_count: u32,
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn find_dataspace(&self) -> Option<&Dataspace> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::Dataspace(d) => Some(d),
            _ => None,
        })
    }

    pub fn find_datatype(&self) -> Option<&Datatype> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::Datatype(d) => Some(d),
            _ => None,
        })
    }

    pub fn find_data_layout(&self) -> Option<&DataLayout> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::DataLayout(d) => Some(d),
            _ => None,
        })
    }

    pub fn find_filter_pipeline(&self) -> Option<&FilterPipeline> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::FilterPipeline(f) => Some(f),
            _ => None,
        })
    }

    pub fn find_symbol_table(&self) -> Option<&SymbolTable> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::SymbolTable(s) => Some(s),
            _ => None,
        })
    }

    pub fn find_fill_value(&self) -> Option<&FillValue> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::FillValue(f) => Some(f),
            _ => None,
        })
    }

    pub fn find_attribute_info(&self) -> Option<&AttributeInfo> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::AttributeInfo(a) => Some(a),
            _ => None,
        })
    }

    pub fn attributes(&self) -> Vec<&Attribute> {
        self.messages
            .iter()
            .filter_map(|m| match &m.message {
                Message::Attribute(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn links(&self) -> Vec<&Link> {
        self.messages
            .iter()
            .filter_map(|m| match &m.message {
                Message::Link(l) => Some(l),
                _ => None,
            })
            .collect()
    }
}

fn decode_message(message_type: u16, body: &[u8], sizes: Sizes) -> Result<Message> {
    Ok(match message_type {
        MSG_NIL => Message::Nil,
        MSG_DATASPACE => Message::Dataspace(parse_dataspace(body)?),
        MSG_DATATYPE => Message::Datatype(parse_datatype(body)?),
        MSG_FILL_VALUE => Message::FillValue(parse_fill_value(body)?),
        MSG_LINK => Message::Link(parse_link(body, sizes)?),
        MSG_DATA_LAYOUT => Message::DataLayout(parse_data_layout(body, sizes)?),
        MSG_FILTER_PIPELINE => Message::FilterPipeline(parse_filter_pipeline(body)?),
        MSG_ATTRIBUTE => Message::Attribute(parse_attribute(body, body.len())?),
        MSG_OBJECT_COMMENT => {
            let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
            Message::ObjectComment(String::from_utf8(body[..end].to_vec())?)
        }
        MSG_SYMBOL_TABLE => Message::SymbolTable(parse_symbol_table(body, sizes)?),
        MSG_MODIFICATION_TIME => {
            let (_, seconds) = le_u32::<_, VerboseError<&[u8]>>(&body[4..8])?;
            Message::ObjectModificationTime(seconds)
        }
        MSG_ATTRIBUTE_INFO => Message::AttributeInfo(parse_attribute_info(body, sizes)?),
        MSG_OBJECT_REFERENCE_COUNT => {
            let (_, count) = le_u32::<_, VerboseError<&[u8]>>(&body[0..4])?;
            Message::ObjectReferenceCount(count)
        }
        MSG_LINK_INFO => {
            let flags = body[1];
            let fractal_heap_address = if flags & 0x02 != 0 {
                let (_, addr) = parse_sized(&body[2..], sizes.offset_size)?;
                Some(addr)
            } else {
                None
            };
            Message::LinkInfo { fractal_heap_address }
        }
        MSG_GROUP_INFO => {
            let flags = body[1];
            let max_compact_links = if flags & 0x01 != 0 {
                let (_, v) = le_u16::<_, VerboseError<&[u8]>>(&body[2..4])?;
                Some(v)
            } else {
                None
            };
            Message::GroupInfo { max_compact_links }
        }
        other => Message::Unknown { message_type: other, data: body.to_vec() },
    })
}

fn encode_message(message: &Message, sizes: Sizes) -> (u16, Vec<u8>) {
    match message {
        Message::Nil => (MSG_NIL, Vec::new()),
        Message::Dataspace(d) => (MSG_DATASPACE, encode_dataspace(d)),
        Message::Datatype(d) => (MSG_DATATYPE, encode_datatype(d)),
        Message::FillValue(f) => (MSG_FILL_VALUE, encode_fill_value(f)),
        Message::Link(l) => (MSG_LINK, encode_link(l, sizes)),
        Message::DataLayout(d) => (MSG_DATA_LAYOUT, encode_data_layout(d, sizes)),
        Message::FilterPipeline(f) => (MSG_FILTER_PIPELINE, encode_filter_pipeline(f)),
        Message::Attribute(a) => (MSG_ATTRIBUTE, encode_attribute(a)),
        Message::ObjectComment(s) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            (MSG_OBJECT_COMMENT, bytes)
        }
        Message::SymbolTable(s) => (MSG_SYMBOL_TABLE, encode_symbol_table(s, sizes)),
        Message::ObjectModificationTime(seconds) => {
            let mut out = vec![1u8, 0, 0, 0];
            out.extend_from_slice(&seconds.to_le_bytes());
            (MSG_MODIFICATION_TIME, out)
        }
        Message::AttributeInfo(a) => (MSG_ATTRIBUTE_INFO, encode_attribute_info(a, sizes)),
        Message::ObjectReferenceCount(count) => {
            (MSG_OBJECT_REFERENCE_COUNT, count.to_le_bytes().to_vec())
        }
        Message::LinkInfo { fractal_heap_address } => {
            let mut out = vec![0u8, if fractal_heap_address.is_some() { 0x02 } else { 0x00 }];
            if let Some(addr) = fractal_heap_address {
                out.extend_from_slice(&sizes.address_bytes(*addr));
            }
            (MSG_LINK_INFO, out)
        }
        Message::GroupInfo { max_compact_links } => {
            let mut out = vec![0u8, if max_compact_links.is_some() { 0x01 } else { 0x00 }];
            if let Some(k) = max_compact_links {
                out.extend_from_slice(&k.to_le_bytes());
            }
            (MSG_GROUP_INFO, out)
        }
        Message::Unknown { message_type, data } => (*message_type, data.clone()),
    }
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Read every message record out of one raw block (no per-block prefix in
/// v1), honoring continuations by recursing into the new block.
fn read_v1_records(
    store: &ByteStore,
    block: &[u8],
    sizes: Sizes,
    out: &mut Vec<HeaderMessage>,
) -> Result<()> {
    let mut pos = 0usize;
    while pos + V1_RECORD_HEADER_LEN <= block.len() {
        let message_type = u16::from_le_bytes(block[pos..pos + 2].try_into().unwrap());
        let message_size = u16::from_le_bytes(block[pos + 2..pos + 4].try_into().unwrap()) as usize;
        let flag_byte = block[pos + 4];
        let body_start = pos + V1_RECORD_HEADER_LEN;
        let body_end = body_start + message_size;
        if body_end > block.len() {
            break;
        }
        let body = &block[body_start..body_end];

        if message_type == MSG_CONTINUATION {
            let (_, offset) = parse_sized(body, sizes.offset_size)?;
            let length = {
                let skip = sizes.offset_size as usize;
                parse_sized(&body[skip..], sizes.length_size)?.1
            };
            let next_block = store.read(offset, length as usize)?.to_vec();
            read_v1_records(store, &next_block, sizes, out)?;
        } else if message_type != MSG_NIL {
            let flags = MessageFlags::from_byte(flag_byte);
            let message = decode_message(message_type, body, sizes)?;
            if flags.fail_if_unknown_and_writable {
                if let Message::Unknown { message_type, .. } = &message {
                    return Err(Error::UnknownRequiredMessage { message_type: *message_type });
                }
            }
            out.push(HeaderMessage { flags, message });
        }
        pos = body_end;
    }
    Ok(())
}

/// Parse a version 1 object header at `address`.
fn parse_v1(store: &ByteStore, address: u64, sizes: Sizes) -> Result<ObjectHeader> {
    let prefix = store.read(address, V1_PREFIX_LEN)?;
    let version = prefix[0];
    if version != 1 {
        return Err(Error::UnsupportedVersion { what: "object header", version });
    }
    let reference_count = u32::from_le_bytes(prefix[8..12].try_into().unwrap());
    let header_size = u32::from_le_bytes(prefix[12..16].try_into().unwrap()) as usize;

    let first_block = store.read(address + V1_PREFIX_LEN as u64, header_size)?;
    let mut messages = Vec::new();
    read_v1_records(store, first_block, sizes, &mut messages)?;

    Ok(ObjectHeader { address, version: 1, reference_count, messages })
}

/// Parse a version 2 object header at `address`. Chunk 0's size field width
/// (1/2/4/8 bytes) is chosen by flag bits 0-1 per spec.md §4.3; optional
/// timestamps and max/min-compact-link hints are skipped over when their
/// flag bits are set but not otherwise retained.
fn parse_v2(store: &ByteStore, address: u64, sizes: Sizes) -> Result<ObjectHeader> {
    let prefix = store.read(address, 6)?;
    if &prefix[0..4] != V2_SIGNATURE {
        return Err(Error::Parse("bad v2 object header signature".into()));
    }
    let version = prefix[4];
    let flags = prefix[5];
    let mut pos = address + 6;

    if flags & 0x20 != 0 {
        pos += 16; // four u32 timestamps
    }
    if flags & 0x10 != 0 {
        pos += 4; // max_compact + min_dense, both u16
    }

    let chunk0_size_width = match flags & 0x03 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    };
    let size_bytes = store.read(pos, chunk0_size_width)?;
    let chunk0_size = match chunk0_size_width {
        1 => size_bytes[0] as u64,
        2 => u16::from_le_bytes(size_bytes[0..2].try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(size_bytes[0..4].try_into().unwrap()) as u64,
        _ => u64::from_le_bytes(size_bytes[0..8].try_into().unwrap()),
    };
    pos += chunk0_size_width as u64;

    // Chunk 0's checksum covers the whole header from the `OHDR` signature
    // through the end of its message area, trailed by the 4-byte Fletcher32
    // itself (spec.md §4.3/§7).
    let chunk0_span = (pos + chunk0_size + 4 - address) as usize;
    let chunk0_bytes = store.read(address, chunk0_span)?.to_vec();
    checksum_v2_chunk(&chunk0_bytes)?;

    let mut messages = Vec::new();
    read_v2_chunk(store, pos, chunk0_size, sizes, &mut messages, true)?;

    let reference_count = messages
        .iter()
        .find_map(|m| match &m.message {
            Message::ObjectReferenceCount(count) => Some(*count),
            _ => None,
        })
        .unwrap_or(1);

    Ok(ObjectHeader { address, version, reference_count, messages })
}

fn read_v2_chunk(
    store: &ByteStore,
    start: u64,
    declared_size: u64,
    sizes: Sizes,
    out: &mut Vec<HeaderMessage>,
    is_first: bool,
) -> Result<()> {
    // declared_size for a continuation chunk includes the OCHK signature (4
    // bytes) and trailing checksum (4 bytes); chunk 0's declared size is the
    // message-area size alone.
    let (message_area_start, message_area_len) = if is_first {
        (start, declared_size)
    } else {
        let full_chunk = store.read(start, declared_size as usize)?.to_vec();
        if full_chunk.len() < 4 || &full_chunk[0..4] != V2_CONT_SIGNATURE {
            return Err(Error::Parse("bad v2 continuation signature".into()));
        }
        checksum_v2_chunk(&full_chunk)?;
        (start + 4, declared_size - 8)
    };

    let block = store.read(message_area_start, message_area_len as usize)?.to_vec();
    let mut pos = 0usize;
    while pos + 4 <= block.len() {
        let message_type = u16::from_le_bytes(block[pos..pos + 2].try_into().unwrap());
        let message_size = u16::from_le_bytes(block[pos + 2..pos + 4].try_into().unwrap()) as usize;
        let flag_byte = block[pos + 4];
        let body_start = pos + 5;
        let body_end = body_start + message_size;
        if body_end > block.len() {
            break;
        }
        let body = &block[body_start..body_end];

        if message_type == MSG_CONTINUATION {
            let (_, offset) = parse_sized(body, sizes.offset_size)?;
            let length = parse_sized(&body[sizes.offset_size as usize..], sizes.length_size)?.1;
            read_v2_chunk(store, offset, length, sizes, out, false)?;
        } else if message_type != MSG_NIL {
            let flags = MessageFlags::from_byte(flag_byte);
            let message = decode_message(message_type, body, sizes)?;
            if flags.fail_if_unknown_and_writable {
                if let Message::Unknown { message_type, .. } = &message {
                    return Err(Error::UnknownRequiredMessage { message_type: *message_type });
                }
            }
            out.push(HeaderMessage { flags, message });
        }
        pos = body_end;
    }
    Ok(())
}

/// Parse the object header at `address`, dispatching on signature the same
/// way the root-group lookup in `group.rs` peeks a symbol table vs. a link
/// message group: version 1 headers start directly with a version byte,
/// version 2 headers start with the `OHDR` signature.
pub fn parse(store: &ByteStore, address: u64, sizes: Sizes) -> Result<ObjectHeader> {
    let probe = store.read(address, 4)?;
    if probe == V2_SIGNATURE.as_slice() {
        parse_v2(store, address, sizes)
    } else {
        parse_v1(store, address, sizes)
    }
}

fn encode_v1_record(message: &Message, flags: MessageFlags, sizes: Sizes) -> Vec<u8> {
    let (message_type, mut body) = encode_message(message, sizes);
    while body.len() % 8 != 0 {
        body.push(0);
    }
    let mut out = Vec::with_capacity(V1_RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.push(flags.to_byte());
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&body);
    out
}

fn encode_continuation_record(offset: u64, length: u64, sizes: Sizes) -> Vec<u8> {
    let mut body = sizes.address_bytes(offset);
    body.extend_from_slice(&sizes.length_bytes(length));
    while body.len() % 8 != 0 {
        body.push(0);
    }
    let mut out = Vec::with_capacity(V1_RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&MSG_CONTINUATION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&body);
    out
}

const V2_RECORD_HEADER_LEN: usize = 5;
const V2_CHUNK0_PREFIX_LEN: u64 = 4 + 1 + 1 + 8; // signature + version + flags + 8-byte size field

fn encode_v2_record(message: &Message, flags: MessageFlags, sizes: Sizes) -> Vec<u8> {
    let (message_type, body) = encode_message(message, sizes);
    let mut out = Vec::with_capacity(V2_RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.push(flags.to_byte());
    out.extend_from_slice(&body);
    out
}

fn encode_v2_continuation_record(offset: u64, length: u64, sizes: Sizes) -> Vec<u8> {
    let mut body = sizes.address_bytes(offset);
    body.extend_from_slice(&sizes.length_bytes(length));
    let mut out = Vec::with_capacity(V2_RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&MSG_CONTINUATION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.push(0);
    out.extend_from_slice(&body);
    out
}

/// Recompute and rewrite a v2 chunk's trailing Fletcher32 checksum. Works
/// for both chunk 0 (`block_start == header_address`, prefix running from
/// `OHDR` through the size field) and a continuation chunk (prefix is just
/// the 4-byte `OCHK` signature): in both cases the checksum covers
/// everything between `block_start` and the end of the message area.
fn rechecksum_v2_block(
    store: &mut ByteStore,
    block_start: u64,
    message_area_start: u64,
    message_area_len: u64,
) -> Result<()> {
    let span = (message_area_start - block_start) + message_area_len;
    let bytes = store.read(block_start, span as usize)?.to_vec();
    let checksum = fletcher32(&bytes);
    store.write(block_start + span, &checksum.to_le_bytes())?;
    Ok(())
}

/// Walk a v2 header's chunk chain to find the chunk with unused message-area
/// space, mirroring `find_last_block`'s v1 walk.
fn find_last_block_v2(
    store: &ByteStore,
    header_address: u64,
    sizes: Sizes,
) -> Result<(u64, u64, u64, u64)> {
    let prefix = store.read(header_address, 6)?;
    let flags = prefix[5];
    let mut pos = header_address + 6;
    if flags & 0x20 != 0 {
        pos += 16;
    }
    if flags & 0x10 != 0 {
        pos += 4;
    }
    let chunk0_size_width = match flags & 0x03 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    };
    let size_bytes = store.read(pos, chunk0_size_width)?;
    let chunk0_size = match chunk0_size_width {
        1 => size_bytes[0] as u64,
        2 => u16::from_le_bytes(size_bytes[0..2].try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(size_bytes[0..4].try_into().unwrap()) as u64,
        _ => u64::from_le_bytes(size_bytes[0..8].try_into().unwrap()),
    };
    pos += chunk0_size_width as u64;

    let mut block_start = header_address;
    let mut message_area_start = pos;
    let mut message_area_len = chunk0_size;

    loop {
        let area = store.read(message_area_start, message_area_len as usize)?.to_vec();
        let mut p = 0usize;
        let mut next = None;
        while p + V2_RECORD_HEADER_LEN <= area.len() {
            let message_type = u16::from_le_bytes(area[p..p + 2].try_into().unwrap());
            let message_size = u16::from_le_bytes(area[p + 2..p + 4].try_into().unwrap()) as usize;
            let body_start = p + V2_RECORD_HEADER_LEN;
            let body_end = body_start + message_size;
            if body_end > area.len() || (message_type == MSG_NIL && message_size == 0) {
                break;
            }
            if message_type == MSG_CONTINUATION {
                let body = &area[body_start..body_end];
                let (_, offset) = parse_sized(body, sizes.offset_size)?;
                let length = parse_sized(&body[sizes.offset_size as usize..], sizes.length_size)?.1;
                next = Some((offset, length));
            }
            p = body_end;
        }
        match next {
            Some((next_address, declared_size)) => {
                block_start = next_address;
                message_area_start = next_address + 4;
                message_area_len = declared_size - 8;
            }
            None => return Ok((block_start, message_area_start, message_area_len, p as u64)),
        }
    }
}

/// Create a brand-new version 2 object header (`OHDR` chunk 0, Fletcher32
/// trailer, `CONT_RESERVE`-equivalent slack for a future continuation).
/// This crate's own callers all create v1 headers (simpler continuation
/// bookkeeping, no checksum to maintain on every append); this entry point
/// exists so the module can parse *and* emit both historical
/// representations, per spec.md §2's object-header-codec responsibility.
pub fn create_v2(
    store: &mut ByteStore,
    messages: &[(Message, MessageFlags)],
    sizes: Sizes,
) -> Result<u64> {
    let mut body = Vec::new();
    for (message, flags) in messages {
        body.extend_from_slice(&encode_v2_record(message, *flags, sizes));
    }
    let cont_reserve = V2_RECORD_HEADER_LEN as u64 + sizes.offset_size as u64 + sizes.length_size as u64;
    let reserved_len = body.len() as u64 + cont_reserve;

    let total_len = V2_CHUNK0_PREFIX_LEN + reserved_len + 4; // + trailing checksum
    let address = store.allocate(total_len)?;

    let mut full = Vec::with_capacity(total_len as usize);
    full.extend_from_slice(V2_SIGNATURE);
    full.push(2); // version
    full.push(0x03); // flags: 8-byte chunk0 size field, no timestamps, no compact/dense hints
    full.extend_from_slice(&reserved_len.to_le_bytes());
    full.extend_from_slice(&body);
    full.resize((V2_CHUNK0_PREFIX_LEN + reserved_len) as usize, 0); // slack decodes as a NIL run
    let checksum = fletcher32(&full);
    full.extend_from_slice(&checksum.to_le_bytes());

    store.write(address, &full)?;
    Ok(address)
}

/// Append a message to a version 2 object header, chaining an `OCHK`
/// continuation chunk when the current chunk's slack cannot fit it, and
/// recomputing the Fletcher32 trailer of every chunk this touches.
pub fn append_message_v2(
    store: &mut ByteStore,
    header_address: u64,
    message: &Message,
    flags: MessageFlags,
    sizes: Sizes,
) -> Result<()> {
    let probe = store.read(header_address, 4)?.to_vec();
    if probe != V2_SIGNATURE.as_slice() {
        return Err(Error::UnsupportedVersion { what: "object header v2 append", version: probe[0] });
    }

    let record = encode_v2_record(message, flags, sizes);
    let cont_reserve = V2_RECORD_HEADER_LEN as u64 + sizes.offset_size as u64 + sizes.length_size as u64;
    let (block_start, message_area_start, message_area_len, used) =
        find_last_block_v2(store, header_address, sizes)?;
    let free = message_area_len - used;

    if record.len() as u64 + cont_reserve <= free {
        store.write(message_area_start + used, &record)?;
    } else {
        let new_area_len = record.len() as u64 + cont_reserve;
        let new_chunk_total = 4 + new_area_len + 4; // OCHK signature + area + checksum
        let new_chunk_address = store.allocate(new_chunk_total)?;

        let mut new_chunk = Vec::with_capacity(new_chunk_total as usize);
        new_chunk.extend_from_slice(V2_CONT_SIGNATURE);
        new_chunk.extend_from_slice(&record);
        new_chunk.resize((4 + new_area_len) as usize, 0);
        let checksum = fletcher32(&new_chunk);
        new_chunk.extend_from_slice(&checksum.to_le_bytes());
        store.write(new_chunk_address, &new_chunk)?;

        let cont_record = encode_v2_continuation_record(new_chunk_address, new_chunk_total, sizes);
        store.write(message_area_start + used, &cont_record)?;
    }

    rechecksum_v2_block(store, block_start, message_area_start, message_area_len)
}

/// Create a brand-new version 1 object header with the given messages, all
/// fitting in a single block plus `CONT_RESERVE` bytes of slack reserved
/// for a future continuation.
pub fn create(
    store: &mut ByteStore,
    messages: &[(Message, MessageFlags)],
    sizes: Sizes,
) -> Result<u64> {
    let mut body = Vec::new();
    for (message, flags) in messages {
        body.extend_from_slice(&encode_v1_record(message, *flags, sizes));
    }
    let reserved_len = body.len() as u64 + CONT_RESERVE;

    let total_len = V1_PREFIX_LEN as u64 + reserved_len;
    let address = store.allocate(total_len)?;

    let mut prefix = Vec::with_capacity(V1_PREFIX_LEN);
    prefix.push(1u8); // version
    prefix.push(0); // reserved
    prefix.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    prefix.extend_from_slice(&1u32.to_le_bytes()); // reference_count
    prefix.extend_from_slice(&(reserved_len as u32).to_le_bytes());
    prefix.extend_from_slice(&[0u8; 4]);

    store.write(address, &prefix)?;
    store.write(address + V1_PREFIX_LEN as u64, &body)?;
    // the CONT_RESERVE tail is left as zeroed allocator space, which decodes
    // as a run of NIL messages (message_type 0) the reader simply skips.

    Ok(address)
}

/// Append a new message to an object header, chaining a continuation block
/// when the reserved slack in the most recent block cannot fit it, per
/// spec.md's "never rewrite, always chain" invariant.
pub fn append_message(
    store: &mut ByteStore,
    header_address: u64,
    message: &Message,
    flags: MessageFlags,
    sizes: Sizes,
) -> Result<()> {
    let prefix = store.read(header_address, V1_PREFIX_LEN)?.to_vec();
    let version = prefix[0];
    if version != 1 {
        return Err(Error::UnsupportedVersion { what: "object header append", version });
    }
    let total_messages = u16::from_le_bytes(prefix[2..4].try_into().unwrap());
    let block_size = u32::from_le_bytes(prefix[12..16].try_into().unwrap()) as u64;

    let record = encode_v1_record(message, flags, sizes);

    let (last_block_address, last_block_size, used) =
        find_last_block(store, header_address + V1_PREFIX_LEN as u64, block_size, sizes)?;
    let free = last_block_size - used;

    if record.len() as u64 + CONT_RESERVE <= free {
        store.write(last_block_address + used, &record)?;
    } else {
        // Chain a fresh block sized for this record plus new slack, and
        // turn the old block's reserved tail into a continuation message
        // pointing at it.
        let new_block_len = record.len() as u64 + CONT_RESERVE;
        let new_block_address = store.allocate(new_block_len)?;
        store.write(new_block_address, &record)?;

        let cont_record = encode_continuation_record(new_block_address, new_block_len, sizes);
        store.write(last_block_address + used, &cont_record)?;
    }

    store.write(
        header_address + 2,
        &(total_messages + 1).to_le_bytes(),
    )?;

    Ok(())
}

/// Walk the continuation chain from the first block to find the block that
/// still has unused space, returning `(address, declared_size, bytes_used)`.
fn find_last_block(
    store: &ByteStore,
    first_block_address: u64,
    first_block_size: u64,
    sizes: Sizes,
) -> Result<(u64, u64, u64)> {
    let mut address = first_block_address;
    let mut size = first_block_size;
    loop {
        let block = store.read(address, size as usize)?.to_vec();
        let mut pos = 0usize;
        let mut continuation = None;
        while pos + V1_RECORD_HEADER_LEN <= block.len() {
            let message_type = u16::from_le_bytes(block[pos..pos + 2].try_into().unwrap());
            let message_size =
                u16::from_le_bytes(block[pos + 2..pos + 4].try_into().unwrap()) as usize;
            let body_start = pos + V1_RECORD_HEADER_LEN;
            let body_end = body_start + message_size;
            if body_end > block.len() || (message_type == MSG_NIL && message_size == 0) {
                break;
            }
            if message_type == MSG_CONTINUATION {
                let body = &block[body_start..body_end];
                let (_, offset) = parse_sized(body, sizes.offset_size)?;
                let length = parse_sized(&body[sizes.offset_size as usize..], sizes.length_size)?.1;
                continuation = Some((offset, length));
            }
            pos = body_end;
        }
        match continuation {
            Some((next_address, next_size)) => {
                address = next_address;
                size = next_size;
            }
            None => return Ok((address, size, pos as u64)),
        }
    }
}

/// Walk v1 records (following continuations) for the first message matching
/// `matches`, returning the absolute address of its 8-byte record header
/// and its declared body size. Shared by `nil_out_message` and
/// `rewrite_message_body`, which both need to locate a message in place
/// without disturbing anything around it.
fn locate_message_record(
    store: &ByteStore,
    header_address: u64,
    sizes: Sizes,
    matches: &impl Fn(&Message) -> bool,
) -> Result<Option<(u64, usize)>> {
    let prefix = store.read(header_address, V1_PREFIX_LEN)?.to_vec();
    let header_size = u32::from_le_bytes(prefix[12..16].try_into().unwrap()) as u64;
    let mut block_address = header_address + V1_PREFIX_LEN as u64;
    let mut block_size = header_size;

    loop {
        let block = store.read(block_address, block_size as usize)?.to_vec();
        let mut pos = 0usize;
        let mut next_block = None;
        while pos + V1_RECORD_HEADER_LEN <= block.len() {
            let message_type = u16::from_le_bytes(block[pos..pos + 2].try_into().unwrap());
            let message_size =
                u16::from_le_bytes(block[pos + 2..pos + 4].try_into().unwrap()) as usize;
            let body_start = pos + V1_RECORD_HEADER_LEN;
            let body_end = body_start + message_size;
            if body_end > block.len() {
                break;
            }
            let body = &block[body_start..body_end];

            if message_type == MSG_CONTINUATION {
                let (_, offset) = parse_sized(body, sizes.offset_size)?;
                let length = parse_sized(&body[sizes.offset_size as usize..], sizes.length_size)?.1;
                next_block = Some((offset, length));
            } else if message_type != MSG_NIL {
                let message = decode_message(message_type, body, sizes)?;
                if matches(&message) {
                    return Ok(Some((block_address + pos as u64, message_size)));
                }
            }
            pos = body_end;
        }
        match next_block {
            Some((addr, size)) => {
                block_address = addr;
                block_size = size;
            }
            None => return Ok(None),
        }
    }
}

/// Overwrite the first message for which `matches` returns true with a NIL
/// record of the same size, in place. This is how real HDF5 writers delete
/// a header message without a free-space manager: the record's type field
/// becomes 0 and its body is left as dead weight, exactly like the slack
/// this crate already reserves for continuations. Returns whether a match
/// was found.
pub fn nil_out_message(
    store: &mut ByteStore,
    header_address: u64,
    sizes: Sizes,
    matches: impl Fn(&Message) -> bool,
) -> Result<bool> {
    match locate_message_record(store, header_address, sizes, &matches)? {
        Some((record_address, _size)) => {
            store.write(record_address, &MSG_NIL.to_le_bytes())?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Overwrite the body of the first message for which `matches` returns true
/// with `new_body`, in place. `new_body` must be exactly as long as the
/// existing body — this only ever patches a fixed-size address field (e.g.
/// a Symbol-Table message's B-tree address after its B-tree relocates),
/// never resizes a message. Returns whether a match was found.
pub fn rewrite_message_body(
    store: &mut ByteStore,
    header_address: u64,
    sizes: Sizes,
    matches: impl Fn(&Message) -> bool,
    new_body: &[u8],
) -> Result<bool> {
    match locate_message_record(store, header_address, sizes, &matches)? {
        Some((record_address, message_size)) => {
            assert_eq!(new_body.len(), message_size, "rewrite_message_body: size mismatch");
            store.write(record_address + V1_RECORD_HEADER_LEN as u64, new_body)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Increment the object reference count, used when a hard link to this
/// object is created.
pub fn increment_reference_count(store: &mut ByteStore, header_address: u64) -> Result<u32> {
    let prefix = store.read(header_address, V1_PREFIX_LEN)?.to_vec();
    let count = u32::from_le_bytes(prefix[8..12].try_into().unwrap()) + 1;
    store.write(header_address + 8, &count.to_le_bytes())?;
    Ok(count)
}

/// Decrement the object reference count, floored at zero (spec.md §4.3's
/// invariant: reference counts never go negative).
pub fn decrement_reference_count(store: &mut ByteStore, header_address: u64) -> Result<u32> {
    let prefix = store.read(header_address, V1_PREFIX_LEN)?.to_vec();
    let count = u32::from_le_bytes(prefix[8..12].try_into().unwrap()).saturating_sub(1);
    store.write(header_address + 8, &count.to_le_bytes())?;
    Ok(count)
}

pub fn checksum_v2_chunk(chunk: &[u8]) -> Result<()> {
    if chunk.len() < 4 {
        return Err(Error::Truncated { offset: 0, wanted: 4, available: chunk.len() });
    }
    let (data, trailer) = chunk.split_at(chunk.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = fletcher32(data);
    if expected != computed {
        return Err(Error::ChecksumMismatch { what: "v2 object header chunk", offset: 0, expected, computed });
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
        path.push(format!("hdf5-core-objheader-test-{}-{}", std::process::id(), n));
        ByteStore::create(&path).unwrap()
    }

    #[test]
    fn create_and_parse_roundtrips_dataspace_and_datatype() {
        let mut store = scratch_store();
        let ds = Dataspace { dims: vec![4, 4], max_dims: None };
        let dt = Datatype::fixed(4, true);
        let address = create(
            &mut store,
            &[
                (Message::Dataspace(ds.clone()), MessageFlags::default_writable()),
                (Message::Datatype(dt.clone()), MessageFlags::default_writable()),
            ],
            Sizes::WRITE,
        )
        .unwrap();

        let header = parse(&store, address, Sizes::WRITE).unwrap();
        assert_eq!(header.find_dataspace().unwrap(), &ds);
        assert_eq!(header.find_datatype().unwrap(), &dt);
    }

    #[test]
    fn append_message_chains_a_continuation_when_slack_is_exhausted() {
        let mut store = scratch_store();
        let address = create(&mut store, &[], Sizes::WRITE).unwrap();
        // Push enough attribute messages that the initial reserved slack
        // cannot hold them all, forcing at least one continuation.
        for i in 0..20 {
            let attr = Attribute {
                name: format!("attr_{}", i),
                datatype: Datatype::fixed(4, true),
                dataspace: Dataspace::scalar(),
                data: (i as i32).to_le_bytes().to_vec(),
            };
            append_message(
                &mut store,
                address,
                &Message::Attribute(attr),
                MessageFlags::default_writable(),
                Sizes::WRITE,
            )
            .unwrap();
        }
        let header = parse(&store, address, Sizes::WRITE).unwrap();
        assert_eq!(header.attributes().len(), 20);
    }

    #[test]
    fn reference_count_floors_at_zero() {
        let mut store = scratch_store();
        let address = create(&mut store, &[], Sizes::WRITE).unwrap();
        assert_eq!(decrement_reference_count(&mut store, address).unwrap(), 0);
        assert_eq!(increment_reference_count(&mut store, address).unwrap(), 1);
        assert_eq!(decrement_reference_count(&mut store, address).unwrap(), 0);
        assert_eq!(decrement_reference_count(&mut store, address).unwrap(), 0);
    }

    #[test]
    fn v2_create_and_parse_roundtrips_dataspace_and_datatype() {
        let mut store = scratch_store();
        let ds = Dataspace { dims: vec![2, 3], max_dims: None };
        let dt = Datatype::fixed(8, true);
        let address = create_v2(
            &mut store,
            &[
                (Message::Dataspace(ds.clone()), MessageFlags::default_writable()),
                (Message::Datatype(dt.clone()), MessageFlags::default_writable()),
            ],
            Sizes::WRITE,
        )
        .unwrap();

        let header = parse(&store, address, Sizes::WRITE).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.find_dataspace().unwrap(), &ds);
        assert_eq!(header.find_datatype().unwrap(), &dt);
    }

    #[test]
    fn v2_append_message_chains_a_continuation_when_slack_is_exhausted() {
        let mut store = scratch_store();
        let address = create_v2(&mut store, &[], Sizes::WRITE).unwrap();
        for i in 0..20 {
            let attr = Attribute {
                name: format!("attr_{}", i),
                datatype: Datatype::fixed(4, true),
                dataspace: Dataspace::scalar(),
                data: (i as i32).to_le_bytes().to_vec(),
            };
            append_message_v2(
                &mut store,
                address,
                &Message::Attribute(attr),
                MessageFlags::default_writable(),
                Sizes::WRITE,
            )
            .unwrap();
        }
        let header = parse(&store, address, Sizes::WRITE).unwrap();
        assert_eq!(header.attributes().len(), 20);
    }

    #[test]
    fn v2_header_detects_corrupted_checksum() {
        let mut store = scratch_store();
        let address = create_v2(
            &mut store,
            &[(Message::Datatype(Datatype::fixed(4, true)), MessageFlags::default_writable())],
            Sizes::WRITE,
        )
        .unwrap();
        // Flip a byte inside the message area without touching the trailer.
        let victim = store.read(address + V2_CHUNK0_PREFIX_LEN, 1).unwrap()[0];
        store.write(address + V2_CHUNK0_PREFIX_LEN, &[victim ^ 0xFF]).unwrap();
        assert!(matches!(parse(&store, address, Sizes::WRITE), Err(Error::ChecksumMismatch { .. })));
    }
}
