//! L3: typed header messages (spec.md §4.4).
//!
//! Each message has a `parse` (bytes → struct) and `encode` (struct →
//! bytes) pair. FilterPipeline, Link, and AttributeInfo have no prior
//! decoder here and are built directly from spec.md §4.4/§6, in the same
//! style as the rest of this module.

use crate::error::{Error, Result};
use crate::sizes::{parse_sized, Sizes};
use nom::bytes::streaming::take;
use nom::error::{context, VerboseError};
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};

type PResult<'a, O> = nom::IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

pub const UNLIMITED: u64 = u64::MAX;

// ---------------------------------------------------------------- Dataspace

#[derive(Debug, Clone, PartialEq)]
pub struct Dataspace {
    pub dims: Vec<u64>,
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn scalar() -> Self {
        Dataspace { dims: vec![1], max_dims: None }
    }
}

pub fn parse_dataspace(input: &[u8]) -> Result<Dataspace> {
    let parse_inner = |input: &[u8]| -> PResult<Dataspace> {
        context("dataspace", |input| {
            let (input, version) = le_u8(input)?;
            let (input, dimensionality) = le_u8(input)?;
            let (input, flags) = le_u8(input)?;
            let (input, _type) = le_u8(input)?;
            let (input, _) = take(4usize)(input)?; // reserved
            let has_max = flags & 1 != 0;
            let (input, dims) = count(le_u64, dimensionality as usize)(input)?;
            let (input, max_dims) = if has_max {
                let (input, m) = count(le_u64, dimensionality as usize)(input)?;
                (input, Some(m))
            } else {
                (input, None)
            };
            let _ = version;
            let dims = if dimensionality == 0 { vec![1] } else { dims };
            Ok((input, Dataspace { dims, max_dims }))
        })(input)
    };
    let (_, ds) = parse_inner(input)?;
    Ok(ds)
}

pub fn encode_dataspace(ds: &Dataspace) -> Vec<u8> {
    let rank = ds.dims.len() as u8;
    let flags: u8 = if ds.max_dims.is_some() { 1 } else { 0 };
    let mut out = Vec::with_capacity(8 + ds.dims.len() * 8);
    out.push(1); // version
    out.push(rank);
    out.push(flags);
    out.push(1); // simple dataspace type
    out.extend_from_slice(&[0u8; 4]);
    for d in &ds.dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    if let Some(max) = &ds.max_dims {
        for m in max {
            out.extend_from_slice(&m.to_le_bytes());
        }
    }
    out
}

// ----------------------------------------------------------------- Datatype

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeClass {
    Fixed,
    Float,
    Time,
    String,
    BitField,
    Opaque,
    Compound,
    Reference,
    Enum,
    VLen,
    Array,
}

impl DatatypeClass {
    fn code(self) -> u8 {
        use DatatypeClass::*;
        match self {
            Fixed => 0,
            Float => 1,
            Time => 2,
            String => 3,
            BitField => 4,
            Opaque => 5,
            Compound => 6,
            Reference => 7,
            Enum => 8,
            VLen => 9,
            Array => 10,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        use DatatypeClass::*;
        Ok(match code {
            0 => Fixed,
            1 => Float,
            2 => Time,
            3 => String,
            4 => BitField,
            5 => Opaque,
            6 => Compound,
            7 => Reference,
            8 => Enum,
            9 => VLen,
            10 => Array,
            other => {
                return Err(Error::UnsupportedVersion { what: "datatype class", version: other })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundField {
    pub name: String,
    pub offset: u32,
    pub member_type: Box<Datatype>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datatype {
    pub class: DatatypeClass,
    /// Element size in bytes.
    pub size: u32,
    /// Class-specific bitfield, e.g. signedness (Fixed) or byte-order bit
    /// 0 (Float/Fixed): `1` = little-endian element byte order.
    pub bitfield: u32,
    /// Present only for `Compound`; recursively parsed (spec.md §4.4).
    pub fields: Vec<CompoundField>,
}

impl Datatype {
    pub fn is_little_endian(&self) -> bool {
        self.bitfield & 1 == 0
    }

    pub fn fixed(size: u32, signed: bool) -> Self {
        Datatype {
            class: DatatypeClass::Fixed,
            size,
            bitfield: if signed { 0b1000 } else { 0 },
            fields: Vec::new(),
        }
    }

    pub fn float(size: u32) -> Self {
        Datatype { class: DatatypeClass::Float, size, bitfield: 0, fields: Vec::new() }
    }

    pub fn is_signed(&self) -> bool {
        self.bitfield & 0b1000 != 0
    }
}

/// Parses a datatype message body. Recurses for compound member types, per
/// spec.md §4.4 ("Nested compound types are supported; parsing is
/// recursive").
pub fn parse_datatype(input: &[u8]) -> Result<Datatype> {
    let (_, dt) = parse_datatype_inner(input)?;
    Ok(dt)
}

fn parse_datatype_inner(input: &[u8]) -> PResult<Datatype> {
    context("datatype", |input| {
        let (input, class_and_version) = le_u8(input)?;
        let (input, bitfield_lo) = le_u16(input)?;
        let (input, bitfield_hi) = le_u8(input)?;
        let bitfield = (bitfield_lo as u32) | ((bitfield_hi as u32) << 16);
        let (input, size) = le_u32(input)?;
        let raw_class = class_and_version & 0x0f;
        let class = DatatypeClass::from_code(raw_class)
            .map_err(|_| nom::Err::Failure(VerboseError { errors: Vec::new() }))?;

        if class == DatatypeClass::Compound {
            let member_count = (bitfield & 0xffff) as usize;
            let mut input = input;
            let mut fields = Vec::with_capacity(member_count);
            for _ in 0..member_count {
                let (rest, name) = take_cstring(input)?;
                let (rest, offset) = le_u32(rest)?;
                let (rest, member_type) = parse_datatype_inner(rest)?;
                fields.push(CompoundField { name, offset, member_type: Box::new(member_type) });
                input = rest;
            }
            Ok((input, Datatype { class, size, bitfield, fields }))
        } else {
            Ok((input, Datatype { class, size, bitfield, fields: Vec::new() }))
        }
    })(input)
}

fn take_cstring(input: &[u8]) -> PResult<String> {
    let nul_pos = input.iter().position(|b| *b == 0).unwrap_or(input.len());
    let (name_bytes, rest0) = input.split_at(nul_pos);
    let rest = &rest0[1.min(rest0.len())..];
    let padded_len = pad8(nul_pos as u64 + 1) as usize;
    let consumed_extra = padded_len - (nul_pos + 1);
    let rest = if rest.len() >= consumed_extra { &rest[consumed_extra..] } else { rest };
    let name = String::from_utf8(name_bytes.to_vec())
        .map_err(|_| nom::Err::Failure(VerboseError { errors: Vec::new() }))?;
    Ok((rest, name))
}

pub fn encode_datatype(dt: &Datatype) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    let version_and_class = (1u8 << 4) | dt.class.code();
    out.push(version_and_class);
    let bitfield = if dt.class == DatatypeClass::Compound {
        dt.fields.len() as u32
    } else {
        dt.bitfield
    };
    out.extend_from_slice(&(bitfield as u16).to_le_bytes());
    out.push((bitfield >> 16) as u8);
    out.extend_from_slice(&dt.size.to_le_bytes());
    for f in &dt.fields {
        let mut name_bytes = f.name.as_bytes().to_vec();
        name_bytes.push(0);
        while name_bytes.len() % 8 != 0 {
            name_bytes.push(0);
        }
        out.extend_from_slice(&name_bytes);
        out.extend_from_slice(&f.offset.to_le_bytes());
        out.extend_from_slice(&encode_datatype(&f.member_type));
    }
    out
}

fn pad8(n: u64) -> u64 {
    (n + 7) & !7
}

// -------------------------------------------------------------- DataLayout

#[derive(Debug, Clone, PartialEq)]
pub enum DataLayout {
    Compact { data: Vec<u8> },
    Contiguous { address: u64, size: u64 },
    Chunked { chunk_dims: Vec<u64>, btree_address: u64 },
}

pub fn parse_data_layout(input: &[u8], sizes: Sizes) -> Result<DataLayout> {
    let parse_inner = |input: &[u8]| -> PResult<DataLayout> {
        context("data layout", |input| {
            let (input, _version) = le_u8(input)?;
            let (input, class) = le_u8(input)?;
            match class {
                0 => {
                    let (input, size) = le_u16(input)?;
                    let (input, data) = take(size as usize)(input)?;
                    Ok((input, DataLayout::Compact { data: data.to_vec() }))
                }
                1 => {
                    let (input, address) = parse_sized(input, sizes.offset_size)?;
                    let (input, size) = parse_sized(input, sizes.length_size)?;
                    Ok((input, DataLayout::Contiguous { address, size }))
                }
                2 => {
                    let (input, rank) = le_u8(input)?;
                    let (input, btree_address) = parse_sized(input, sizes.offset_size)?;
                    let (input, chunk_dims) = count(le_u32, rank as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Chunked {
                            chunk_dims: chunk_dims.into_iter().map(|d| d as u64).collect(),
                            btree_address,
                        },
                    ))
                }
                _other => Err(nom::Err::Failure(VerboseError {
                    errors: vec![(input, nom::error::VerboseErrorKind::Context("unsupported layout class"))],
                })),
            }
        })(input)
    };
    let (_, layout) = parse_inner(input)?;
    Ok(layout)
}

pub fn encode_data_layout(layout: &DataLayout, sizes: Sizes) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(3); // version
    match layout {
        DataLayout::Compact { data } => {
            out.push(0);
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        DataLayout::Contiguous { address, size } => {
            out.push(1);
            out.extend_from_slice(&sizes.address_bytes(*address));
            out.extend_from_slice(&sizes.length_bytes(*size));
        }
        DataLayout::Chunked { chunk_dims, btree_address } => {
            out.push(2);
            out.push(chunk_dims.len() as u8);
            out.extend_from_slice(&sizes.address_bytes(*btree_address));
            for d in chunk_dims {
                out.extend_from_slice(&(*d as u32).to_le_bytes());
            }
        }
    }
    out
}

// ----------------------------------------------------------- FilterPipeline

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub filter_id: u16,
    pub client_data: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipeline {
    pub filters: Vec<FilterDescriptor>,
}

pub fn parse_filter_pipeline(input: &[u8]) -> Result<FilterPipeline> {
    let parse_inner = |input: &[u8]| -> PResult<FilterPipeline> {
        context("filter pipeline", |input| {
            let (input, _version) = le_u8(input)?;
            let (input, num_filters) = le_u8(input)?;
            let (input, _) = take(6usize)(input)?; // reserved
            let mut input = input;
            let mut filters = Vec::with_capacity(num_filters as usize);
            for _ in 0..num_filters {
                let (rest, filter_id) = le_u16(input)?;
                let (rest, num_client_values) = le_u16(rest)?;
                let (rest, _) = take(4usize)(rest)?; // name length + flags, unused here
                let (rest, client_data) = count(le_u32, num_client_values as usize)(rest)?;
                filters.push(FilterDescriptor { filter_id, client_data });
                input = rest;
            }
            Ok((input, FilterPipeline { filters }))
        })(input)
    };
    let (_, fp) = parse_inner(input)?;
    Ok(fp)
}

pub fn encode_filter_pipeline(fp: &FilterPipeline) -> Vec<u8> {
    let mut out = vec![1u8, fp.filters.len() as u8, 0, 0, 0, 0, 0, 0];
    for f in &fp.filters {
        out.extend_from_slice(&f.filter_id.to_le_bytes());
        out.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        for v in &f.client_data {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

// ------------------------------------------------------------------- Link

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Hard { object_address: u64 },
    Soft { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
}

pub fn parse_link(input: &[u8], sizes: Sizes) -> Result<Link> {
    let parse_inner = |input: &[u8]| -> PResult<Link> {
        context("link", |input| {
            let (input, _version) = le_u8(input)?;
            let (input, link_type) = le_u8(input)?;
            let (input, name_len) = le_u16(input)?;
            let (input, name_bytes) = take(name_len)(input)?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| nom::Err::Failure(VerboseError { errors: Vec::new() }))?;
            let (input, target) = match link_type {
                0 => {
                    let (input, address) = parse_sized(input, sizes.offset_size)?;
                    (input, LinkTarget::Hard { object_address: address })
                }
                1 => {
                    let (input, path_len) = le_u16(input)?;
                    let (input, path_bytes) = take(path_len)(input)?;
                    let path = String::from_utf8(path_bytes.to_vec())
                        .map_err(|_| nom::Err::Failure(VerboseError { errors: Vec::new() }))?;
                    (input, LinkTarget::Soft { path })
                }
                other => {
                    return Err(nom::Err::Failure(VerboseError {
                        errors: vec![(input, nom::error::VerboseErrorKind::Char(other as char))],
                    }))
                }
            };
            Ok((input, Link { name, target }))
        })(input)
    };
    let (_, link) = parse_inner(input)?;
    Ok(link)
}

pub fn encode_link(link: &Link, sizes: Sizes) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(1); // version
    let name_bytes = link.name.as_bytes();
    match &link.target {
        LinkTarget::Hard { object_address } => {
            out.push(0);
            out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.extend_from_slice(&sizes.address_bytes(*object_address));
        }
        LinkTarget::Soft { path } => {
            out.push(1);
            out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(name_bytes);
            let path_bytes = path.as_bytes();
            out.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(path_bytes);
        }
    }
    out
}

// ------------------------------------------------------------ SymbolTable

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

pub fn parse_symbol_table(input: &[u8], sizes: Sizes) -> Result<SymbolTable> {
    let parse_inner = |input: &[u8]| -> PResult<SymbolTable> {
        let (input, btree_address) = parse_sized(input, sizes.offset_size)?;
        let (input, local_heap_address) = parse_sized(input, sizes.offset_size)?;
        Ok((input, SymbolTable { btree_address, local_heap_address }))
    };
    let (_, st) = parse_inner(input)?;
    Ok(st)
}

pub fn encode_symbol_table(st: &SymbolTable, sizes: Sizes) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&sizes.address_bytes(st.btree_address));
    out.extend_from_slice(&sizes.address_bytes(st.local_heap_address));
    out
}

// -------------------------------------------------------------- Attribute

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub data: Vec<u8>,
}

pub fn parse_attribute(input: &[u8], message_size: usize) -> Result<Attribute> {
    let (_, name_len) = le_u16::<_, VerboseError<&[u8]>>(&input[2..4])?;
    let (_, datatype_size) = le_u16::<_, VerboseError<&[u8]>>(&input[4..6])?;
    let (_, dataspace_size) = le_u16::<_, VerboseError<&[u8]>>(&input[6..8])?;

    let name_padded = pad8(name_len as u64 + 1) as usize; // name stored NUL-terminated
    let datatype_padded = pad8(datatype_size as u64) as usize;
    let dataspace_padded = pad8(dataspace_size as u64) as usize;

    let mut pos = 8usize;
    let name_bytes = &input[pos..pos + name_len as usize];
    let name = String::from_utf8(
        name_bytes.iter().take_while(|b| **b != 0).copied().collect(),
    )?;
    pos += name_padded;

    let datatype = parse_datatype(&input[pos..pos + datatype_size as usize])?;
    pos += datatype_padded;

    let dataspace = parse_dataspace(&input[pos..pos + dataspace_size as usize])?;
    pos += dataspace_padded;

    let data_len = message_size.saturating_sub(pos);
    let data = input[pos..pos + data_len].to_vec();

    Ok(Attribute { name, datatype, dataspace, data })
}

pub fn encode_attribute(attr: &Attribute) -> Vec<u8> {
    let mut name_bytes = attr.name.as_bytes().to_vec();
    name_bytes.push(0);
    while name_bytes.len() % 8 != 0 {
        name_bytes.push(0);
    }
    let datatype_bytes = encode_datatype(&attr.datatype);
    let datatype_padded = pad_vec(&datatype_bytes);
    let dataspace_bytes = encode_dataspace(&attr.dataspace);
    let dataspace_padded = pad_vec(&dataspace_bytes);

    let mut out = Vec::new();
    out.push(1); // version
    out.push(0); // reserved
    out.extend_from_slice(&((attr.name.len() + 1) as u16).to_le_bytes());
    out.extend_from_slice(&(datatype_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&(dataspace_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&name_bytes);
    out.extend_from_slice(&datatype_padded);
    out.extend_from_slice(&dataspace_padded);
    out.extend_from_slice(&attr.data);
    out
}

fn pad_vec(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    while out.len() % 8 != 0 {
        out.push(0);
    }
    out
}

// ---------------------------------------------------------- AttributeInfo

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub fractal_heap_address: u64,
    pub name_btree_address: u64,
    /// Max-compact hint, when the creating writer recorded one (spec.md
    /// §9's Open Question on where `K` comes from).
    pub max_compact: Option<u16>,
}

pub fn parse_attribute_info(input: &[u8], sizes: Sizes) -> Result<AttributeInfo> {
    let parse_inner = |input: &[u8]| -> PResult<AttributeInfo> {
        let (input, _version) = le_u8(input)?;
        let (input, flags) = le_u8(input)?;
        let has_max_compact = flags & 1 != 0;
        let (input, max_compact) = if has_max_compact {
            let (input, v) = le_u16(input)?;
            (input, Some(v))
        } else {
            (input, None)
        };
        let (input, fractal_heap_address) = parse_sized(input, sizes.offset_size)?;
        let (input, name_btree_address) = parse_sized(input, sizes.offset_size)?;
        Ok((
            input,
            AttributeInfo { fractal_heap_address, name_btree_address, max_compact },
        ))
    };
    let (_, info) = parse_inner(input)?;
    Ok(info)
}

pub fn encode_attribute_info(info: &AttributeInfo, sizes: Sizes) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(0); // version
    out.push(if info.max_compact.is_some() { 1 } else { 0 });
    if let Some(k) = info.max_compact {
        out.extend_from_slice(&k.to_le_bytes());
    }
    out.extend_from_slice(&sizes.address_bytes(info.fractal_heap_address));
    out.extend_from_slice(&sizes.address_bytes(info.name_btree_address));
    out
}

// -------------------------------------------------------------- FillValue

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillValue {
    pub defined: bool,
    pub bytes: Vec<u8>,
}

pub fn parse_fill_value(input: &[u8]) -> Result<FillValue> {
    let parse_inner = |input: &[u8]| -> PResult<FillValue> {
        context("fill value", |input| {
            let (input, version) = le_u8(input)?;
            if version != 2 && version != 3 {
                return Err(nom::Err::Failure(VerboseError { errors: Vec::new() }));
            }
            let (input, _space_alloc_time) = le_u8(input)?;
            let (input, _write_time) = le_u8(input)?;
            let (input, defined) = le_u8(input)?;
            let (input, bytes) = if defined > 0 {
                let (input, size) = le_u32(input)?;
                take(size as usize)(input)?
            } else {
                (input, &b""[..])
            };
            Ok((input, FillValue { defined: defined > 0, bytes: bytes.to_vec() }))
        })(input)
    };
    let (_, fv) = parse_inner(input)?;
    Ok(fv)
}

pub fn encode_fill_value(fv: &FillValue) -> Vec<u8> {
    let mut out = vec![2u8, 1, 1, if fv.defined { 1 } else { 0 }];
    if fv.defined {
        out.extend_from_slice(&(fv.bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&fv.bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataspace_roundtrip() {
        let ds = Dataspace { dims: vec![10, 20], max_dims: Some(vec![UNLIMITED, 20]) };
        let encoded = encode_dataspace(&ds);
        let decoded = parse_dataspace(&encoded).unwrap();
        assert_eq!(decoded, ds);
    }

    #[test]
    fn scalar_dataspace_synthesizes_rank_one() {
        let mut raw = vec![1u8, 0, 0, 1, 0, 0, 0, 0];
        raw.truncate(8);
        let decoded = parse_dataspace(&raw).unwrap();
        assert_eq!(decoded.dims, vec![1]);
    }

    #[test]
    fn datatype_fixed_roundtrip() {
        let dt = Datatype::fixed(4, true);
        let encoded = encode_datatype(&dt);
        let decoded = parse_datatype(&encoded).unwrap();
        assert_eq!(decoded, dt);
    }

    #[test]
    fn datatype_compound_roundtrip() {
        let dt = Datatype {
            class: DatatypeClass::Compound,
            size: 8,
            bitfield: 0,
            fields: vec![
                CompoundField { name: "x".into(), offset: 0, member_type: Box::new(Datatype::fixed(4, true)) },
                CompoundField { name: "y".into(), offset: 4, member_type: Box::new(Datatype::fixed(4, true)) },
            ],
        };
        let encoded = encode_datatype(&dt);
        let decoded = parse_datatype(&encoded).unwrap();
        assert_eq!(decoded.fields.len(), 2);
        assert_eq!(decoded.fields[1].offset, 4);
    }

    #[test]
    fn data_layout_chunked_roundtrip() {
        let layout = DataLayout::Chunked { chunk_dims: vec![10, 10], btree_address: 4096 };
        let encoded = encode_data_layout(&layout, Sizes::WRITE);
        let decoded = parse_data_layout(&encoded, Sizes::WRITE).unwrap();
        assert_eq!(decoded, layout);
    }

    #[test]
    fn filter_pipeline_roundtrip() {
        let fp = FilterPipeline {
            filters: vec![
                FilterDescriptor { filter_id: 2, client_data: vec![4] },
                FilterDescriptor { filter_id: 1, client_data: vec![] },
            ],
        };
        let encoded = encode_filter_pipeline(&fp);
        let decoded = parse_filter_pipeline(&encoded).unwrap();
        assert_eq!(decoded, fp);
    }

    #[test]
    fn link_hard_roundtrip() {
        let link = Link { name: "dataset0".into(), target: LinkTarget::Hard { object_address: 2048 } };
        let encoded = encode_link(&link, Sizes::WRITE);
        let decoded = parse_link(&encoded, Sizes::WRITE).unwrap();
        assert_eq!(decoded, link);
    }

    #[test]
    fn attribute_roundtrip() {
        let attr = Attribute {
            name: "units".into(),
            datatype: Datatype::fixed(4, true),
            dataspace: Dataspace::scalar(),
            data: 12345i32.to_le_bytes().to_vec(),
        };
        let encoded = encode_attribute(&attr);
        let decoded = parse_attribute(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded.name, attr.name);
        assert_eq!(decoded.data, attr.data);
    }

    #[test]
    fn fill_value_roundtrip_defined() {
        let fv = FillValue { defined: true, bytes: vec![0xAB, 0xCD, 0xEF, 0x01] };
        let encoded = encode_fill_value(&fv);
        let decoded = parse_fill_value(&encoded).unwrap();
        assert_eq!(decoded, fv);
    }
}
