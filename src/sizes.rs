//! The pair of global constants spec.md §3 says the superblock fixes for
//! the rest of the file: the byte width of addresses and of lengths.
//!
//! Readers thread `Sizes` down from the superblock so 4-byte-offset files
//! decode correctly. This crate's own writer always allocates with
//! `Sizes::WRITE` (8/8) — the simplest choice and the one every modern
//! HDF5 writer defaults to — noted in DESIGN.md.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub offset_size: u8,
    pub length_size: u8,
}

impl Sizes {
    pub const WRITE: Sizes = Sizes { offset_size: 8, length_size: 8 };

    pub fn address_bytes(self, value: u64) -> Vec<u8> {
        size_bytes(self.offset_size, value)
    }

    pub fn length_bytes(self, value: u64) -> Vec<u8> {
        size_bytes(self.length_size, value)
    }
}

fn size_bytes(size: u8, value: u64) -> Vec<u8> {
    if size == 4 {
        (value as u32).to_le_bytes().to_vec()
    } else {
        value.to_le_bytes().to_vec()
    }
}

pub fn parse_sized(input: &[u8], size: u8) -> nom::IResult<&[u8], u64, nom::error::VerboseError<&[u8]>> {
    use nom::number::streaming::{le_u32, le_u64};
    if size == 4 {
        let (rest, v) = le_u32(input)?;
        Ok((rest, v as u64))
    } else {
        le_u64(input)
    }
}
