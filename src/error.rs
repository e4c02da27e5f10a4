//! Error kinds for the core, per spec.md §7.

use thiserror::Error;

/// The core's single error type. One variant per error kind in spec.md §7.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad file signature at offset {offset}")]
    BadSignature { offset: u64 },

    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },

    #[error("truncated read at offset {offset}: wanted {wanted} bytes, had {available}")]
    Truncated {
        offset: u64,
        wanted: usize,
        available: usize,
    },

    #[error(
        "checksum mismatch in {what} at offset {offset}: expected {expected:#x}, computed {computed:#x}"
    )]
    ChecksumMismatch {
        what: &'static str,
        offset: u64,
        expected: u32,
        computed: u32,
    },

    #[error("unknown required header message type {message_type:#x}")]
    UnknownRequiredMessage { message_type: u16 },

    #[error(
        "rank mismatch: selection has rank {selection_rank}, dataspace has rank {dataspace_rank}"
    )]
    RankMismatch {
        selection_rank: usize,
        dataspace_rank: usize,
    },

    #[error("empty extent in dimension {dim}")]
    EmptyExtent { dim: usize },

    #[error("selection out of bounds in dimension {dim}: last index {last} >= extent {extent}")]
    OutOfBounds { dim: usize, last: u64, extent: u64 },

    #[error("link target not found: {path}")]
    TargetNotFound { path: String },

    #[error("parent group not found for path: {path}")]
    ParentNotFound { path: String },

    #[error("invalid link path: {path}")]
    InvalidPath { path: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("{what} address {address:#x} is out of range for a file of size {file_size}")]
    InvalidAddress {
        what: &'static str,
        address: u64,
        file_size: u64,
    },

    /// Raised internally by the attribute manager when compact storage has
    /// exceeded its threshold. Always handled within `attribute::write` —
    /// never escapes to a caller.
    #[error("attribute storage transition required")]
    TransitionRequired,

    #[error("filter {filter_id} failed: {reason}")]
    FilterFailure { filter_id: u8, reason: String },

    #[error("space exhausted: {reason}")]
    SpaceExhausted { reason: String },

    #[error("chunk iteration cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl<'a> From<nom::Err<nom::error::VerboseError<&'a [u8]>>> for Error {
    fn from(e: nom::Err<nom::error::VerboseError<&'a [u8]>>) -> Self {
        Error::Parse(format!("{:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
