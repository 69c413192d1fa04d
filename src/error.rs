//! Error types for peflatten.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while flattening a PE image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("input file is empty")]
    EmptyFile,

    #[error("invalid PE: {0}")]
    InvalidFormat(&'static str),

    #[error("truncated file: read of {len} bytes at offset 0x{offset:X} exceeds buffer size 0x{size:X}")]
    TruncatedFile { offset: usize, len: usize, size: usize },

    #[error("malformed section {index}: {reason}")]
    MalformedSection { index: usize, reason: &'static str },

    #[error("malformed relocation block at offset 0x{offset:X}: {reason}")]
    MalformedRelocation { offset: usize, reason: &'static str },

    #[error("relocation target out of bounds: RVA 0x{rva:X} outside image of 0x{image_len:X} bytes")]
    RelocationOutOfBounds { rva: u64, image_len: usize },

    #[error("unsupported relocation type {kind} in page 0x{page_rva:X} (entry 0x{entry:04X})")]
    UnsupportedRelocationType { kind: u8, page_rva: u32, entry: u16 },

    #[error("output file creation failed: {0}")]
    OutputCreationFailed(String),

    #[error("output file write failed: {0}")]
    OutputWriteFailed(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
