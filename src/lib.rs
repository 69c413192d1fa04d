//! # peflatten
//!
//! Flattens a PE32 executable into a raw binary that can be placed and run at an
//! arbitrary address.
//!
//! ## Overview
//!
//! On disk, a PE image stores its sections at file offsets with alignment gaps
//! between them, and its absolute addresses assume the preferred image base. This
//! crate:
//!
//! 1. Validates the DOS and PE32 headers
//! 2. Copies every section into a contiguous, page-padded buffer
//! 3. Rewrites each HIGHLOW base relocation for the chosen flatten base
//! 4. Writes the buffer out with no header
//!
//! Byte `o` of the output corresponds to RVA `first_section_rva + o` of the
//! original image. PE32+ images are rejected.

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod pe;
pub mod section;
pub mod reloc;
pub mod emit;
pub mod flattener;

pub use error::{Error, Result};
pub use flattener::{flatten_file, FlattenConfig, FlattenReport, Flattener, DEFAULT_OUTPUT};
pub use pe::PeHeaders;
pub use reloc::{Rebase, RelocationStats};
