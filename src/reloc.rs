//! Base relocation parsing and application.
//!
//! The relocation directory is a run of page blocks, each an 8-byte header
//! followed by 16-bit entries. Every HIGHLOW entry names a dword in the linear
//! image holding an absolute address, which is rewritten for the flatten base.
//!
//! Application is not idempotent: running it twice shifts each patched value
//! twice. The pipeline applies it exactly once.

use crate::error::{Error, Result};
use crate::pe::{read_u16, read_u32};

use tracing::{debug, info};

/// Size of the page RVA and block size fields.
pub const BLOCK_HEADER_SIZE: u32 = 8;
const ENTRY_SIZE: usize = 2;

pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;

/// Relocation types this engine understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocationType {
    /// Padding; nothing to patch. Real system DLLs contain these.
    Absolute,
    /// Full 32-bit address.
    HighLow,
}

/// A single relocation entry within a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocationEntry {
    pub kind: RelocationType,
    /// Offset from the block's page RVA (12 bits).
    pub offset: u16,
}

impl RelocationEntry {
    /// Decode a raw entry. Unknown types are fatal since the framing of
    /// anything after them cannot be trusted.
    pub fn parse(raw: u16, page_rva: u32) -> Result<Self> {
        let kind = match (raw >> 12) as u8 {
            IMAGE_REL_BASED_ABSOLUTE => RelocationType::Absolute,
            IMAGE_REL_BASED_HIGHLOW => RelocationType::HighLow,
            other => {
                return Err(Error::UnsupportedRelocationType {
                    kind: other,
                    page_rva,
                    entry: raw,
                })
            }
        };

        Ok(Self {
            kind,
            offset: raw & 0x0FFF,
        })
    }
}

/// IMAGE_BASE_RELOCATION header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub page_rva: u32,
    /// Total size of the block including this header.
    pub block_size: u32,
}

impl BlockHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            page_rva: read_u32(data, offset)?,
            block_size: read_u32(data, offset + 4)?,
        })
    }
}

/// Address spaces involved in rebasing a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rebase {
    /// Preferred image base from the optional header.
    pub image_base: u32,
    /// Address the flat image will be loaded at.
    pub flatten_base: u32,
    /// RVA the linear image starts at.
    pub first_section_rva: u32,
}

impl Rebase {
    /// Move an absolute address from the original image into flat image coordinates.
    ///
    /// Addresses are modular in the 32-bit space, so every step wraps.
    #[inline]
    pub fn apply(&self, value: u32) -> u32 {
        value
            .wrapping_sub(self.image_base)
            .wrapping_add(self.flatten_base)
            .wrapping_sub(self.first_section_rva)
    }
}

/// Statistics about applied relocations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelocationStats {
    pub blocks: usize,
    /// Dwords rewritten.
    pub highlow: usize,
    /// Padding entries skipped.
    pub absolute: usize,
}

impl RelocationStats {
    /// Total number of entries visited.
    pub fn total(&self) -> usize {
        self.highlow + self.absolute
    }
}

/// Apply every relocation in `relocs` to `image` in place.
///
/// `directory_size` bounds the walk; blocks carry no count of their own.
pub fn apply_relocations(
    image: &mut [u8],
    relocs: &[u8],
    directory_size: u32,
    rebase: &Rebase,
) -> Result<RelocationStats> {
    let mut stats = RelocationStats::default();
    let mut table_offset = 0usize;

    while table_offset < directory_size as usize {
        let block = BlockHeader::parse(relocs, table_offset)?;
        let entries_bytes = block
            .block_size
            .checked_sub(BLOCK_HEADER_SIZE)
            .ok_or(Error::MalformedRelocation {
                offset: table_offset,
                reason: "block size smaller than its header",
            })? as usize;
        table_offset += BLOCK_HEADER_SIZE as usize;

        for i in (0..entries_bytes).step_by(ENTRY_SIZE) {
            let raw = read_u16(relocs, table_offset + i)?;

            match RelocationEntry::parse(raw, block.page_rva)? {
                RelocationEntry {
                    kind: RelocationType::Absolute,
                    ..
                } => {
                    info!(
                        "Found absolute at page: 0x{:X} entry: 0x{:04X}",
                        block.page_rva, raw
                    );
                    stats.absolute += 1;
                }
                RelocationEntry {
                    kind: RelocationType::HighLow,
                    offset,
                } => {
                    patch_highlow(image, block.page_rva, offset, rebase)?;
                    stats.highlow += 1;
                }
            }
        }

        table_offset += entries_bytes;
        stats.blocks += 1;
    }

    info!(
        "Applied {} relocations in {} blocks ({} absolute skipped)",
        stats.highlow, stats.blocks, stats.absolute
    );

    Ok(stats)
}

/// Rewrite the dword at `page_rva + offset`.
fn patch_highlow(image: &mut [u8], page_rva: u32, offset: u16, rebase: &Rebase) -> Result<()> {
    let rva = page_rva as u64 + offset as u64;

    let target = rva
        .checked_sub(rebase.first_section_rva as u64)
        .filter(|&o| o + 4 <= image.len() as u64)
        .ok_or(Error::RelocationOutOfBounds {
            rva,
            image_len: image.len(),
        })? as usize;

    let old = read_u32(image, target)?;
    let new = rebase.apply(old);
    image[target..target + 4].copy_from_slice(&new.to_le_bytes());

    debug!("HIGHLOW at RVA 0x{:X}: 0x{:08X} -> 0x{:08X}", rva, old, new);
    Ok(())
}
