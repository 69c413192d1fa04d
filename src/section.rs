//! Section linearization.
//!
//! Sections are copied out of their on-disk locations and laid end to end, each
//! padded to a page boundary, producing an image whose byte offset `o` is the
//! original RVA `first_section_rva + o`.

use crate::error::{Error, Result};
use crate::pe::{read_slice, PeHeaders, SectionHeader, SECTION_HEADER_SIZE};

use tracing::{info, warn};

pub const PAGE_SIZE: u64 = 0x1000;

/// Padded length of a section in the linear image.
///
/// Always adds a full page before masking, so an already aligned size gains an
/// extra page. Relocation offsets depend on this layout.
#[inline]
pub fn page_ceiling(virtual_size: u32) -> u64 {
    (virtual_size as u64 + PAGE_SIZE) & !(PAGE_SIZE - 1)
}

/// Where a section landed in the linear image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionLayout {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    /// Offset of the section's first byte in the linear image.
    pub image_offset: usize,
    /// Bytes the section occupies, including padding.
    pub padded_size: usize,
}

/// Page-padded concatenation of all sections.
#[derive(Clone, Debug)]
pub struct LinearImage {
    pub data: Vec<u8>,
    /// RVA of section 0, the origin of `data`.
    pub first_section_rva: u32,
    /// Unpadded bytes of the section holding the base relocation directory.
    pub relocation_section: Option<Vec<u8>>,
    pub sections: Vec<SectionLayout>,
}

/// Walk the section table and build the linear image.
pub fn linearize(data: &[u8], headers: &PeHeaders) -> Result<LinearImage> {
    let count = headers.number_of_sections as usize;
    info!("PE file contains: {} sections", count);

    if count == 0 {
        return Err(Error::MalformedSection {
            index: 0,
            reason: "no sections",
        });
    }

    let table = headers.section_table_offset();
    let reloc_rva = headers.base_relocation.virtual_address;

    let mut image = Vec::new();
    let mut sections: Vec<SectionLayout> = Vec::with_capacity(count);
    let mut relocation_section = None;

    for index in 0..count {
        let header = SectionHeader::parse(data, table + index * SECTION_HEADER_SIZE)?;

        let name = header.name_str().ok_or(Error::MalformedSection {
            index,
            reason: "empty name",
        })?;

        if let Some(prev) = sections.last() {
            if header.virtual_address <= prev.virtual_address {
                return Err(Error::MalformedSection {
                    index,
                    reason: "virtual address not ascending",
                });
            }
        }

        info!(
            "Section {} has name: {} (RVA 0x{:X}, size 0x{:X})",
            index, name, header.virtual_address, header.virtual_size
        );
        if header.virtual_size == 0 {
            warn!("Section {} ({}) has no virtual size", index, name);
        }

        // Raw size is file-aligned while virtual size is exact, so the virtual
        // extent is what gets copied.
        let raw = read_slice(
            data,
            header.pointer_to_raw_data as usize,
            header.virtual_size as usize,
        )?;

        let image_offset = image.len();
        let padded_size = page_ceiling(header.virtual_size) as usize;
        image.extend_from_slice(raw);
        image.resize(image_offset + padded_size, 0);

        if header.virtual_address == reloc_rva {
            relocation_section = Some(raw.to_vec());
        }

        sections.push(SectionLayout {
            name,
            virtual_address: header.virtual_address,
            virtual_size: header.virtual_size,
            image_offset,
            padded_size,
        });
    }

    Ok(LinearImage {
        data: image,
        first_section_rva: sections[0].virtual_address,
        relocation_section,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::DataDirectory;

    const TABLE: usize = 0x18;

    fn headers(count: u16, reloc_rva: u32) -> PeHeaders {
        PeHeaders {
            pe_offset: 0,
            number_of_sections: count,
            size_of_optional_header: 0,
            image_base: 0x0040_0000,
            base_relocation: DataDirectory {
                virtual_address: reloc_rva,
                size: 0,
            },
        }
    }

    fn put_section(data: &mut [u8], index: usize, name: &[u8], vsize: u32, rva: u32, raw: u32) {
        let at = TABLE + index * SECTION_HEADER_SIZE;
        data[at..at + name.len()].copy_from_slice(name);
        data[at + 8..at + 12].copy_from_slice(&vsize.to_le_bytes());
        data[at + 12..at + 16].copy_from_slice(&rva.to_le_bytes());
        data[at + 16..at + 20].copy_from_slice(&vsize.to_le_bytes());
        data[at + 20..at + 24].copy_from_slice(&raw.to_le_bytes());
    }

    #[test]
    fn test_page_ceiling() {
        assert_eq!(page_ceiling(0), 0x1000);
        assert_eq!(page_ceiling(1), 0x1000);
        assert_eq!(page_ceiling(0xFFF), 0x1000);
        assert_eq!(page_ceiling(0x1000), 0x2000);
        assert_eq!(page_ceiling(0x1001), 0x2000);
        assert_eq!(page_ceiling(u32::MAX), 0x1_0000_0000);
    }

    #[test]
    fn test_linearize_two_sections() {
        let mut data = vec![0u8; 0x400];
        put_section(&mut data, 0, b".text", 0x10, 0x1000, 0x200);
        put_section(&mut data, 1, b".reloc", 0x8, 0x2000, 0x300);
        data[0x200..0x210].fill(0xAA);
        data[0x300..0x308].fill(0xBB);

        let image = linearize(&data, &headers(2, 0x2000)).unwrap();
        assert_eq!(image.first_section_rva, 0x1000);
        assert_eq!(image.data.len(), 0x2000);
        assert!(image.data[..0x10].iter().all(|&b| b == 0xAA));
        assert!(image.data[0x10..0x1000].iter().all(|&b| b == 0));
        assert!(image.data[0x1000..0x1008].iter().all(|&b| b == 0xBB));
        assert_eq!(image.relocation_section, Some(vec![0xBB; 8]));
        assert_eq!(image.sections[1].name, ".reloc");
        assert_eq!(image.sections[1].image_offset, 0x1000);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut data = vec![0u8; 0x400];
        put_section(&mut data, 0, b"", 0x10, 0x1000, 0x200);
        assert!(matches!(
            linearize(&data, &headers(1, 0)),
            Err(Error::MalformedSection { index: 0, reason: "empty name" })
        ));
    }

    #[test]
    fn test_descending_rva_rejected() {
        let mut data = vec![0u8; 0x400];
        put_section(&mut data, 0, b".data", 0x10, 0x2000, 0x200);
        put_section(&mut data, 1, b".text", 0x10, 0x1000, 0x200);
        assert!(matches!(
            linearize(&data, &headers(2, 0)),
            Err(Error::MalformedSection { index: 1, .. })
        ));
    }

    #[test]
    fn test_no_sections() {
        let data = vec![0u8; 0x100];
        assert!(matches!(
            linearize(&data, &headers(0, 0)),
            Err(Error::MalformedSection { reason: "no sections", .. })
        ));
    }

    #[test]
    fn test_section_data_past_end() {
        let mut data = vec![0u8; 0x400];
        put_section(&mut data, 0, b".text", 0x300, 0x1000, 0x200);
        assert!(matches!(
            linearize(&data, &headers(1, 0)),
            Err(Error::TruncatedFile { offset: 0x200, len: 0x300, .. })
        ));
    }
}
