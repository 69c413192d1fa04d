//! PE32 header parsing.
//!
//! Every field is read through bounds-checked little-endian readers rather than
//! by overlaying structs on the input, since the file is untrusted. Only the
//! handful of fields the flattener needs are decoded.

use crate::error::{Error, Result};

// PE format constants
pub const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
pub const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
pub const PE32_MAGIC: u16 = 0x010B;

/// Offset of `e_lfanew` within the DOS header.
pub const DOS_LFANEW_OFFSET: usize = 0x3C;

// Offsets relative to the PE signature.
pub const NUMBER_OF_SECTIONS_OFFSET: usize = 0x06;
pub const SIZE_OF_OPTIONAL_HEADER_OFFSET: usize = 0x14;
/// PE signature plus COFF file header.
pub const PE_HEADER_SIZE: usize = 0x18;
pub const MAGIC_OFFSET: usize = 0x18;
pub const IMAGE_BASE_OFFSET: usize = 0x34;
/// `IMAGE_DIRECTORY_ENTRY_BASERELOC` for a PE32 optional header.
pub const BASE_RELOC_DIRECTORY_OFFSET: usize = 0xA0;

/// Size of one section table record.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Read `N` bytes at `offset`, failing with [`Error::TruncatedFile`] past the end.
fn read_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    let end = offset
        .checked_add(N)
        .filter(|&end| end <= data.len())
        .ok_or(Error::TruncatedFile {
            offset,
            len: N,
            size: data.len(),
        })?;

    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[offset..end]);
    Ok(buf)
}

/// Read a little-endian `u16` at `offset`.
pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_array(data, offset).map(u16::from_le_bytes)
}

/// Read a little-endian `u32` at `offset`.
pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_array(data, offset).map(u32::from_le_bytes)
}

/// Borrow `len` bytes at `offset`.
pub fn read_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(Error::TruncatedFile {
            offset,
            len,
            size: data.len(),
        })
}

/// Data directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    fn parse(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            virtual_address: read_u32(data, offset)?,
            size: read_u32(data, offset + 4)?,
        })
    }
}

/// Validated PE32 header fields.
#[derive(Clone, Debug)]
pub struct PeHeaders {
    /// Offset to PE signature (e_lfanew).
    pub pe_offset: usize,
    /// Number of sections.
    pub number_of_sections: u16,
    /// Size of optional header.
    pub size_of_optional_header: u16,
    /// Preferred image base.
    pub image_base: u32,
    /// Base relocation directory.
    pub base_relocation: DataDirectory,
}

impl PeHeaders {
    /// Validate the DOS and PE headers and pull out the fields needed for flattening.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if read_u16(data, 0)? != DOS_MAGIC {
            return Err(Error::InvalidFormat("no MZ header"));
        }

        let pe_offset = read_u32(data, DOS_LFANEW_OFFSET)? as usize;
        if read_u32(data, pe_offset)? != PE_SIGNATURE {
            return Err(Error::InvalidFormat("no PE signature"));
        }

        let field = |offset: usize| pe_offset.checked_add(offset).ok_or(Error::TruncatedFile {
            offset: pe_offset,
            len: offset,
            size: data.len(),
        });

        // PE32+ shares the signature but lays the optional header out differently.
        if read_u16(data, field(MAGIC_OFFSET)?)? != PE32_MAGIC {
            return Err(Error::InvalidFormat("not PE32"));
        }

        let size_of_optional_header = read_u16(data, field(SIZE_OF_OPTIONAL_HEADER_OFFSET)?)?;
        if (size_of_optional_header as usize) < BASE_RELOC_DIRECTORY_OFFSET + 8 - PE_HEADER_SIZE {
            return Err(Error::InvalidFormat(
                "optional header too small for relocation directory",
            ));
        }

        Ok(Self {
            pe_offset,
            number_of_sections: read_u16(data, field(NUMBER_OF_SECTIONS_OFFSET)?)?,
            size_of_optional_header,
            image_base: read_u32(data, field(IMAGE_BASE_OFFSET)?)?,
            base_relocation: DataDirectory::parse(data, field(BASE_RELOC_DIRECTORY_OFFSET)?)?,
        })
    }

    /// File offset of the first section header.
    pub fn section_table_offset(&self) -> usize {
        self.pe_offset + PE_HEADER_SIZE + self.size_of_optional_header as usize
    }
}

/// Section header (40 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Read the section header record at `offset`.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let record = read_slice(data, offset, SECTION_HEADER_SIZE)?;

        Ok(Self {
            name: read_array(record, 0)?,
            virtual_size: read_u32(record, 8)?,
            virtual_address: read_u32(record, 12)?,
            size_of_raw_data: read_u32(record, 16)?,
            pointer_to_raw_data: read_u32(record, 20)?,
            pointer_to_relocations: read_u32(record, 24)?,
            pointer_to_linenumbers: read_u32(record, 28)?,
            number_of_relocations: read_u16(record, 32)?,
            number_of_linenumbers: read_u16(record, 34)?,
            characteristics: read_u32(record, 36)?,
        })
    }

    /// Section name up to the first NUL, or `None` if the name is empty.
    ///
    /// Names of exactly eight characters carry no terminator.
    pub fn name_str(&self) -> Option<String> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        if end == 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.name[..end]).into_owned())
    }
}
