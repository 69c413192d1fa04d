//! Flattening pipeline.
//!
//! Ties the stages together in one forward pass:
//! 1. Validate the DOS and PE32 headers
//! 2. Linearize sections into a page-padded image
//! 3. Apply base relocations for the flatten base
//! 4. Emit the image
//!
//! Everything up to emission happens in memory, so a format error never
//! produces output.

use crate::emit::{emit, write_output};
use crate::error::{Error, Result};
use crate::pe::PeHeaders;
use crate::reloc::{apply_relocations, Rebase, RelocationStats};
use crate::section::{linearize, SectionLayout};

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

/// Default output file name.
pub const DEFAULT_OUTPUT: &str = "output.bin";

/// Configuration for a flatten run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlattenConfig {
    /// Address the flat image will be loaded at.
    pub flatten_base: u32,
    /// Output file path.
    pub output: PathBuf,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            flatten_base: 0,
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

/// What a flatten run did.
#[derive(Clone, Debug)]
pub struct FlattenReport {
    pub image_base: u32,
    pub flatten_base: u32,
    pub first_section_rva: u32,
    pub sections: Vec<SectionLayout>,
    pub relocations: RelocationStats,
    /// Length of the emitted image.
    pub image_len: usize,
}

/// Flattens one PE32 file.
pub struct Flattener {
    /// Entire input file. Never modified.
    data: Vec<u8>,
}

impl Flattener {
    /// Load the input file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_bytes(std::fs::read(path.as_ref())?)
    }

    /// Wrap an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyFile);
        }
        Ok(Self { data })
    }

    /// Raw input bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Build the relocated flat image.
    pub fn flatten(&self, flatten_base: u32) -> Result<(Vec<u8>, FlattenReport)> {
        let headers = PeHeaders::parse(&self.data)?;
        let directory = headers.base_relocation;
        info!(
            "Image base 0x{:X}, relocation directory at RVA 0x{:X} (0x{:X} bytes)",
            headers.image_base, directory.virtual_address, directory.size
        );

        let mut image = linearize(&self.data, &headers)?;

        let rebase = Rebase {
            image_base: headers.image_base,
            flatten_base,
            first_section_rva: image.first_section_rva,
        };

        let relocations = if directory.size == 0 {
            info!("No base relocations, image left as linearized");
            RelocationStats::default()
        } else {
            let relocs =
                image
                    .relocation_section
                    .as_deref()
                    .ok_or(Error::MalformedRelocation {
                        offset: 0,
                        reason: "no section at relocation directory RVA",
                    })?;
            apply_relocations(&mut image.data, relocs, directory.size, &rebase)?
        };

        let report = FlattenReport {
            image_base: headers.image_base,
            flatten_base,
            first_section_rva: image.first_section_rva,
            sections: image.sections,
            relocations,
            image_len: image.data.len(),
        };

        Ok((image.data, report))
    }

    /// Flatten and write the image to `sink`.
    pub fn flatten_to<W: Write>(&self, flatten_base: u32, sink: &mut W) -> Result<FlattenReport> {
        let (image, report) = self.flatten(flatten_base)?;
        emit(&image, sink)?;
        Ok(report)
    }

    /// Flatten and atomically write the image to `config.output`.
    pub fn flatten_to_file(&self, config: &FlattenConfig) -> Result<FlattenReport> {
        let (image, report) = self.flatten(config.flatten_base)?;
        write_output(&config.output, &image)?;
        info!("Wrote flattened binary to {}", config.output.display());
        Ok(report)
    }
}

/// Read `input`, flatten it and write the result per `config`.
pub fn flatten_file<P: AsRef<Path>>(input: P, config: &FlattenConfig) -> Result<FlattenReport> {
    Flattener::from_file(input)?.flatten_to_file(config)
}
