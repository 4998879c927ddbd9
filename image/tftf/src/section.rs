/*++

Licensed under the Apache-2.0 license.

File Name:

   section.rs

Abstract:

    TFTF section table entry handling.

--*/

use std::fs;
use std::path::Path;

use anyhow::Context;
use bootrom_image_types::*;
use zerocopy::{AsBytes, FromBytes};

use crate::signature::SignatureBlock;

/// One TFTF section: a table entry describing a sub-range of the blob's
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftfSection {
    pub section_type: TftfSectionType,
    pub section_class: u32,
    pub section_id: u32,
    pub section_length: u32,
    pub load_address: u32,
    pub expanded_length: u32,
}

impl TftfSection {
    /// Create a section from explicit fields. Signature and certificate
    /// sections are pinned to the no-load-address placeholder.
    pub fn new(
        section_type: TftfSectionType,
        section_class: u32,
        section_id: u32,
        section_length: u32,
        load_address: u32,
        expanded_length: u32,
    ) -> TftfSection {
        let load_address = if section_type.has_load_address() {
            load_address
        } else {
            TFTF_SECTION_NO_LOAD_ADDRESS
        };
        TftfSection {
            section_type,
            section_class,
            section_id,
            section_length,
            load_address,
            expanded_length,
        }
    }

    /// Create a section sized from a source file.
    pub fn from_file(
        section_type: TftfSectionType,
        section_class: u32,
        section_id: u32,
        load_address: u32,
        filename: &Path,
    ) -> anyhow::Result<TftfSection> {
        let metadata = fs::metadata(filename)
            .with_context(|| format!("file {} is invalid or missing", filename.display()))?;
        // TODO: section_length will differ from expanded_length once
        // compressed sections are supported.
        let length = metadata.len() as u32;
        Ok(TftfSection::new(
            section_type,
            section_class,
            section_id,
            length,
            load_address,
            length,
        ))
    }

    /// The end-of-table marker that terminates every section table.
    pub fn end_of_table() -> TftfSection {
        TftfSection::new(TftfSectionType::EndOfDescriptors, 0, 0, 0, 0, 0)
    }

    pub fn is_end_of_table(&self) -> bool {
        self.section_type == TftfSectionType::EndOfDescriptors
    }

    /// The packed wire form of this section.
    pub fn entry(&self) -> TftfSectionEntry {
        TftfSectionEntry {
            type_class: TftfSectionEntry::pack_type_class(
                self.section_type.raw(),
                self.section_class,
            ),
            section_id: self.section_id,
            section_length: self.section_length,
            load_address: self.load_address,
            expanded_length: self.expanded_length,
        }
    }

    /// Build a section from a wire entry; `None` for an unrecognized type.
    pub fn from_entry(entry: &TftfSectionEntry) -> Option<TftfSection> {
        let section_type = TftfSectionType::from_raw(entry.section_type())?;
        Some(TftfSection {
            section_type,
            section_class: entry.section_class(),
            section_id: entry.section_id,
            section_length: entry.section_length,
            load_address: entry.load_address,
            expanded_length: entry.expanded_length,
        })
    }

    /// Unpack a section from a header buffer. Fails softly: `None` means the
    /// entry's type is not recognized and the table scan should stop.
    pub fn unpack(buf: &[u8], offset: usize) -> Option<TftfSection> {
        let entry = TftfSectionEntry::read_from_prefix(buf.get(offset..)?)?;
        TftfSection::from_entry(&entry)
    }

    /// Pack the section into a header buffer at `offset`, returning the
    /// offset of the next section.
    pub fn pack(&self, buf: &mut [u8], offset: usize) -> usize {
        buf[offset..offset + TFTF_SECTION_LEN].copy_from_slice(self.entry().as_bytes());
        offset + TFTF_SECTION_LEN
    }

    /// Print the section table column names
    pub fn display_table_header(indent: &str) {
        println!("{indent}     Type Class  ID       Length   Load     Exp.Len");
    }

    /// Print a one-line summary of the section
    pub fn display(&self, indent: &str, index: usize, expand_type: bool) {
        let mut line = format!(
            "{indent}  {index:2} {:02x}   {:06x} {:08x} {:08x} {:08x} {:08x}",
            self.section_type.raw(),
            self.section_class,
            self.section_id,
            self.section_length,
            self.load_address,
            self.expanded_length
        );
        if expand_type {
            line += &format!(" ({})", self.section_type.name());
        }
        println!("{line}");
    }

    /// Print the payload referenced by this section
    pub fn display_data(&self, blob: &[u8], title: &str, indent: &str) {
        println!(
            "{indent}{title}({} bytes): {}",
            self.section_length,
            self.section_type.name()
        );

        if self.section_type == TftfSectionType::Signature {
            // Signature payloads have a known format which we can break down
            match SignatureBlock::unpack(blob) {
                Ok(block) => block.display(indent),
                Err(e) => {
                    log::error!("bad signature section payload: {e:#}");
                    util::display_binary_data(blob, false, &format!("{indent} "));
                }
            }
        } else {
            util::display_binary_data(blob, false, &format!("{indent} "));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let section = TftfSection::new(TftfSectionType::RawCode, 0x1234, 7, 0x200, 0x1000, 0x200);
        let mut buf = vec![0u8; 64];
        let next = section.pack(&mut buf, 20);
        assert_eq!(next, 40);
        let unpacked = TftfSection::unpack(&buf, 20).unwrap();
        assert_eq!(unpacked, section);
    }

    #[test]
    fn test_signature_section_load_address_placeholder() {
        let section = TftfSection::new(TftfSectionType::Signature, 0, 0, 0x150, 0x1000, 0x150);
        assert_eq!(section.load_address, TFTF_SECTION_NO_LOAD_ADDRESS);
        let section = TftfSection::new(TftfSectionType::Certificate, 0, 0, 0x100, 0, 0x100);
        assert_eq!(section.load_address, TFTF_SECTION_NO_LOAD_ADDRESS);
        let section = TftfSection::new(TftfSectionType::RawData, 0, 0, 0x100, 0x2000, 0x100);
        assert_eq!(section.load_address, 0x2000);
    }

    #[test]
    fn test_unpack_rejects_unknown_type() {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x42;
        assert!(TftfSection::unpack(&buf, 0).is_none());
    }

    #[test]
    fn test_unpack_short_buffer() {
        let buf = vec![0u8; 10];
        assert!(TftfSection::unpack(&buf, 0).is_none());
    }
}
