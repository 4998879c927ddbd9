/*++

Licensed under the Apache-2.0 license.

File Name:

   element.rs

Abstract:

    FFFF element table entry handling. Each element describes a region of
    flash memory and the blob stored there, typically a TFTF image.

--*/

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{ensure, Context};
use bootrom_image_types::util;
use bootrom_image_types::*;
use bootrom_tftf::Tftf;
use zerocopy::{AsBytes, FromBytes};

/// What an element table entry points at.
#[derive(Debug, Clone)]
pub enum FfffElementContent {
    /// The end-of-table marker
    EndOfTable,
    /// A described flash region with no parsed blob behind it
    Unpopulated,
    /// A region holding a TFTF image
    Tftf(Box<Tftf>),
}

/// One FFFF element: a table entry plus the blob it wraps.
#[derive(Debug, Clone)]
pub struct FfffElement {
    pub index: usize,
    pub element_type: u32,
    pub element_id: u32,
    pub element_generation: u32,
    pub element_location: u32,
    pub element_length: u32,
    pub content: FfffElementContent,
    erase_block_size: u32,

    // Validation results, rebuilt by each element-table scan
    pub collisions: Vec<usize>,
    pub duplicates: Vec<usize>,
    pub in_range: bool,
    pub aligned: bool,
    pub valid_type: bool,
}

impl FfffElement {
    /// Create an element from explicit fields, with no backing blob.
    pub fn new(
        index: usize,
        erase_block_size: u32,
        element_type: u32,
        element_id: u32,
        element_generation: u32,
        element_location: u32,
        element_length: u32,
    ) -> FfffElement {
        let content = if element_type == FFFF_ELEMENT_END_OF_ELEMENT_TABLE {
            FfffElementContent::EndOfTable
        } else {
            FfffElementContent::Unpopulated
        };
        FfffElement {
            index,
            element_type,
            element_id,
            element_generation,
            element_location,
            element_length,
            content,
            erase_block_size,
            collisions: Vec::new(),
            duplicates: Vec::new(),
            in_range: false,
            aligned: false,
            valid_type: false,
        }
    }

    /// The end-of-table marker that terminates every element table.
    pub fn end_of_table(index: usize, erase_block_size: u32) -> FfffElement {
        FfffElement::new(
            index,
            erase_block_size,
            FFFF_ELEMENT_END_OF_ELEMENT_TABLE,
            0,
            0,
            0,
            0,
        )
    }

    /// Create an element backed by a TFTF file. The element length is the
    /// entire packed length of the TFTF blob, header included, since flash
    /// space accounting depends on total occupied bytes.
    pub fn from_file(
        index: usize,
        erase_block_size: u32,
        element_type: u32,
        element_id: u32,
        element_generation: u32,
        element_location: u32,
        filename: &Path,
    ) -> anyhow::Result<FfffElement> {
        let tftf = Tftf::load_from_file(filename)
            .with_context(|| format!("Bad TFTF file: {}", filename.display()))?;
        ensure!(tftf.is_good(), "Bad TFTF file: {}", filename.display());
        let mut element = FfffElement::new(
            index,
            erase_block_size,
            element_type,
            element_id,
            element_generation,
            element_location,
            tftf.tftf_length() as u32,
        );
        element.content = FfffElementContent::Tftf(Box::new(tftf));
        Ok(element)
    }

    /// Unpack an element from the element table at `offset`, pulling the
    /// wrapped TFTF out of the flash buffer region it names. Returns the
    /// element and a flag indicating the end-of-table marker.
    pub fn unpack(
        index: usize,
        erase_block_size: u32,
        buf: &[u8],
        offset: usize,
    ) -> Option<(FfffElement, bool)> {
        let entry = FfffElementEntry::read_from_prefix(buf.get(offset..)?)?;
        let mut element = FfffElement::new(
            index,
            erase_block_size,
            entry.element_type,
            entry.element_id,
            entry.element_generation,
            entry.element_location,
            entry.element_length,
        );
        if element.is_end_of_table() {
            return Some((element, true));
        }

        let span_start = entry.element_location as usize;
        let span_end = span_start + entry.element_length as usize;
        if span_end <= buf.len() {
            match Tftf::from_buffer(buf[span_start..span_end].to_vec()) {
                Ok(tftf) => element.content = FfffElementContent::Tftf(Box::new(tftf)),
                Err(e) => log::error!("element [{index}] does not hold a TFTF blob: {e:#}"),
            }
        } else {
            log::error!(
                "element [{index}] region {span_start:#x}..{span_end:#x} runs past the flash image"
            );
        }
        Some((element, false))
    }

    /// The packed wire form of this element.
    pub fn entry(&self) -> FfffElementEntry {
        FfffElementEntry {
            element_type: self.element_type,
            element_id: self.element_id,
            element_generation: self.element_generation,
            element_location: self.element_location,
            element_length: self.element_length,
        }
    }

    /// Pack the element into the element table at `offset`, returning the
    /// offset of the next element.
    pub fn pack(&self, buf: &mut [u8], offset: usize) -> usize {
        buf[offset..offset + FFFF_ELT_LENGTH].copy_from_slice(self.entry().as_bytes());
        offset + FFFF_ELT_LENGTH
    }

    pub fn is_end_of_table(&self) -> bool {
        self.element_type == FFFF_ELEMENT_END_OF_ELEMENT_TABLE
    }

    /// Validate the element against an address range.
    ///
    /// The range, alignment and type checks are performed and reported
    /// independently so a caller can display every defect at once; the
    /// returned flag is their conjunction. End-of-table entries are always
    /// valid.
    pub fn validate(&mut self, address_range_low: u32, address_range_high: u32) -> bool {
        if self.is_end_of_table() {
            return true;
        }

        self.in_range = self.element_location >= address_range_low
            && self.element_location < address_range_high;
        if !self.in_range {
            log::error!(
                "Element location {:#x} falls outside address range {:#x}-{:#x}",
                self.element_location,
                address_range_low,
                address_range_high
            );
        }

        self.aligned = self.erase_block_size != 0
            && util::block_aligned(self.element_location, self.erase_block_size);
        if !self.aligned {
            log::error!(
                "Element location {:#x} unaligned to block size {:#x}",
                self.element_location,
                self.erase_block_size
            );
        }

        self.valid_type =
            (FFFF_ELEMENT_TYPE_MIN..=FFFF_ELEMENT_TYPE_MAX).contains(&self.element_type);
        if !self.valid_type {
            log::error!(
                "Element [{}] has invalid type {:#x}",
                self.index,
                self.element_type
            );
        }

        self.in_range && self.aligned && self.valid_type
    }

    /// Record collisions and duplicate keys against another element.
    ///
    /// Two elements collide when their closed byte ranges overlap; they are
    /// duplicates when their (type, id, generation) triples match — at most
    /// one entry with a given triple may be present in the table.
    pub fn validate_against(&mut self, other: &FfffElement) {
        let entry = other.entry();
        self.validate_against_entry(other.index, &entry);
    }

    pub(crate) fn validate_against_entry(&mut self, other_index: usize, other: &FfffElementEntry) {
        let start_a = self.element_location as i64;
        let end_a = start_a + self.element_length as i64 - 1;
        let start_b = other.element_location as i64;
        let end_b = start_b + other.element_length as i64 - 1;
        if end_b >= start_a && start_b <= end_a {
            self.collisions.push(other_index);
        }

        if self.element_type == other.element_type
            && self.element_id == other.element_id
            && self.element_generation == other.element_generation
        {
            self.duplicates.push(other_index);
        }
    }

    /// Determine if this element is identical to another.
    pub fn same_as(&self, other: &FfffElement) -> bool {
        self.element_type == other.element_type
            && self.element_id == other.element_id
            && self.element_generation == other.element_generation
            && self.element_location == other.element_location
            && self.element_length == other.element_length
    }

    /// Write the element's flash region out as a separate file.
    pub fn write(&self, buf: &[u8], filename: &Path) -> anyhow::Result<()> {
        let start = self.element_location as usize;
        let end = start + self.element_length as usize;
        ensure!(
            end <= buf.len(),
            "element [{}] region runs past the flash image",
            self.index
        );
        fs::write(filename, &buf[start..end])
            .with_context(|| format!("Unable to write {}", filename.display()))?;
        log::info!("Wrote {}", filename.display());
        Ok(())
    }

    /// Convert an element type into textual form
    pub fn element_name(element_type: u32) -> &'static str {
        FfffElementType::from_raw(element_type)
            .map(FfffElementType::name)
            .unwrap_or("?")
    }

    /// Convert an element type into short textual form
    pub fn element_short_name(element_type: u32) -> &'static str {
        FfffElementType::from_raw(element_type)
            .map(FfffElementType::short_name)
            .unwrap_or("?")
    }

    /// Print the element table column names
    pub fn display_table_header() {
        println!("     Type       ID         Generation Location   Length");
    }

    /// Print the element in numeric form, optionally expanding the type
    pub fn display(&self, expand_type: bool) {
        let mut line = format!(
            "  {:2} 0x{:08x} 0x{:08x} 0x{:08x} 0x{:08x} 0x{:08x}",
            self.index,
            self.element_type,
            self.element_id,
            self.element_generation,
            self.element_location,
            self.element_length
        );
        if expand_type {
            line += &format!(" ({})", Self::element_name(self.element_type));
        }
        println!("{line}");

        if !self.collisions.is_empty() {
            let mut line = "           Collides with element(s):".to_string();
            for collision in &self.collisions {
                line += &format!(" {collision}");
            }
            println!("{line}");
        }
        if !self.duplicates.is_empty() {
            let mut line = "           Duplicates element(s):".to_string();
            for duplicate in &self.duplicates {
                line += &format!(" {duplicate}");
            }
            println!("{line}");
        }

        let mut defects = String::new();
        if !self.in_range {
            defects += "Out-of-range ";
        }
        if !self.aligned {
            defects += "Misaligned ";
        }
        if !self.valid_type {
            defects += "Invalid-type ";
        }
        if !defects.is_empty() && !self.is_end_of_table() {
            log::error!("{defects}");
        }
    }

    /// Print the wrapped TFTF for this element
    pub fn display_element_data(&self, _header_index: Option<usize>) {
        if let FfffElementContent::Tftf(tftf) = &self.content {
            let title = format!("element [{}]", self.index);
            tftf.display(Some(&title), "  ");
            tftf.display_data(Some(&title), "  ");
        }
    }

    /// Write the payload map entries for this element
    pub fn write_map_payload<W: Write>(&self, w: &mut W, prefix: &str) -> std::io::Result<()> {
        let element_name = format!(
            "{prefix}element[{}].{}",
            self.index,
            Self::element_short_name(self.element_type)
        );
        match &self.content {
            FfffElementContent::Tftf(tftf) => {
                tftf.write_map(w, self.element_location as usize, &element_name)
            }
            FfffElementContent::Unpopulated => {
                writeln!(w, "{element_name}  {:08x}", self.element_location)
            }
            FfffElementContent::EndOfTable => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(
        index: usize,
        element_type: u32,
        id: u32,
        generation: u32,
        location: u32,
        length: u32,
    ) -> FfffElement {
        FfffElement::new(index, 1024, element_type, id, generation, location, length)
    }

    #[test]
    fn test_end_of_table_always_valid() {
        let mut eot = FfffElement::end_of_table(0, 1024);
        assert!(eot.validate(0x1000, 0x2000));
    }

    #[test]
    fn test_validate_reports_each_defect() {
        // Out of range, misaligned and invalid type all at once
        let mut bad = element(0, 0x77, 1, 1, 0x1401, 0x100);
        assert!(!bad.validate(0x2000, 0x10000));
        assert!(!bad.in_range);
        assert!(!bad.aligned);
        assert!(!bad.valid_type);

        // In range and aligned, but invalid type: the other checks still
        // report good standing
        let mut bad_type = element(1, 0x77, 1, 1, 0x2000, 0x100);
        assert!(!bad_type.validate(0x2000, 0x10000));
        assert!(bad_type.in_range);
        assert!(bad_type.aligned);
        assert!(!bad_type.valid_type);

        let mut good = element(2, FfffElementType::Stage2FirmwarePackage.raw(), 1, 1, 0x2000, 0x100);
        assert!(good.validate(0x2000, 0x10000));
    }

    #[test]
    fn test_validate_against_collision() {
        let a_type = FfffElementType::Stage2FirmwarePackage.raw();
        let mut a = element(0, a_type, 1, 0, 0x2000, 0x1000);
        let b = element(1, a_type, 2, 0, 0x2fff, 0x1000);
        a.validate_against(&b);
        assert_eq!(a.collisions, vec![1]);
        assert!(a.duplicates.is_empty());

        // Adjacent ranges (end_a + 1 == start_b) do not collide
        let mut a = element(0, a_type, 1, 0, 0x2000, 0x1000);
        let c = element(1, a_type, 2, 0, 0x3000, 0x1000);
        a.validate_against(&c);
        assert!(a.collisions.is_empty());
    }

    #[test]
    fn test_validate_against_duplicate_triple() {
        let a_type = FfffElementType::Data.raw();
        // Same (type, id, generation), disjoint locations and lengths
        let mut a = element(0, a_type, 7, 3, 0x2000, 0x100);
        let b = element(1, a_type, 7, 3, 0x8000, 0x2345);
        a.validate_against(&b);
        assert_eq!(a.duplicates, vec![1]);
        assert!(a.collisions.is_empty());

        // Different generation is not a duplicate
        let mut a = element(0, a_type, 7, 3, 0x2000, 0x100);
        let c = element(1, a_type, 7, 4, 0x8000, 0x2345);
        a.validate_against(&c);
        assert!(a.duplicates.is_empty());
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let src = element(0, FfffElementType::Data.raw(), 5, 2, 0, 0);
        let mut buf = vec![0u8; 0x40];
        let next = src.pack(&mut buf, 0);
        assert_eq!(next, FFFF_ELT_LENGTH);
        let (unpacked, eot) = FfffElement::unpack(0, 1024, &buf, 0).unwrap();
        assert!(!eot);
        assert!(unpacked.same_as(&src));

        let (unpacked, eot) =
            FfffElement::unpack(1, 1024, &buf, FFFF_ELT_LENGTH).unwrap();
        assert!(!eot);
        assert_eq!(unpacked.element_type, 0);

        let eot_elem = FfffElement::end_of_table(2, 1024);
        let mut buf = vec![0u8; 0x20];
        eot_elem.pack(&mut buf, 0);
        let (_, eot) = FfffElement::unpack(2, 1024, &buf, 0).unwrap();
        assert!(eot);
    }

    #[test]
    fn test_same_as_ignores_diagnostics() {
        let a_type = FfffElementType::Data.raw();
        let mut a = element(0, a_type, 1, 1, 0x2000, 0x100);
        let b = element(5, a_type, 1, 1, 0x2000, 0x100);
        a.collisions.push(3);
        assert!(a.same_as(&b));

        let c = element(0, a_type, 1, 2, 0x2000, 0x100);
        assert!(!a.same_as(&c));
    }
}
