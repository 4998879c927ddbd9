/*++

Licensed under the Apache-2.0 license.

File Name:

   header.rs

Abstract:

    One FFFF header: the fixed fields, the element table and the validity
    state machine. A header is a view at a byte offset into the shared
    flash buffer; it owns parsed state only, and every buffer operation
    takes the buffer as a parameter.

--*/

use std::io::Write;

use anyhow::{bail, ensure, Context};
use bootrom_image_types::util;
use bootrom_image_types::*;
use zerocopy::{AsBytes, FromBytes};

use crate::element::{FfffElement, FfffElementContent};

/// One FFFF header and its element table.
///
/// The overall flash image carries two of these, one per header block; see
/// `FfffRomImage`.
#[derive(Debug, Clone)]
pub struct Ffff {
    pub header_offset: usize,
    layout: FfffLayout,

    pub sentinel: [u8; FFFF_SENTINEL_LENGTH],
    pub timestamp: String,
    pub flash_image_name: String,
    pub flash_capacity: u32,
    pub erase_block_size: u32,
    pub header_size: u32,
    pub flash_image_length: u32,
    pub header_generation_number: u32,
    pub reserved: Vec<u32>,
    pub elements: Vec<FfffElement>,
    pub tail_sentinel: [u8; FFFF_SENTINEL_LENGTH],

    // Element-table scan results
    pub collisions: Vec<Vec<isize>>,
    pub duplicates: Vec<Vec<usize>>,
    collisions_found: bool,
    duplicates_found: bool,
    invalid_elements_found: bool,
    header_validity: FfffValidity,

    element_location_min: u32,
    element_location_max: u32,
}

impl Ffff {
    /// Create a header view at `header_offset`, salted with the end-of-table
    /// element.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header_offset: usize,
        flash_image_name: &str,
        flash_capacity: u32,
        erase_block_size: u32,
        image_length: u32,
        header_generation_number: u32,
        header_size: u32,
    ) -> anyhow::Result<Ffff> {
        let layout =
            FfffLayout::for_header_size(header_size).context("FFFF header size is out of range")?;
        let element_location_min = 2 * ffff_header_block_size(erase_block_size);
        Ok(Ffff {
            header_offset,
            layout,
            sentinel: [0u8; FFFF_SENTINEL_LENGTH],
            timestamp: String::new(),
            flash_image_name: flash_image_name.to_string(),
            flash_capacity,
            erase_block_size,
            header_size,
            flash_image_length: image_length,
            header_generation_number,
            reserved: vec![0u32; layout.reserved_count],
            elements: vec![FfffElement::end_of_table(0, erase_block_size)],
            tail_sentinel: [0u8; FFFF_SENTINEL_LENGTH],
            collisions: Vec::new(),
            duplicates: Vec::new(),
            collisions_found: false,
            duplicates_found: false,
            invalid_elements_found: false,
            header_validity: FfffValidity::Invalid,
            element_location_min,
            element_location_max: image_length,
        })
    }

    pub fn layout(&self) -> &FfffLayout {
        &self.layout
    }

    pub fn header_validity(&self) -> FfffValidity {
        self.header_validity
    }

    pub fn collisions_found(&self) -> bool {
        self.collisions_found
    }

    pub fn duplicates_found(&self) -> bool {
        self.duplicates_found
    }

    /// Size of this header's block: the smallest power-of-two multiple of
    /// the erase block size exceeding the minimal header length.
    pub fn header_block_size(&self) -> u32 {
        ffff_header_block_size(self.erase_block_size)
    }

    /// Unpack the header fields and element table from the flash buffer,
    /// then classify validity.
    pub fn unpack(&mut self, buf: &[u8]) {
        let Some(fixed) = FfffHeaderFixed::read_from_prefix(&buf[self.header_offset..]) else {
            log::error!("flash buffer is too short to hold an FFFF header");
            self.header_validity = FfffValidity::Invalid;
            return;
        };
        self.sentinel = fixed.sentinel;
        self.timestamp = util::unpacked_string(&fixed.timestamp);
        self.flash_image_name = util::unpacked_string(&fixed.flash_image_name);
        self.flash_capacity = fixed.flash_capacity;
        self.erase_block_size = fixed.erase_block_size;
        self.header_size = fixed.header_size;
        self.flash_image_length = fixed.flash_image_length;
        self.header_generation_number = fixed.header_generation_number;

        // The on-disk header size governs the element table sizing and the
        // offsets of everything after the reserved words.
        match FfffLayout::for_header_size(self.header_size) {
            Some(layout) if self.header_offset + layout.header_size <= buf.len() => {
                self.layout = layout;
            }
            _ => {
                log::error!("FFFF header size {:#x} is out of range", self.header_size);
                self.validate_ffff_header(buf);
                return;
            }
        }

        let span =
            &buf[self.header_offset..self.header_offset + self.layout.header_size];
        if util::is_constant_fill(span, 0) || util::is_constant_fill(span, 0xff) {
            // Nothing to parse; classification happens below.
            self.validate_ffff_header(buf);
            return;
        }

        let tail_off = self.header_offset + self.layout.tail_sentinel_offset;
        self.tail_sentinel
            .copy_from_slice(&buf[tail_off..tail_off + FFFF_SENTINEL_LENGTH]);

        self.reserved = (0..self.layout.reserved_count)
            .map(|i| {
                let off = self.header_offset + self.layout.reserved_offset + i * FFFF_RSVD_SIZE;
                u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
            })
            .collect();

        // The flash range available to elements
        self.element_location_min = 2 * self.header_block_size();
        self.element_location_max = self.flash_capacity;

        // Parse the element table
        self.elements.clear();
        let mut offset = self.header_offset + self.layout.element_table_offset;
        for index in 0..self.layout.element_capacity {
            let Some((element, eot)) =
                FfffElement::unpack(index, self.erase_block_size, buf, offset)
            else {
                break;
            };
            self.elements.push(element);
            offset += FFFF_ELT_LENGTH;
            if eot {
                break;
            }
        }
        self.validate_ffff_header(buf);
    }

    /// Pack the header fields and element table into the flash buffer.
    pub fn pack(&self, buf: &mut [u8]) {
        let fixed = FfffHeaderFixed {
            sentinel: self.sentinel,
            timestamp: util::packed_string(&self.timestamp),
            flash_image_name: util::packed_string(&self.flash_image_name),
            flash_capacity: self.flash_capacity,
            erase_block_size: self.erase_block_size,
            header_size: self.header_size,
            flash_image_length: self.flash_image_length,
            header_generation_number: self.header_generation_number,
        };
        buf[self.header_offset..self.header_offset + FFFF_HDR_LEN_FIXED_PART]
            .copy_from_slice(fixed.as_bytes());

        for i in 0..self.layout.reserved_count {
            let word = self.reserved.get(i).copied().unwrap_or(0);
            let off = self.header_offset + self.layout.reserved_offset + i * FFFF_RSVD_SIZE;
            buf[off..off + 4].copy_from_slice(&word.to_le_bytes());
        }

        let mut offset = self.header_offset + self.layout.element_table_offset;
        for element in &self.elements {
            offset = element.pack(buf, offset);
        }

        let tail_off = self.header_offset + self.layout.tail_sentinel_offset;
        buf[tail_off..tail_off + FFFF_SENTINEL_LENGTH].copy_from_slice(&self.tail_sentinel);
    }

    /// Add an element to the table.
    ///
    /// The element is recorded in the table only; its blob reaches the flash
    /// buffer when `post_process` runs, once every location is final. Do not
    /// call this directly on a header that is half of a ROM image: the
    /// `FfffRomImage` operation applies the mutation to both header views.
    pub fn add_element(&mut self, mut element: FfffElement) -> anyhow::Result<()> {
        let num_elements = self.elements.len();
        ensure!(
            num_elements < self.layout.element_capacity,
            "too many elements"
        );
        if element.is_end_of_table() {
            if num_elements == 0 {
                element.index = 0;
                self.elements.push(element);
            }
            return Ok(());
        }

        // The table always ends in the end-of-table marker, so new elements
        // are inserted just in front of it.
        self.elements.insert(num_elements - 1, element);
        for (index, element) in self.elements.iter_mut().enumerate() {
            element.index = index;
        }
        Ok(())
    }

    /// Check the element table: per-element validity, collisions with the
    /// header blocks, inter-element collisions and duplicate
    /// (type, id, generation) keys. Every defect found is reported.
    pub fn validate_element_table(&mut self) -> bool {
        self.collisions.clear();
        self.collisions_found = false;
        self.duplicates.clear();
        self.duplicates_found = false;
        self.invalid_elements_found = false;

        let entries: Vec<FfffElementEntry> = self.elements.iter().map(|e| e.entry()).collect();
        let header_span = 2 * self.header_block_size();
        let (location_min, location_max) = (self.element_location_min, self.element_location_max);

        for i in 0..self.elements.len() {
            if self.elements[i].is_end_of_table() {
                break;
            }
            let mut collision: Vec<isize> = Vec::new();

            self.elements[i].collisions.clear();
            self.elements[i].duplicates.clear();
            if !self.elements[i].validate(location_min, location_max) {
                self.invalid_elements_found = true;
            }

            // A location below the second header block tramples the headers
            if self.elements[i].element_location < header_span {
                self.collisions_found = true;
                collision.push(FFFF_HEADER_COLLISION);
                log::error!(
                    "Element at location {:#x} collides with two header blocks of size {:#x}",
                    self.elements[i].element_location,
                    header_span
                );
            }

            for (j, entry) in entries.iter().enumerate() {
                if i == j {
                    continue;
                }
                if entry.element_type == FFFF_ELEMENT_END_OF_ELEMENT_TABLE {
                    break;
                }
                self.elements[i].validate_against_entry(j, entry);
            }

            collision.extend(self.elements[i].collisions.iter().map(|&j| j as isize));
            if !self.elements[i].collisions.is_empty() {
                self.collisions_found = true;
            }
            if !self.elements[i].duplicates.is_empty() {
                self.duplicates_found = true;
            }
            let duplicate = self.elements[i].duplicates.clone();
            self.collisions.push(collision);
            self.duplicates.push(duplicate);
        }

        if self.collisions_found {
            log::error!("Found collisions in FFFF element table!");
        }
        if self.duplicates_found {
            log::error!("Found duplicates in FFFF element table!");
        }
        if self.invalid_elements_found {
            log::error!("Found invalid elements in FFFF element table!");
        }
        !self.collisions_found && !self.duplicates_found && !self.invalid_elements_found
    }

    /// Classify the header as VALID, ERASED or INVALID.
    ///
    /// The checks run in a fixed order and stop at the first failure, each
    /// failure reported distinctly.
    pub fn validate_ffff_header(&mut self, buf: &[u8]) -> FfffValidity {
        self.header_validity = FfffValidity::Valid;

        // An erased header block is its own state, not merely invalid
        let span_end = (self.header_offset + self.layout.header_size).min(buf.len());
        let span = &buf[self.header_offset.min(span_end)..span_end];
        if util::is_constant_fill(span, 0) || util::is_constant_fill(span, 0xff) {
            log::error!("FFFF header validates as erased.");
            self.header_validity = FfffValidity::Erased;
            return self.header_validity;
        }

        if self.sentinel != FFFF_SENTINEL || self.tail_sentinel != FFFF_SENTINEL {
            log::error!("Invalid sentinel");
            self.header_validity = FfffValidity::Invalid;
            return self.header_validity;
        }

        if !(FFFF_HEADER_SIZE_MIN..=FFFF_HEADER_SIZE_MAX).contains(&self.header_size) {
            log::error!("header_size is out of range");
            self.header_validity = FfffValidity::Invalid;
            return self.header_validity;
        }

        if !util::is_power_of_2(self.erase_block_size) {
            log::error!("Erase block size must be 2**n");
            self.header_validity = FfffValidity::Invalid;
            return self.header_validity;
        }

        if self.flash_image_length % self.erase_block_size != 0 {
            log::error!("Image length is not a multiple of erase block size");
            self.header_validity = FfffValidity::Invalid;
            return self.header_validity;
        }

        for rsvd in &self.reserved {
            if *rsvd != 0 {
                log::error!("Reserved fields are non-zero");
                self.header_validity = FfffValidity::Invalid;
                return self.header_validity;
            }
        }

        // The unused tail of the element table must be zero-filled
        let span_start = self.header_offset
            + self.layout.element_table_offset
            + self.elements.len() * FFFF_ELT_LENGTH;
        let span_end = self.header_offset + self.layout.tail_sentinel_offset;
        if span_start <= span_end && span_end <= buf.len() {
            if !util::is_constant_fill(&buf[span_start..span_end], 0) {
                log::error!(
                    "Unused portions of FFFF header are non-zero: ({span_start:#x}-{span_end:#x})"
                );
                self.header_validity = FfffValidity::Invalid;
                return self.header_validity;
            }
        }

        if !self.validate_element_table() {
            log::error!("Invalid element table.");
            self.header_validity = FfffValidity::Invalid;
        }

        self.header_validity
    }

    /// Close out a built header.
    ///
    /// Elements whose location is unset are assigned the next free offset,
    /// rounding the end of the previous element up to the erase-block
    /// boundary. When the assignment would reach or exceed a fixed flash
    /// image length, that is a fatal sizing error. With every location
    /// final, the element blobs are copied into the flash buffer, the
    /// sentinels and timestamp are stamped, the header is packed and the
    /// validity recomputed.
    pub fn post_process(&mut self, buf: &mut Vec<u8>, timestamp: &str) -> anyhow::Result<()> {
        let erase_block_size = self.erase_block_size;
        let mut location = match self.elements.first() {
            Some(element) if element.element_location != 0 => element.element_location,
            _ => util::next_boundary(self.element_location_min, erase_block_size),
        };

        for index in 0..self.elements.len() {
            self.elements[index].index = index;
            if self.elements[index].is_end_of_table() {
                break;
            }
            if self.elements[index].element_location == 0 {
                self.elements[index].element_location = location;
                log::info!("Note: Assuming element [{index}] loads at {location:#010x}");
            }
            let element_location = self.elements[index].element_location;
            let element_length = self.elements[index].element_length;
            let element_end = element_location as u64 + element_length as u64;
            if self.flash_image_length != 0 && element_end >= self.flash_image_length as u64 {
                bail!(
                    "element location {:#x} + element length {:#x} exceeds image length {:#x}",
                    element_location,
                    element_length,
                    self.flash_image_length
                );
            }
            location = util::next_boundary(element_end as u32, erase_block_size);
        }

        if self.flash_image_length == 0 {
            self.flash_image_length = location;
        }
        self.element_location_max = self.flash_image_length;
        ensure!(
            self.flash_image_length as usize >= self.header_offset + self.layout.header_size,
            "image length {:#x} cannot hold the header at offset {:#x}",
            self.flash_image_length,
            self.header_offset
        );
        if buf.len() < self.flash_image_length as usize {
            buf.resize(self.flash_image_length as usize, 0);
        }

        self.validate_element_table();

        // Copy the element blobs into the flash buffer
        for element in &self.elements {
            if let FfffElementContent::Tftf(tftf) = &element.content {
                let start = element.element_location as usize;
                let end = start + tftf.as_bytes().len();
                ensure!(
                    end <= buf.len(),
                    "element [{}] at {:#x} runs past the flash image",
                    element.index,
                    element.element_location
                );
                buf[start..end].copy_from_slice(tftf.as_bytes());
            }
        }

        self.sentinel = FFFF_SENTINEL;
        self.tail_sentinel = FFFF_SENTINEL;
        self.timestamp = timestamp.to_string();
        util::truncate_name(&mut self.flash_image_name, FFFF_FLASH_IMAGE_NAME_LENGTH);

        self.pack(buf);
        self.validate_ffff_header(buf);
        Ok(())
    }

    /// Determine if this header is identical to another.
    pub fn same_as(&self, other: &Ffff) -> bool {
        if self.elements.len() != other.elements.len() {
            return false;
        }
        for (a, b) in self.elements.iter().zip(other.elements.iter()) {
            if !a.same_as(b) {
                return false;
            }
        }
        self.sentinel == other.sentinel
            && self.timestamp == other.timestamp
            && self.flash_image_name == other.flash_image_name
            && self.flash_capacity == other.flash_capacity
            && self.erase_block_size == other.erase_block_size
            && self.header_size == other.header_size
            && self.flash_image_length == other.flash_image_length
            && self.header_generation_number == other.header_generation_number
            && self.tail_sentinel == other.tail_sentinel
    }

    /// Write each element's flash region to a separate file
    /// (display --explode support).
    pub fn write_elements(&self, buf: &[u8], root: &str) -> anyhow::Result<()> {
        for element in &self.elements {
            if element.is_end_of_table() {
                break;
            }
            let filename = format!("{root}_element_{}", element.index);
            element.write(buf, std::path::Path::new(&filename))?;
        }
        Ok(())
    }

    /// Display the header's element table in human-readable form
    pub fn display_element_table(&self) {
        println!("  Element Table (all values in hex):");
        FfffElement::display_table_header();
        for element in &self.elements {
            element.display(true);
            if element.is_end_of_table() {
                break;
            }
        }

        let num_unused = self.layout.element_capacity - self.elements.len();
        if num_unused > 1 {
            println!("  {:2} (unused)", self.elements.len());
            println!("   :    :");
        }
        if num_unused > 0 {
            println!("  {:2} (unused)", self.layout.element_capacity - 1);
        }
    }

    /// Display the element data (TFTFs) from the element table
    pub fn display_element_data(&self, header_index: Option<usize>) {
        match header_index {
            Some(index) => println!("Elements for FFFF Header[{index}]:"),
            None => println!("Elements for both FFFF headers:"),
        }
        for element in &self.elements {
            element.display_element_data(header_index);
            if element.is_end_of_table() {
                break;
            }
        }
    }

    /// Display the header
    pub fn display(
        &self,
        header_index: usize,
        display_element_data: bool,
        use_common_header: bool,
        filename: Option<&str>,
    ) {
        match filename {
            Some(filename) => println!("FFFF Header[{header_index}] for: {filename}"),
            None => println!("FFFF Header[{header_index}]:"),
        }
        println!(
            "  Sentinel:             '{}'",
            util::unpacked_string(&self.sentinel)
        );
        println!("  Timestamp:            '{}'", self.timestamp);
        println!("  Flash image name:     '{}'", self.flash_image_name);
        println!("  Flash capacity:       0x{:08x}", self.flash_capacity);
        println!("  Erase block size:     0x{:08x}", self.erase_block_size);
        println!("  Header size:          0x{:08x}", self.header_size);
        println!("  Flash image_length:   0x{:08x}", self.flash_image_length);
        println!(
            "  Header generation:    0x{0:08x} ({0})",
            self.header_generation_number
        );
        for (i, rsvd) in self.reserved.iter().enumerate() {
            println!("  Reserved [{i}]:         0x{rsvd:08x}");
        }

        self.display_element_table();

        println!(
            "  Sentinel:             '{}'",
            util::unpacked_string(&self.tail_sentinel)
        );
        println!(" ");

        if display_element_data {
            if use_common_header {
                self.display_element_data(None);
            } else {
                self.display_element_data(Some(header_index));
            }
        }
        println!(" ");
    }

    /// Write the field names and absolute offsets of this header
    pub fn write_map<W: Write>(
        &self,
        w: &mut W,
        base_offset: usize,
        prefix: &str,
    ) -> std::io::Result<()> {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() {
            writeln!(w, "{prefix}  {base_offset:08x}")?;
            prefix.push('.');
        }

        writeln!(
            w,
            "{prefix}sentinel  {:08x}",
            base_offset + FFFF_HDR_OFF_SENTINEL
        )?;
        writeln!(
            w,
            "{prefix}time_stamp  {:08x}",
            base_offset + FFFF_HDR_OFF_TIMESTAMP
        )?;
        writeln!(
            w,
            "{prefix}image_name  {:08x}",
            base_offset + FFFF_HDR_OFF_FLASH_IMAGE_NAME
        )?;
        writeln!(
            w,
            "{prefix}flash_capacity  {:08x}",
            base_offset + FFFF_HDR_OFF_FLASH_CAPACITY
        )?;
        writeln!(
            w,
            "{prefix}erase_block_size  {:08x}",
            base_offset + FFFF_HDR_OFF_ERASE_BLOCK_SIZE
        )?;
        writeln!(
            w,
            "{prefix}header_size  {:08x}",
            base_offset + FFFF_HDR_OFF_HEADER_SIZE
        )?;
        writeln!(
            w,
            "{prefix}image_length  {:08x}",
            base_offset + FFFF_HDR_OFF_FLASH_IMAGE_LENGTH
        )?;
        writeln!(
            w,
            "{prefix}generation  {:08x}",
            base_offset + FFFF_HDR_OFF_HEADER_GENERATION_NUM
        )?;

        for i in 0..self.reserved.len() {
            writeln!(
                w,
                "{prefix}reserved[{i}]  {:08x}",
                base_offset + self.layout.reserved_offset + i * FFFF_RSVD_SIZE
            )?;
        }

        writeln!(
            w,
            "{prefix}element_table  {:08x}",
            base_offset + self.layout.element_table_offset
        )?;
        let mut element_offset = base_offset + self.layout.element_table_offset;
        for index in 0..self.layout.element_capacity {
            writeln!(
                w,
                "{prefix}element[{index}].type  {:08x}",
                element_offset + FFFF_ELT_OFF_TYPE
            )?;
            writeln!(
                w,
                "{prefix}element[{index}].id  {:08x}",
                element_offset + FFFF_ELT_OFF_ID
            )?;
            writeln!(
                w,
                "{prefix}element[{index}].generation  {:08x}",
                element_offset + FFFF_ELT_OFF_GENERATION
            )?;
            writeln!(
                w,
                "{prefix}element[{index}].location  {:08x}",
                element_offset + FFFF_ELT_OFF_LOCATION
            )?;
            writeln!(
                w,
                "{prefix}element[{index}].length  {:08x}",
                element_offset + FFFF_ELT_OFF_LENGTH
            )?;
            element_offset += FFFF_ELT_LENGTH;
        }

        writeln!(
            w,
            "{prefix}tail_sentinel  {:08x}",
            base_offset + self.layout.tail_sentinel_offset
        )
    }

    /// Write the payload map entries for every element of this header
    pub fn write_map_elements<W: Write>(&self, w: &mut W, prefix: &str) -> std::io::Result<()> {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        for element in &self.elements {
            element.write_map_payload(w, &prefix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: u32 = 0x40000;
    const ERASE_BLOCK: u32 = 1024;
    const IMAGE_LENGTH: u32 = 0x20000;

    fn build_header() -> (Ffff, Vec<u8>) {
        let header = Ffff::new(0, "flash", CAPACITY, ERASE_BLOCK, IMAGE_LENGTH, 1, 512).unwrap();
        (header, vec![0u8; IMAGE_LENGTH as usize])
    }

    fn data_element(id: u32, generation: u32, location: u32, length: u32) -> FfffElement {
        FfffElement::new(
            0,
            ERASE_BLOCK,
            FfffElementType::Data.raw(),
            id,
            generation,
            location,
            length,
        )
    }

    #[test]
    fn test_erased_buffer_classification() {
        let (mut header, mut buf) = build_header();
        header.validate_ffff_header(&buf);
        assert_eq!(header.header_validity(), FfffValidity::Erased);

        buf.fill(0xff);
        header.validate_ffff_header(&buf);
        assert_eq!(header.header_validity(), FfffValidity::Erased);
    }

    #[test]
    fn test_bad_sentinel_is_invalid() {
        let (mut header, mut buf) = build_header();
        buf[0..4].copy_from_slice(b"junk");
        header.validate_ffff_header(&buf);
        assert_eq!(header.header_validity(), FfffValidity::Invalid);
    }

    #[test]
    fn test_post_process_empty_table_is_valid() {
        let (mut header, mut buf) = build_header();
        header.post_process(&mut buf, "20250101 000000").unwrap();
        assert_eq!(header.header_validity(), FfffValidity::Valid);
        assert_eq!(header.sentinel, FFFF_SENTINEL);
        assert_eq!(header.tail_sentinel, FFFF_SENTINEL);
    }

    #[test]
    fn test_fixed_field_checks() {
        let (mut header, mut buf) = build_header();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        header.erase_block_size = 3000;
        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Invalid);
        header.erase_block_size = ERASE_BLOCK;

        header.flash_image_length = IMAGE_LENGTH + 1;
        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Invalid);
        header.flash_image_length = IMAGE_LENGTH;

        header.header_size = 511;
        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Invalid);
        header.header_size = 512;

        header.reserved[0] = 5;
        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Invalid);
        header.reserved[0] = 0;

        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Valid);
    }

    #[test]
    fn test_unused_table_tail_must_be_zero() {
        let (mut header, mut buf) = build_header();
        header.post_process(&mut buf, "20250101 000000").unwrap();
        assert_eq!(header.header_validity(), FfffValidity::Valid);

        // One element entry is in use (the end-of-table marker); dirty the
        // word right after it.
        let dirty = header.layout().element_table_offset + FFFF_ELT_LENGTH + 3;
        buf[dirty] = 0xff;
        assert_eq!(header.validate_ffff_header(&buf), FfffValidity::Invalid);
    }

    #[test]
    fn test_duplicate_elements_are_flagged() {
        let (mut header, mut buf) = build_header();
        // Same (type, id, generation), different location/length
        header.add_element(data_element(7, 1, 0x2000, 0x100)).unwrap();
        header.add_element(data_element(7, 1, 0x4000, 0x300)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        assert!(header.duplicates_found());
        assert_eq!(header.elements[0].duplicates, vec![1]);
        assert_eq!(header.elements[1].duplicates, vec![0]);
        assert_eq!(header.header_validity(), FfffValidity::Invalid);
    }

    #[test]
    fn test_colliding_elements_are_flagged() {
        let (mut header, mut buf) = build_header();
        // [0x2000, 0x3000] overlaps [0x3000, 0x3fff]
        header.add_element(data_element(1, 1, 0x2000, 0x1001)).unwrap();
        header.add_element(data_element(2, 1, 0x3000, 0x1000)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        assert!(header.collisions_found());
        assert_eq!(header.elements[0].collisions, vec![1]);
        assert_eq!(header.elements[1].collisions, vec![0]);
    }

    #[test]
    fn test_adjacent_elements_do_not_collide() {
        let (mut header, mut buf) = build_header();
        header.add_element(data_element(1, 1, 0x2000, 0x1000)).unwrap();
        header.add_element(data_element(2, 1, 0x3000, 0x1000)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        assert!(!header.collisions_found());
        assert_eq!(header.header_validity(), FfffValidity::Valid);
    }

    #[test]
    fn test_element_below_header_blocks_collides_with_headers() {
        let (mut header, mut buf) = build_header();
        header.add_element(data_element(1, 1, 0x400, 0x100)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        assert!(header.collisions_found());
        assert_eq!(header.collisions[0], vec![FFFF_HEADER_COLLISION]);
        assert_eq!(header.header_validity(), FfffValidity::Invalid);
    }

    #[test]
    fn test_post_process_assigns_unset_locations() {
        let (mut header, mut buf) = build_header();
        header.add_element(data_element(1, 1, 0, 0x900)).unwrap();
        header.add_element(data_element(2, 1, 0, 0x500)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        // First element lands at 2 * header_block_size; the second right
        // after it, rounded up to the erase block boundary.
        assert_eq!(header.elements[0].element_location, 0x800);
        assert_eq!(header.elements[1].element_location, 0x1400);
        assert_eq!(header.header_validity(), FfffValidity::Valid);
    }

    #[test]
    fn test_post_process_derives_image_length() {
        let mut header = Ffff::new(0, "flash", CAPACITY, ERASE_BLOCK, 0, 1, 512).unwrap();
        let mut buf = Vec::new();
        header.add_element(data_element(1, 1, 0, 0x900)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        // 0x800 + 0x900 rounded up to the next erase block
        assert_eq!(header.flash_image_length, 0x1400);
        assert_eq!(buf.len(), 0x1400);
    }

    #[test]
    fn test_post_process_layout_overflow_is_fatal() {
        let mut header = Ffff::new(0, "flash", CAPACITY, ERASE_BLOCK, 0x1000, 1, 512).unwrap();
        let mut buf = vec![0u8; 0x1000];
        header.add_element(data_element(1, 1, 0, 0x900)).unwrap();
        let err = header
            .post_process(&mut buf, "20250101 000000")
            .unwrap_err();
        assert!(err.to_string().contains("exceeds image length"));

        // Reaching the image length exactly is also an overflow
        let mut header = Ffff::new(0, "flash", CAPACITY, ERASE_BLOCK, 0x1000, 1, 512).unwrap();
        header.add_element(data_element(1, 1, 0, 0x800)).unwrap();
        assert!(header.post_process(&mut buf, "20250101 000000").is_err());
    }

    #[test]
    fn test_add_element_rejects_full_table() {
        let (mut header, _) = build_header();
        // Capacity is 19 for a 512-byte header; one slot holds the
        // end-of-table marker.
        for id in 0..18 {
            header
                .add_element(data_element(id, 1, 0x2000 + id * 0x400, 0x100))
                .unwrap();
        }
        assert!(header.add_element(data_element(99, 1, 0x10000, 0x100)).is_err());
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let (mut header, mut buf) = build_header();
        header.flash_image_name = "round trip".to_string();
        header.add_element(data_element(3, 9, 0x2000, 0x100)).unwrap();
        header.post_process(&mut buf, "20250101 000000").unwrap();

        let mut other = Ffff::new(0, "", 0, 0, 0, 0, 512).unwrap();
        other.unpack(&buf);
        assert_eq!(other.header_validity(), FfffValidity::Valid);
        assert!(other.same_as(&header));
        assert_eq!(other.flash_image_name, "round trip");
        assert_eq!(other.timestamp, "20250101 000000");
        assert_eq!(other.elements.len(), 2);
    }

    #[test]
    fn test_write_map_contents() {
        let (mut header, mut buf) = build_header();
        header.post_process(&mut buf, "20250101 000000").unwrap();
        let mut out = Vec::new();
        header.write_map(&mut out, 0, "ffff[0]").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ffff[0].sentinel  00000000"));
        assert!(text.contains("ffff[0].flash_capacity  00000050"));
        // 4 reserved words put the element table at 0x74
        assert!(text.contains("ffff[0].element_table  00000074"));
        assert!(text.contains("ffff[0].tail_sentinel  000001f0"));
    }
}
