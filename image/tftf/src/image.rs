/*++

Licensed under the Apache-2.0 license.

File Name:

   image.rs

Abstract:

    TFTF image model: header, section table and concatenated payload.

--*/

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, ensure, Context};
use bootrom_image_types::util;
use bootrom_image_types::*;
use zerocopy::{AsBytes, FromBytes};

use crate::section::TftfSection;
use crate::signature::signature_block_write_map;

/// A complete TFTF firmware blob: header, section table and the section
/// payloads appended after the header.
#[derive(Debug, Clone)]
pub struct Tftf {
    buf: Vec<u8>,
    layout: TftfLayout,
    collisions: Vec<Vec<usize>>,
    collisions_found: bool,
    header_validity: TftfValidity,
    /// Length of the entire blob, header included
    tftf_length: usize,

    pub sentinel: [u8; 4],
    pub header_size: u32,
    pub timestamp: String,
    pub firmware_package_name: String,
    pub package_type: u32,
    pub start_location: u32,
    pub unipro_mfg_id: u32,
    pub unipro_pid: u32,
    pub ara_vid: u32,
    pub ara_pid: u32,
    pub reserved: Vec<u32>,
    pub sections: Vec<TftfSection>,
}

impl Tftf {
    /// Create a blank image with the given header size. The section table
    /// starts out holding only the end-of-table marker.
    pub fn new(header_size: u32) -> anyhow::Result<Tftf> {
        let layout =
            TftfLayout::for_header_size(header_size).context("TFTF header size is out of range")?;
        Ok(Tftf {
            buf: vec![0u8; layout.header_size],
            layout,
            collisions: Vec::new(),
            collisions_found: false,
            header_validity: TftfValidity::Invalid,
            tftf_length: layout.header_size,
            sentinel: [0u8; 4],
            header_size,
            timestamp: String::new(),
            firmware_package_name: String::new(),
            package_type: 0,
            start_location: 0,
            unipro_mfg_id: 0,
            unipro_pid: 0,
            ara_vid: 0,
            ara_pid: 0,
            reserved: vec![0u32; layout.reserved_count],
            sections: vec![TftfSection::end_of_table()],
        })
    }

    /// Load an image from a file, retrying with the default `.bin` extension
    /// appended when the file as named does not exist.
    pub fn load_from_file(filename: &Path) -> anyhow::Result<Tftf> {
        let path = util::resolve_input_path(filename, TFTF_FILE_EXTENSION);
        let buf = fs::read(&path)
            .with_context(|| format!("can't find TFTF file {}", filename.display()))?;
        Tftf::from_buffer(buf)
    }

    /// Import an image from a memory buffer, parsing the header and section
    /// table and running the sniff test.
    pub fn from_buffer(buf: Vec<u8>) -> anyhow::Result<Tftf> {
        ensure!(
            buf.len() >= TFTF_HDR_LEN_FIXED_PART,
            "TFTF buffer is too short ({} bytes) to hold a header",
            buf.len()
        );
        let mut tftf = Tftf::new(TFTF_HEADER_SIZE_DEFAULT)?;
        tftf.tftf_length = buf.len();
        tftf.buf = buf;
        tftf.unpack();
        Ok(tftf)
    }

    pub fn layout(&self) -> &TftfLayout {
        &self.layout
    }

    pub fn tftf_length(&self) -> usize {
        self.tftf_length
    }

    pub fn header_validity(&self) -> TftfValidity {
        self.header_validity
    }

    pub fn collisions(&self) -> &[Vec<usize>] {
        &self.collisions
    }

    /// The raw image bytes (header plus payload)
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Unpack the header fields and section table from the buffer
    fn unpack(&mut self) {
        let Some(fixed) = TftfHeaderFixed::read_from_prefix(&self.buf[..]) else {
            self.header_validity = TftfValidity::Invalid;
            return;
        };
        self.sentinel = fixed.sentinel;
        self.header_size = fixed.header_size;
        self.timestamp = util::unpacked_string(&fixed.timestamp);
        self.firmware_package_name = util::unpacked_string(&fixed.firmware_package_name);
        self.package_type = fixed.package_type;
        self.start_location = fixed.start_location;
        self.unipro_mfg_id = fixed.unipro_mfg_id;
        self.unipro_pid = fixed.unipro_pid;
        self.ara_vid = fixed.ara_vid;
        self.ara_pid = fixed.ara_pid;

        // The imported header size may differ from the default, so the
        // reserved and section tables must be resized for this instance.
        let Some(layout) = TftfLayout::for_header_size(self.header_size) else {
            log::error!("TFTF header size {:#x} is out of range", self.header_size);
            self.header_validity = TftfValidity::Invalid;
            return;
        };
        if self.buf.len() < layout.header_size {
            log::error!(
                "TFTF buffer ({} bytes) is shorter than its header size {:#x}",
                self.buf.len(),
                self.header_size
            );
            self.header_validity = TftfValidity::Invalid;
            return;
        }
        self.layout = layout;

        self.reserved = (0..layout.reserved_count)
            .map(|i| {
                let off = layout.reserved_offset + i * TFTF_RSVD_SIZE;
                u32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap())
            })
            .collect();

        // Parse the section table until the end-of-table entry, an
        // unrecognized type, or table capacity is exhausted.
        self.sections.clear();
        let mut offset = layout.section_table_offset;
        for index in 0..layout.section_capacity {
            match TftfSection::unpack(&self.buf, offset) {
                Some(section) => {
                    let eot = section.is_end_of_table();
                    self.sections.push(section);
                    offset += TFTF_SECTION_LEN;
                    if eot {
                        break;
                    }
                }
                None => {
                    let raw = self.buf.get(offset).copied().unwrap_or(0);
                    log::error!("Invalid section type {raw:#04x} at [{index}]");
                    break;
                }
            }
        }
        self.sniff_test();
    }

    /// Pack the header fields and section table into the buffer, prior to
    /// writing it out or slicing signing ranges from it.
    pub fn pack(&mut self) {
        if self.buf.len() < self.layout.header_size {
            self.buf.resize(self.layout.header_size, 0);
        }
        let fixed = TftfHeaderFixed {
            sentinel: self.sentinel,
            header_size: self.header_size,
            timestamp: util::packed_string(&self.timestamp),
            firmware_package_name: util::packed_string(&self.firmware_package_name),
            package_type: self.package_type,
            start_location: self.start_location,
            unipro_mfg_id: self.unipro_mfg_id,
            unipro_pid: self.unipro_pid,
            ara_vid: self.ara_vid,
            ara_pid: self.ara_pid,
        };
        self.buf[..TFTF_HDR_LEN_FIXED_PART].copy_from_slice(fixed.as_bytes());

        for i in 0..self.layout.reserved_count {
            let word = self.reserved.get(i).copied().unwrap_or(0);
            let off = self.layout.reserved_offset + i * TFTF_RSVD_SIZE;
            self.buf[off..off + 4].copy_from_slice(&word.to_le_bytes());
        }

        let mut offset = self.layout.section_table_offset;
        for section in &self.sections {
            offset = section.pack(&mut self.buf, offset);
        }
    }

    /// Add a section to the table and append its payload to the buffer.
    ///
    /// The payload must already be in final (e.g. signed) form. Fails when
    /// the section table is full.
    pub fn add_section(
        &mut self,
        section_type: TftfSectionType,
        section_class: u32,
        section_id: u32,
        section_data: &[u8],
        load_address: u32,
    ) -> anyhow::Result<()> {
        let num_sections = self.sections.len();
        if num_sections >= self.layout.section_capacity {
            bail!("Section table full");
        }
        // The table always ends in the end-of-table marker, so new sections
        // are inserted just in front of it.
        self.sections.insert(
            num_sections - 1,
            TftfSection::new(
                section_type,
                section_class,
                section_id,
                section_data.len() as u32,
                load_address,
                section_data.len() as u32,
            ),
        );
        self.buf.extend_from_slice(section_data);
        self.tftf_length = self.buf.len();
        Ok(())
    }

    /// Add a section whose payload is read from a file
    pub fn add_section_from_file(
        &mut self,
        section_type: TftfSectionType,
        section_class: u32,
        section_id: u32,
        filename: &Path,
        load_address: u32,
    ) -> anyhow::Result<()> {
        ensure!(
            self.sections.len() < self.layout.section_capacity,
            "Section table full"
        );
        let section_data = fs::read(filename)
            .with_context(|| format!("Unable to read {}", filename.display()))?;
        self.add_section(
            section_type,
            section_class,
            section_id,
            &section_data,
            load_address,
        )
    }

    /// Scan the section table for load-range collisions.
    ///
    /// Countable sections are compared pairwise over the closed ranges
    /// `[load_address, load_address + expanded_length - 1]`. The scan stops
    /// at the first signature or end-of-table entry: signatures and the
    /// certificates that follow them are appended after signing and are
    /// exempt from collision accounting.
    pub fn check_for_collisions(&mut self) -> bool {
        self.collisions.clear();
        self.collisions_found = false;

        for (a, section_a) in self.sections.iter().enumerate() {
            if section_a.section_type == TftfSectionType::Signature
                || section_a.is_end_of_table()
            {
                break;
            }
            let mut collision = Vec::new();
            let start_a = section_a.load_address as i64;
            let end_a = start_a + section_a.expanded_length as i64 - 1;
            for (b, section_b) in self.sections.iter().enumerate() {
                if a == b {
                    continue;
                }
                if section_b.section_type == TftfSectionType::Signature
                    || section_b.is_end_of_table()
                {
                    break;
                }
                let start_b = section_b.load_address as i64;
                let end_b = start_b + section_b.expanded_length as i64 - 1;
                if end_b >= start_a && start_b <= end_a {
                    self.collisions_found = true;
                    collision.push(b);
                }
            }
            self.collisions.push(collision);
        }
        self.collisions_found
    }

    /// Quick validity check of the header, generally done when importing an
    /// existing image.
    pub fn sniff_test(&mut self) -> TftfValidity {
        self.header_validity = TftfValidity::Valid;
        if self.sentinel != TFTF_SENTINEL {
            self.header_validity = TftfValidity::Invalid;
        } else if self.check_for_collisions() {
            self.header_validity = TftfValidity::ValidWithCollisions;
        }
        self.header_validity
    }

    /// Go/no-go decision on the header. Collisions are flagged but do not
    /// block writing.
    pub fn is_good(&self) -> bool {
        self.header_validity != TftfValidity::Invalid
    }

    /// Close out a built image: stamp the sentinel and timestamp, trim the
    /// package name and recompute validity.
    pub fn post_process(&mut self) {
        self.sentinel = TFTF_SENTINEL;
        if self.timestamp.is_empty() {
            self.timestamp = timestamp_now();
        }
        util::truncate_name(&mut self.firmware_package_name, TFTF_FW_PKG_NAME_LENGTH);
        self.sniff_test();
    }

    /// Pack the image and write it out, appending the default extension when
    /// the output name has none.
    pub fn write(&mut self, out_filename: &Path) -> anyhow::Result<()> {
        self.pack();
        self.tftf_length = self.buf.len();

        let path = util::output_path(out_filename, TFTF_FILE_EXTENSION);
        fs::write(&path, &self.buf)
            .with_context(|| format!("Unable to write {}", path.display()))?;

        let metadata = fs::metadata(&path)
            .with_context(|| format!("Can't get info on {}", path.display()))?;
        ensure!(
            metadata.len() as usize == self.tftf_length,
            "{} has wrong length",
            path.display()
        );
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    /// Find the index of the first section of the specified type, or of the
    /// first end-of-table marker if none matches.
    ///
    /// (Typically used to find the insertion point for a signature section.)
    pub fn find_first_section(&self, section_type: TftfSectionType) -> usize {
        for (index, section) in self.sections.iter().enumerate() {
            if section.section_type == section_type || section.is_end_of_table() {
                return index;
            }
        }
        self.sections.len()
    }

    /// The header bytes up to the start of section table entry
    /// `section_index`: the first part of the blob to be signed. Packs the
    /// header first so the buffer reflects in-memory state.
    pub fn header_up_to_section(&mut self, section_index: usize) -> anyhow::Result<Vec<u8>> {
        ensure!(
            section_index <= self.sections.len(),
            "section index {section_index} is out of range"
        );
        self.pack();
        let end = self.layout.section_table_offset + section_index * TFTF_SECTION_LEN;
        Ok(self.buf[..end].to_vec())
    }

    /// The payload bytes belonging to the sections before `section_index`:
    /// the second part of the blob to be signed.
    pub fn section_data_up_to_section(&mut self, section_index: usize) -> anyhow::Result<Vec<u8>> {
        ensure!(
            section_index <= self.sections.len(),
            "section index {section_index} is out of range"
        );
        self.pack();
        let mut end = self.layout.header_size;
        for section in self.sections.iter().take(section_index) {
            end += section.section_length as usize;
        }
        ensure!(
            end <= self.buf.len(),
            "section table runs past the end of the image"
        );
        Ok(self.buf[self.layout.header_size..end].to_vec())
    }

    /// Display the header in human-readable form
    pub fn display(&self, title: Option<&str>, indent: &str) {
        match title {
            Some(title) => println!(
                "{indent}TFTF Header for {title} ({} bytes)",
                self.tftf_length
            ),
            None => println!("{indent}TFTF Header ({} bytes)", self.tftf_length),
        }
        println!(
            "{indent}  Sentinel:         '{}'",
            util::unpacked_string(&self.sentinel)
        );
        println!(
            "{indent}  Header size:       0x{0:08x} ({0})",
            self.header_size
        );
        println!("{indent}  Timestamp:        '{}'", self.timestamp);
        println!(
            "{indent}  Fw. pkg name:     '{}'",
            self.firmware_package_name
        );
        println!("{indent}  Package type:      0x{:08x}", self.package_type);
        println!("{indent}  Start location:    0x{:08x}", self.start_location);
        println!("{indent}  Unipro mfg ID:     0x{:08x}", self.unipro_mfg_id);
        println!("{indent}  Unipro product ID: 0x{:08x}", self.unipro_pid);
        println!("{indent}  Ara vendor ID:     0x{:08x}", self.ara_vid);
        println!("{indent}  Ara product ID:    0x{:08x}", self.ara_pid);
        for (i, rsvd) in self.reserved.iter().enumerate() {
            println!("{indent}  Reserved [{i}]:      0x{rsvd:08x}");
        }

        println!("{indent}  Section Table (all values in hex):");
        TftfSection::display_table_header(indent);
        for (index, section) in self.sections.iter().enumerate() {
            section.display(indent, index, true);

            // Note any collisions on a separate line. The end-of-table
            // section has no collisions entry.
            if index < self.collisions.len() && !self.collisions[index].is_empty() {
                let mut line = format!("{indent}     Collides with section(s):");
                for collision in &self.collisions[index] {
                    line += &format!(" {collision}");
                }
                println!("{line}");
            }
        }

        // Note any unused section table entries
        let num_unused = self.layout.section_capacity - self.sections.len();
        if num_unused > 1 {
            println!("{indent}  {:2} (unused)", self.sections.len());
        }
        if num_unused > 2 {
            println!("{indent}   :    :");
        }
        if num_unused > 0 {
            println!(
                "{indent}  {:2} (unused)",
                self.layout.section_capacity - 1
            );
        }
        println!(" ");
    }

    /// Display the payloads referenced by the section table
    pub fn display_data(&self, title: Option<&str>, indent: &str) {
        let mut line = format!("{indent}TFTF contents");
        if let Some(title) = title {
            line += &format!(" for {title}");
        }
        line += &format!(" ({} bytes)", self.tftf_length);
        println!("{line}");

        let mut offset = self.layout.header_size;
        for (index, section) in self.sections.iter().enumerate() {
            if section.is_end_of_table() {
                break;
            }
            let end = (offset + section.section_length as usize).min(self.buf.len());
            section.display_data(
                &self.buf[offset.min(end)..end],
                &format!("section [{index}] "),
                &format!("{indent}  "),
            );
            offset += section.section_length as usize;
        }
    }

    /// Create a companion map file from the base name, substituting or
    /// adding the `.map` extension.
    pub fn create_map_file(
        &self,
        base_name: &Path,
        base_offset: usize,
        prefix: &str,
    ) -> anyhow::Result<()> {
        let map_name = base_name.with_extension("map");
        let mut mapfile = fs::File::create(&map_name)
            .with_context(|| format!("Unable to write {}", map_name.display()))?;
        self.write_map(&mut mapfile, base_offset, prefix)
            .with_context(|| format!("Unable to write {}", map_name.display()))
    }

    /// Write the field names and absolute offsets of the header, section
    /// table and payload starts for external tooling.
    pub fn write_map<W: Write>(
        &self,
        w: &mut W,
        base_offset: usize,
        prefix: &str,
    ) -> std::io::Result<()> {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() {
            writeln!(w, "{prefix} {base_offset:08x}")?;
            prefix.push('.');
        }

        writeln!(
            w,
            "{prefix}sentinel  {:08x}",
            base_offset + TFTF_HDR_OFF_SENTINEL
        )?;
        writeln!(
            w,
            "{prefix}header_size  {:08x}",
            base_offset + TFTF_HDR_OFF_HEADER_SIZE
        )?;
        writeln!(
            w,
            "{prefix}timestamp  {:08x}",
            base_offset + TFTF_HDR_OFF_TIMESTAMP
        )?;
        writeln!(
            w,
            "{prefix}firmware_name  {:08x}",
            base_offset + TFTF_HDR_OFF_NAME
        )?;
        writeln!(
            w,
            "{prefix}package_type  {:08x}",
            base_offset + TFTF_HDR_OFF_PACKAGE_TYPE
        )?;
        writeln!(
            w,
            "{prefix}start_location  {:08x}",
            base_offset + TFTF_HDR_OFF_START_LOCATION
        )?;
        writeln!(
            w,
            "{prefix}unipro_mfgr_id  {:08x}",
            base_offset + TFTF_HDR_OFF_UNIPRO_MFGR_ID
        )?;
        writeln!(
            w,
            "{prefix}unipro_product_id  {:08x}",
            base_offset + TFTF_HDR_OFF_UNIPRO_PRODUCT_ID
        )?;
        writeln!(
            w,
            "{prefix}ara_vendor_id  {:08x}",
            base_offset + TFTF_HDR_OFF_ARA_VENDOR_ID
        )?;
        writeln!(
            w,
            "{prefix}ara_product_id  {:08x}",
            base_offset + TFTF_HDR_OFF_ARA_PRODUCT_ID
        )?;
        for i in 0..self.reserved.len() {
            writeln!(
                w,
                "{prefix}reserved[{i}]  {:08x}",
                base_offset + self.layout.reserved_offset + i * TFTF_RSVD_SIZE
            )?;
        }

        // The section table, used and free entries alike
        let mut section_offset = base_offset + self.layout.section_table_offset;
        for index in 0..self.layout.section_capacity {
            writeln!(
                w,
                "{prefix}section[{index}].type  {:08x}",
                section_offset + TFTF_SECTION_OFF_TYPE
            )?;
            writeln!(
                w,
                "{prefix}section[{index}].class  {:08x}",
                section_offset + TFTF_SECTION_OFF_CLASS
            )?;
            writeln!(
                w,
                "{prefix}section[{index}].id  {:08x}",
                section_offset + TFTF_SECTION_OFF_ID
            )?;
            writeln!(
                w,
                "{prefix}section[{index}].section_length  {:08x}",
                section_offset + TFTF_SECTION_OFF_LENGTH
            )?;
            writeln!(
                w,
                "{prefix}section[{index}].load_address  {:08x}",
                section_offset + TFTF_SECTION_OFF_LOAD_ADDRESS
            )?;
            writeln!(
                w,
                "{prefix}section[{index}].expanded_length  {:08x}",
                section_offset + TFTF_SECTION_OFF_EXPANDED_LENGTH
            )?;
            section_offset += TFTF_SECTION_LEN;
        }

        // The payload starts
        let mut payload_offset = base_offset + self.layout.header_size;
        for (index, section) in self.sections.iter().enumerate() {
            if section.is_end_of_table() {
                break;
            }
            let name = format!(
                "{prefix}section[{index}].{}",
                section.section_type.short_name()
            );
            if section.section_type == TftfSectionType::Signature {
                signature_block_write_map(w, payload_offset, &name)?;
            } else {
                writeln!(w, "{name}  {payload_offset:08x}")?;
            }
            payload_offset += section.section_length as usize;
        }
        Ok(())
    }
}

/// Timestamp in the 16-byte header format
pub(crate) fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y%m%d %H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image() -> Tftf {
        let mut tftf = Tftf::new(512).unwrap();
        tftf.firmware_package_name = "test firmware".to_string();
        tftf.package_type = 2;
        tftf.start_location = 0x1000_0000;
        tftf.unipro_mfg_id = 0x126;
        tftf.unipro_pid = 0x1000;
        tftf.ara_vid = 0x42;
        tftf.ara_pid = 0x4242;
        tftf
    }

    #[test]
    fn test_new_rejects_bad_header_size() {
        assert!(Tftf::new(0).is_err());
        assert!(Tftf::new(256).is_err());
        assert!(Tftf::new(8192).is_err());
        assert!(Tftf::new(512).is_ok());
        assert!(Tftf::new(4096).is_ok());
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0xaa; 0x100], 0x1000_0000)
            .unwrap();
        tftf.add_section(TftfSectionType::RawData, 0, 2, &[0xbb; 0x80], 0x2000_0000)
            .unwrap();
        tftf.post_process();
        assert_eq!(tftf.header_validity(), TftfValidity::Valid);

        let mut packed = tftf.clone();
        packed.pack();
        let unpacked = Tftf::from_buffer(packed.as_bytes().to_vec()).unwrap();

        assert_eq!(unpacked.sentinel, TFTF_SENTINEL);
        assert_eq!(unpacked.header_size, tftf.header_size);
        assert_eq!(unpacked.timestamp, tftf.timestamp);
        assert_eq!(unpacked.firmware_package_name, tftf.firmware_package_name);
        assert_eq!(unpacked.package_type, tftf.package_type);
        assert_eq!(unpacked.start_location, tftf.start_location);
        assert_eq!(unpacked.unipro_mfg_id, tftf.unipro_mfg_id);
        assert_eq!(unpacked.unipro_pid, tftf.unipro_pid);
        assert_eq!(unpacked.ara_vid, tftf.ara_vid);
        assert_eq!(unpacked.ara_pid, tftf.ara_pid);
        assert_eq!(unpacked.reserved, tftf.reserved);
        assert_eq!(unpacked.sections, tftf.sections);
        assert_eq!(unpacked.header_validity(), TftfValidity::Valid);
    }

    #[test]
    fn test_larger_header_round_trip() {
        let mut tftf = Tftf::new(1024).unwrap();
        tftf.add_section(TftfSectionType::Manifest, 0, 9, &[1, 2, 3, 4], 0)
            .unwrap();
        tftf.post_process();
        let mut packed = tftf.clone();
        packed.pack();
        let unpacked = Tftf::from_buffer(packed.as_bytes().to_vec()).unwrap();
        assert_eq!(unpacked.header_size, 1024);
        assert_eq!(unpacked.layout().section_capacity, 45);
        assert_eq!(unpacked.sections, tftf.sections);
    }

    #[test]
    fn test_collisions_are_mutual() {
        let mut tftf = build_image();
        // [0x1000, 0x10ff] and [0x10ff, 0x11fe] overlap by one byte
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0; 0x100], 0x1000)
            .unwrap();
        tftf.add_section(TftfSectionType::RawData, 0, 2, &[0; 0x100], 0x10ff)
            .unwrap();
        tftf.post_process();
        assert_eq!(tftf.header_validity(), TftfValidity::ValidWithCollisions);
        assert!(tftf.is_good());
        assert_eq!(tftf.collisions()[0], vec![1]);
        assert_eq!(tftf.collisions()[1], vec![0]);
    }

    #[test]
    fn test_adjacent_sections_do_not_collide() {
        let mut tftf = build_image();
        // end_a + 1 == start_b
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0; 0x100], 0x1000)
            .unwrap();
        tftf.add_section(TftfSectionType::RawData, 0, 2, &[0; 0x100], 0x1100)
            .unwrap();
        tftf.post_process();
        assert_eq!(tftf.header_validity(), TftfValidity::Valid);
        assert!(tftf.collisions().iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_sections_after_signature_are_exempt() {
        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0; 0x100], 0x1000)
            .unwrap();
        tftf.add_section(TftfSectionType::Signature, 0, 2, &[0; 0x150], 0)
            .unwrap();
        // Overlaps the first section, but sits after the signature
        tftf.add_section(TftfSectionType::Certificate, 0, 3, &[0; 0x100], 0x1000)
            .unwrap();
        tftf.post_process();
        assert_eq!(tftf.header_validity(), TftfValidity::Valid);
    }

    #[test]
    fn test_add_section_rejects_full_table() {
        let mut tftf = build_image();
        // Capacity is 20 for a 512-byte header; one slot holds the
        // end-of-table marker.
        for id in 0..19 {
            tftf.add_section(TftfSectionType::RawData, 0, id, &[0; 4], 0x1000 * id)
                .unwrap();
        }
        assert_eq!(tftf.sections.len(), 20);
        let err = tftf
            .add_section(TftfSectionType::RawData, 0, 99, &[0; 4], 0xff00_0000)
            .unwrap_err();
        assert!(err.to_string().contains("Section table full"));
    }

    #[test]
    fn test_sniff_test_rejects_bad_sentinel() {
        let tftf = Tftf::from_buffer(vec![0x5a; 512]).unwrap();
        assert_eq!(tftf.header_validity(), TftfValidity::Invalid);
        assert!(!tftf.is_good());
    }

    #[test]
    fn test_find_first_section() {
        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0; 8], 0x1000)
            .unwrap();
        tftf.add_section(TftfSectionType::Signature, 0, 2, &[0; 8], 0)
            .unwrap();
        assert_eq!(tftf.find_first_section(TftfSectionType::Signature), 1);
        assert_eq!(tftf.find_first_section(TftfSectionType::RawCode), 0);
        // No manifest: lands on the end-of-table marker
        assert_eq!(tftf.find_first_section(TftfSectionType::Manifest), 2);
    }

    #[test]
    fn test_signing_ranges() {
        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0x11; 0x40], 0x1000)
            .unwrap();
        tftf.add_section(TftfSectionType::RawData, 0, 2, &[0x22; 0x20], 0x2000)
            .unwrap();
        tftf.post_process();

        let insert_at = tftf.find_first_section(TftfSectionType::Signature);
        assert_eq!(insert_at, 2);

        // Header prefix: fixed part + reserved + two section entries
        let header_part = tftf.header_up_to_section(insert_at).unwrap();
        assert_eq!(header_part.len(), 112 + 2 * TFTF_SECTION_LEN);
        assert_eq!(&header_part[0..4], b"TFTF");

        // Payload prefix: both section payloads
        let data_part = tftf.section_data_up_to_section(insert_at).unwrap();
        assert_eq!(data_part.len(), 0x40 + 0x20);
        assert_eq!(data_part[0], 0x11);
        assert_eq!(data_part[0x40], 0x22);

        assert!(tftf.header_up_to_section(99).is_err());
    }

    #[test]
    fn test_write_and_load_round_trip() {
        let dir = std::env::temp_dir().join("bootrom-tftf-test-write");
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join(format!("image-{}", std::process::id()));

        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0xcc; 0x30], 0x1000)
            .unwrap();
        tftf.post_process();
        tftf.write(&base).unwrap();

        // Default extension appended
        let written = base.with_extension("bin");
        assert!(written.is_file());

        // Loading without the extension resolves to the same file
        let loaded = Tftf::load_from_file(&base).unwrap();
        assert_eq!(loaded.header_validity(), TftfValidity::Valid);
        assert_eq!(loaded.sections, tftf.sections);
        assert_eq!(loaded.tftf_length(), tftf.tftf_length());

        std::fs::remove_file(written).unwrap();
    }

    #[test]
    fn test_write_map() {
        let mut tftf = build_image();
        tftf.add_section(TftfSectionType::RawCode, 0, 1, &[0; 0x10], 0x1000)
            .unwrap();
        tftf.post_process();

        let mut out = Vec::new();
        tftf.write_map(&mut out, 0, "tftf").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("tftf.sentinel  00000000"));
        assert!(text.contains("tftf.header_size  00000004"));
        assert!(text.contains("tftf.reserved[0]  00000060"));
        // Section table starts after 4 reserved words
        assert!(text.contains("tftf.section[0].type  00000070"));
        // First payload starts right after the header
        assert!(text.contains("tftf.section[0].code  00000200"));
    }
}
