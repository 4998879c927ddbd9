/*++

Licensed under the Apache-2.0 license.

File Name:

   romimage.rs

Abstract:

    The flash-wide FFFF ROM image: one buffer spanning the image, carrying
    two redundant FFFF headers.

--*/

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, ensure, Context};
use bootrom_image_types::util;
use bootrom_image_types::*;
use zerocopy::FromBytes;

use crate::element::FfffElement;
use crate::header::Ffff;

/// The ROM image holds the flash buffer and two FFFF header views into it:
/// the primary at offset 0 and the redundant copy at the header block
/// boundary. The two headers are independent parsed structures layered over
/// one buffer; only the operations here keep their element tables in sync,
/// by applying every mutation to both.
#[derive(Debug)]
pub struct FfffRomImage {
    buf: Vec<u8>,
    pub ffff0: Ffff,
    pub ffff1: Ffff,

    pub flash_image_name: String,
    pub flash_capacity: u32,
    pub erase_block_size: u32,
    pub flash_image_length: u32,
    pub header_generation_number: u32,
}

impl FfffRomImage {
    /// Build a new, empty ROM image with headers at offset 0 and at the
    /// header block boundary.
    pub fn new(
        flash_image_name: &str,
        flash_capacity: u32,
        erase_block_size: u32,
        image_length: u32,
        header_generation_number: u32,
    ) -> anyhow::Result<FfffRomImage> {
        ensure!(
            util::is_power_of_2(erase_block_size),
            "Erase block size must be 2**n"
        );
        ensure!(
            image_length % erase_block_size == 0,
            "Image length must be a multiple of erase block size"
        );

        let header_block_size = ffff_header_block_size(erase_block_size);
        let ffff0 = Ffff::new(
            0,
            flash_image_name,
            flash_capacity,
            erase_block_size,
            image_length,
            header_generation_number,
            FFFF_HEADER_SIZE_DEFAULT,
        )?;
        let ffff1 = Ffff::new(
            header_block_size as usize,
            flash_image_name,
            flash_capacity,
            erase_block_size,
            image_length,
            header_generation_number,
            FFFF_HEADER_SIZE_DEFAULT,
        )?;

        Ok(FfffRomImage {
            buf: vec![0u8; image_length as usize],
            ffff0,
            ffff1,
            flash_image_name: flash_image_name.to_string(),
            flash_capacity,
            erase_block_size,
            flash_image_length: image_length,
            header_generation_number,
        })
    }

    /// Load a ROM image from a file, recovering the flash characteristics
    /// from the first header and scanning for the redundant copy.
    ///
    /// The second header need not be at the canonical offset if the image
    /// was built with different parameters: offsets are probed from the
    /// header block size, doubling, up to the fixed search bound, looking
    /// for matching nose and tail sentinels.
    pub fn from_file(filename: &Path) -> anyhow::Result<FfffRomImage> {
        let path = util::resolve_input_path(filename, FFFF_FILE_EXTENSION);
        let buf = fs::read(&path)
            .with_context(|| format!("can't find FFFF file {}", filename.display()))?;
        ensure!(
            buf.len() >= FFFF_HDR_LEN_FIXED_PART,
            "FFFF file {} is too short to hold a header",
            path.display()
        );

        // Extract the ROM image characteristics from the first header
        let fixed = FfffHeaderFixed::read_from_prefix(&buf[..])
            .context("FFFF file is too short to hold a header")?;
        let layout = FfffLayout::for_header_size(fixed.header_size)
            .context("FFFF header size is out of range")?;
        ensure!(
            buf.len() >= layout.header_size,
            "FFFF file {} is shorter than its header size",
            path.display()
        );

        let tail_off = layout.tail_sentinel_offset;
        let tail: [u8; FFFF_SENTINEL_LENGTH] = buf[tail_off..tail_off + FFFF_SENTINEL_LENGTH]
            .try_into()
            .unwrap();
        ensure!(
            fixed.sentinel == FFFF_SENTINEL && tail == FFFF_SENTINEL,
            "invalid sentinel"
        );
        ensure!(
            util::is_power_of_2(fixed.erase_block_size),
            "Erase block size must be 2**n"
        );
        ensure!(
            fixed.flash_image_length % fixed.erase_block_size == 0,
            "Image length must be a multiple of erase block size"
        );

        let flash_image_name = util::unpacked_string(&fixed.flash_image_name);

        let mut ffff0 = Ffff::new(
            0,
            &flash_image_name,
            fixed.flash_capacity,
            fixed.erase_block_size,
            fixed.flash_image_length,
            fixed.header_generation_number,
            fixed.header_size,
        )?;
        ffff0.unpack(&buf);

        // Scan for the second header
        let mut ffff1 = None;
        let mut offset = ffff_header_block_size(fixed.erase_block_size) as usize;
        while offset < FFFF_MAX_HEADER_BLOCK_OFFSET as usize {
            if offset + layout.header_size > buf.len() {
                break;
            }
            let nose = &buf[offset..offset + FFFF_SENTINEL_LENGTH];
            let tail_off = offset + layout.tail_sentinel_offset;
            let tail = &buf[tail_off..tail_off + FFFF_SENTINEL_LENGTH];
            if nose == FFFF_SENTINEL && tail == FFFF_SENTINEL {
                let mut header = Ffff::new(
                    offset,
                    &flash_image_name,
                    fixed.flash_capacity,
                    fixed.erase_block_size,
                    fixed.flash_image_length,
                    fixed.header_generation_number,
                    fixed.header_size,
                )?;
                header.unpack(&buf);
                ffff1 = Some(header);
                break;
            }
            offset <<= 1;
        }
        let Some(ffff1) = ffff1 else {
            bail!(
                "no redundant FFFF header found in {} within the search bound",
                path.display()
            );
        };

        Ok(FfffRomImage {
            buf,
            ffff0,
            ffff1,
            flash_image_name,
            flash_capacity: fixed.flash_capacity,
            erase_block_size: fixed.erase_block_size,
            flash_image_length: fixed.flash_image_length,
            header_generation_number: fixed.header_generation_number,
        })
    }

    /// The raw flash image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn header_block_size(&self) -> u32 {
        ffff_header_block_size(self.erase_block_size)
    }

    /// Add an element to both header element tables.
    ///
    /// This is the only supported way to add an element: the two headers
    /// are independent structures over one buffer, and nothing other than
    /// this shared-apply discipline keeps their tables in sync.
    pub fn add_element(
        &mut self,
        element_type: u32,
        element_id: u32,
        element_generation: u32,
        element_location: u32,
        element_length: u32,
        filename: Option<&Path>,
    ) -> anyhow::Result<()> {
        let element = match filename {
            Some(filename) => FfffElement::from_file(
                0,
                self.erase_block_size,
                element_type,
                element_id,
                element_generation,
                element_location,
                filename,
            )?,
            None => FfffElement::new(
                0,
                self.erase_block_size,
                element_type,
                element_id,
                element_generation,
                element_location,
                element_length,
            ),
        };
        self.ffff0.add_element(element.clone())?;
        self.ffff1.add_element(element)
    }

    /// Run both headers' layout assignment and flush them to the buffer.
    /// Both headers receive the same timestamp so they remain identical.
    pub fn post_process(&mut self) -> anyhow::Result<()> {
        let timestamp = timestamp_now();
        self.ffff0.post_process(&mut self.buf, &timestamp)?;
        self.ffff1.post_process(&mut self.buf, &timestamp)?;
        self.flash_image_length = self.ffff0.flash_image_length;
        Ok(())
    }

    /// Determine if the two headers are one logical copy.
    pub fn same_as(&self) -> bool {
        self.ffff0.same_as(&self.ffff1)
    }

    /// Write the ROM image out. Refuses unless both headers independently
    /// validate; nothing is written on refusal.
    pub fn write(&mut self, out_filename: &Path) -> anyhow::Result<()> {
        ensure!(
            self.ffff0.validate_ffff_header(&self.buf) == FfffValidity::Valid,
            "Invalid FFFF header 0"
        );
        ensure!(
            self.ffff1.validate_ffff_header(&self.buf) == FfffValidity::Valid,
            "Invalid FFFF header 1"
        );

        let path = util::output_path(out_filename, FFFF_FILE_EXTENSION);
        fs::write(&path, &self.buf)
            .with_context(|| format!("Unable to write {}", path.display()))?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    /// Display both headers. When they are identical, the element data is
    /// reported once as a common copy.
    pub fn display(&self, filename: Option<&str>) {
        let identical = self.same_as();
        self.ffff0.display(0, !identical, identical, filename);
        self.ffff1.display(1, true, identical, filename);
    }

    /// Write the component elements out as separate files, with `_0`/`_1`
    /// suffixes when the two headers disagree.
    pub fn explode(&self, root_filename: Option<&str>) -> anyhow::Result<()> {
        let root = root_filename.unwrap_or("ffff");
        if self.same_as() {
            self.ffff0.write_elements(&self.buf, root)
        } else {
            self.ffff0
                .write_elements(&self.buf, &format!("{root}_0"))?;
            self.ffff1.write_elements(&self.buf, &format!("{root}_1"))
        }
    }

    /// Create a companion map file from the base name, substituting or
    /// adding the `.map` extension.
    pub fn create_map_file(&self, base_name: &Path, base_offset: usize) -> anyhow::Result<()> {
        let map_name = base_name.with_extension("map");
        let mut mapfile = fs::File::create(&map_name)
            .with_context(|| format!("Unable to write {}", map_name.display()))?;
        self.write_map(&mut mapfile, base_offset)
            .with_context(|| format!("Unable to write {}", map_name.display()))
    }

    /// Write the field names and offsets of the whole ROM image
    pub fn write_map<W: Write>(&self, w: &mut W, base_offset: usize) -> std::io::Result<()> {
        self.ffff0.write_map(w, base_offset, "ffff[0]")?;
        self.ffff1.write_map(
            w,
            base_offset + self.header_block_size() as usize,
            "ffff[1]",
        )?;
        if self.same_as() {
            // The headers are identical: traverse one for the TFTF fields
            self.ffff0.write_map_elements(w, "ffff")
        } else {
            self.ffff0.write_map_elements(w, "ffff[0]")?;
            self.ffff1.write_map_elements(w, "ffff[1]")
        }
    }
}

/// Timestamp in the 16-byte header format
fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y%m%d %H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootrom_tftf::Tftf;
    use std::path::PathBuf;

    const CAPACITY: u32 = 0x40000;
    const ERASE_BLOCK: u32 = 1024;
    const IMAGE_LENGTH: u32 = 0x20000;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bootrom-ffff-test-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_tftf_file(dir: &Path, name: &str) -> PathBuf {
        let mut tftf = Tftf::new(512).unwrap();
        tftf.firmware_package_name = "payload".to_string();
        tftf.add_section(
            TftfSectionType::RawCode,
            0,
            1,
            &[0xc3; 0x100],
            0x1000_0000,
        )
        .unwrap();
        tftf.post_process();
        let path = dir.join(name);
        tftf.write(&path).unwrap();
        path.with_extension("bin")
    }

    fn build_rom(tftf_file: &Path) -> FfffRomImage {
        let mut rom =
            FfffRomImage::new("test flash", CAPACITY, ERASE_BLOCK, IMAGE_LENGTH, 1).unwrap();
        rom.add_element(
            FfffElementType::Stage2FirmwarePackage.raw(),
            1,
            1,
            0,
            0,
            Some(tftf_file),
        )
        .unwrap();
        rom.post_process().unwrap();
        rom
    }

    #[test]
    fn test_new_validates_parameters() {
        assert!(FfffRomImage::new("x", CAPACITY, 1000, IMAGE_LENGTH, 1).is_err());
        assert!(FfffRomImage::new("x", CAPACITY, ERASE_BLOCK, IMAGE_LENGTH + 1, 1).is_err());
        assert!(FfffRomImage::new("x", CAPACITY, ERASE_BLOCK, IMAGE_LENGTH, 1).is_ok());
    }

    #[test]
    fn test_add_element_applies_to_both_headers() {
        let dir = temp_dir("dual");
        let tftf_file = write_tftf_file(&dir, "fw");
        let rom = build_rom(&tftf_file);

        assert_eq!(rom.ffff0.elements.len(), 2);
        assert_eq!(rom.ffff1.elements.len(), 2);
        assert!(rom.ffff0.elements[0].same_as(&rom.ffff1.elements[0]));
        // The wrapped TFTF length, header included
        assert_eq!(rom.ffff0.elements[0].element_length, 512 + 0x100);
        assert!(rom.same_as());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_same_as_detects_divergence() {
        let dir = temp_dir("diverge");
        let tftf_file = write_tftf_file(&dir, "fw");
        let mut rom = build_rom(&tftf_file);

        assert!(rom.same_as());
        rom.ffff1.elements[0].element_generation += 1;
        assert!(!rom.same_as());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_and_load_round_trip() {
        let dir = temp_dir("roundtrip");
        let tftf_file = write_tftf_file(&dir, "fw");
        let mut rom = build_rom(&tftf_file);

        assert_eq!(rom.ffff0.header_validity(), FfffValidity::Valid);
        assert_eq!(rom.ffff1.header_validity(), FfffValidity::Valid);

        let out = dir.join("image");
        rom.write(&out).unwrap();
        let written = out.with_extension("ffff");
        assert!(written.is_file());

        // Loading without the extension resolves to the same file
        let loaded = FfffRomImage::from_file(&out).unwrap();
        assert_eq!(loaded.erase_block_size, ERASE_BLOCK);
        assert_eq!(loaded.flash_image_length, IMAGE_LENGTH);
        assert_eq!(loaded.ffff1.header_offset, 1024);
        assert_eq!(loaded.ffff0.header_validity(), FfffValidity::Valid);
        assert_eq!(loaded.ffff1.header_validity(), FfffValidity::Valid);
        assert!(loaded.same_as());
        assert!(loaded.ffff0.same_as(&rom.ffff0));

        // The element's blob landed at its assigned location
        let element = &loaded.ffff0.elements[0];
        assert_eq!(element.element_location, 0x800);
        let span = &loaded.as_bytes()[0x800..0x800 + 4];
        assert_eq!(span, b"TFTF");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_refuses_invalid_header() {
        let dir = temp_dir("refuse");
        let tftf_file = write_tftf_file(&dir, "fw");
        let mut rom = build_rom(&tftf_file);

        rom.ffff1.reserved[0] = 1;
        let out = dir.join("refused");
        let err = rom.write(&out).unwrap_err();
        assert!(err.to_string().contains("Invalid FFFF header 1"));
        assert!(!out.with_extension("ffff").exists());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_explode_writes_elements() {
        let dir = temp_dir("explode");
        let tftf_file = write_tftf_file(&dir, "fw");
        let rom = build_rom(&tftf_file);

        let root = dir.join("exploded");
        rom.explode(Some(root.to_str().unwrap())).unwrap();
        let element_file = PathBuf::from(format!("{}_element_0", root.display()));
        assert!(element_file.is_file());
        assert_eq!(
            std::fs::metadata(&element_file).unwrap().len(),
            (512 + 0x100) as u64
        );

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_map_file_covers_both_headers() {
        let dir = temp_dir("map");
        let tftf_file = write_tftf_file(&dir, "fw");
        let rom = build_rom(&tftf_file);

        let base = dir.join("image.ffff");
        rom.create_map_file(&base, 0).unwrap();
        let text = std::fs::read_to_string(dir.join("image.map")).unwrap();
        assert!(text.contains("ffff[0]  00000000"));
        assert!(text.contains("ffff[1]  00000400"));
        // Identical headers: the TFTF payload fields appear once, at the
        // element's flash location
        assert!(text.contains("ffff.element[0].2fw 00000800"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
