/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the TFTF and FFFF firmware container
    formats.

--*/

pub mod util;

use getset::CopyGetters;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// TFTF header sentinel ("TFTF")
pub const TFTF_SENTINEL: [u8; 4] = *b"TFTF";
pub const TFTF_HEADER_SIZE_MIN: u32 = 512;
pub const TFTF_HEADER_SIZE_MAX: u32 = 4096;
pub const TFTF_HEADER_SIZE_DEFAULT: u32 = 512;
pub const TFTF_TIMESTAMP_LENGTH: usize = 16;
pub const TFTF_FW_PKG_NAME_LENGTH: usize = 48;
pub const TFTF_RSVD_SIZE: usize = 4;
pub const TFTF_HDR_NUM_RESERVED_MIN: usize = 4;
pub const TFTF_HDR_LEN_FIXED_PART: usize = core::mem::size_of::<TftfHeaderFixed>();
pub const TFTF_SECTION_LEN: usize = core::mem::size_of::<TftfSectionEntry>();
pub const TFTF_FILE_EXTENSION: &str = "bin";

/// Load address placeholder carried by signature and certificate sections.
pub const TFTF_SECTION_NO_LOAD_ADDRESS: u32 = 0xffff_ffff;

// TFTF header field offsets
pub const TFTF_HDR_OFF_SENTINEL: usize = 0x00;
pub const TFTF_HDR_OFF_HEADER_SIZE: usize = 0x04;
pub const TFTF_HDR_OFF_TIMESTAMP: usize = 0x08;
pub const TFTF_HDR_OFF_NAME: usize = 0x18;
pub const TFTF_HDR_OFF_PACKAGE_TYPE: usize = 0x48;
pub const TFTF_HDR_OFF_START_LOCATION: usize = 0x4c;
pub const TFTF_HDR_OFF_UNIPRO_MFGR_ID: usize = 0x50;
pub const TFTF_HDR_OFF_UNIPRO_PRODUCT_ID: usize = 0x54;
pub const TFTF_HDR_OFF_ARA_VENDOR_ID: usize = 0x58;
pub const TFTF_HDR_OFF_ARA_PRODUCT_ID: usize = 0x5c;
pub const TFTF_HDR_OFF_RESERVED: usize = 0x60;

// TFTF section entry field offsets
pub const TFTF_SECTION_OFF_TYPE: usize = 0x00;
pub const TFTF_SECTION_OFF_CLASS: usize = 0x01;
pub const TFTF_SECTION_OFF_ID: usize = 0x04;
pub const TFTF_SECTION_OFF_LENGTH: usize = 0x08;
pub const TFTF_SECTION_OFF_LOAD_ADDRESS: usize = 0x0c;
pub const TFTF_SECTION_OFF_EXPANDED_LENGTH: usize = 0x10;

/// FFFF header sentinel, stamped at both the nose and the tail of the header.
pub const FFFF_SENTINEL: [u8; 16] = *b"FlashFormatForFW";
pub const FFFF_SENTINEL_LENGTH: usize = 16;
pub const FFFF_HEADER_SIZE_MIN: u32 = 512;
pub const FFFF_HEADER_SIZE_MAX: u32 = 4096;
pub const FFFF_HEADER_SIZE_DEFAULT: u32 = 512;
pub const FFFF_TIMESTAMP_LENGTH: usize = 16;
pub const FFFF_FLASH_IMAGE_NAME_LENGTH: usize = 48;
pub const FFFF_RSVD_SIZE: usize = 4;
pub const FFFF_HDR_NUM_RESERVED_MIN: usize = 4;
pub const FFFF_HDR_LEN_FIXED_PART: usize = core::mem::size_of::<FfffHeaderFixed>();
pub const FFFF_ELT_LENGTH: usize = core::mem::size_of::<FfffElementEntry>();
pub const FFFF_FILE_EXTENSION: &str = "ffff";

/// Largest header block the redundant-header search will consider.
pub const FFFF_MAX_HEADER_BLOCK_SIZE: u32 = 64 * 1024;
/// Upper bound for the redundant-header offset scan.
pub const FFFF_MAX_HEADER_BLOCK_OFFSET: u32 = 512 * 1024;

/// Pseudo element index recording a collision with the header blocks.
pub const FFFF_HEADER_COLLISION: isize = -1;

// FFFF header field offsets
pub const FFFF_HDR_OFF_SENTINEL: usize = 0x00;
pub const FFFF_HDR_OFF_TIMESTAMP: usize = 0x10;
pub const FFFF_HDR_OFF_FLASH_IMAGE_NAME: usize = 0x20;
pub const FFFF_HDR_OFF_FLASH_CAPACITY: usize = 0x50;
pub const FFFF_HDR_OFF_ERASE_BLOCK_SIZE: usize = 0x54;
pub const FFFF_HDR_OFF_HEADER_SIZE: usize = 0x58;
pub const FFFF_HDR_OFF_FLASH_IMAGE_LENGTH: usize = 0x5c;
pub const FFFF_HDR_OFF_HEADER_GENERATION_NUM: usize = 0x60;
pub const FFFF_HDR_OFF_RESERVED: usize = 0x64;

// FFFF element entry field offsets
pub const FFFF_ELT_OFF_TYPE: usize = 0x00;
pub const FFFF_ELT_OFF_ID: usize = 0x04;
pub const FFFF_ELT_OFF_GENERATION: usize = 0x08;
pub const FFFF_ELT_OFF_LOCATION: usize = 0x0c;
pub const FFFF_ELT_OFF_LENGTH: usize = 0x10;

/// Fixed part of the TFTF header
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, CopyGetters, Debug, Clone, Copy)]
pub struct TftfHeaderFixed {
    /// Sentinel ("TFTF")
    pub sentinel: [u8; 4],

    /// Total header size in bytes (512..4096)
    #[getset(get_copy = "pub")]
    pub header_size: u32,

    /// Build timestamp ("YYYYMMDD HHMMSS", zero padded)
    pub timestamp: [u8; TFTF_TIMESTAMP_LENGTH],

    /// Firmware package name (zero padded)
    pub firmware_package_name: [u8; TFTF_FW_PKG_NAME_LENGTH],

    /// Package type
    #[getset(get_copy = "pub")]
    pub package_type: u32,

    /// Start location (entry point)
    #[getset(get_copy = "pub")]
    pub start_location: u32,

    /// UniPro manufacturer ID
    #[getset(get_copy = "pub")]
    pub unipro_mfg_id: u32,

    /// UniPro product ID
    #[getset(get_copy = "pub")]
    pub unipro_pid: u32,

    /// Ara vendor ID
    #[getset(get_copy = "pub")]
    pub ara_vid: u32,

    /// Ara product ID
    #[getset(get_copy = "pub")]
    pub ara_pid: u32,
}

/// One packed TFTF section table entry
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, CopyGetters, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftfSectionEntry {
    /// Section type (low byte) and class (high 24 bits)
    #[getset(get_copy = "pub")]
    pub type_class: u32,

    /// Section ID
    #[getset(get_copy = "pub")]
    pub section_id: u32,

    /// Stored (possibly compressed) length in bytes
    #[getset(get_copy = "pub")]
    pub section_length: u32,

    /// Target memory address
    #[getset(get_copy = "pub")]
    pub load_address: u32,

    /// In-memory length after expansion
    #[getset(get_copy = "pub")]
    pub expanded_length: u32,
}

impl TftfSectionEntry {
    /// Pack a section type and class into the shared 32-bit field
    pub fn pack_type_class(section_type: u8, section_class: u32) -> u32 {
        ((section_class & 0x00ff_ffff) << 8) | section_type as u32
    }

    pub fn section_type(&self) -> u8 {
        (self.type_class & 0x0000_00ff) as u8
    }

    pub fn section_class(&self) -> u32 {
        (self.type_class >> 8) & 0x00ff_ffff
    }
}

/// Fixed part of the FFFF header
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, CopyGetters, Debug, Clone, Copy)]
pub struct FfffHeaderFixed {
    /// Nose sentinel ("FlashFormatForFW")
    pub sentinel: [u8; FFFF_SENTINEL_LENGTH],

    /// Build timestamp ("YYYYMMDD HHMMSS", zero padded)
    pub timestamp: [u8; FFFF_TIMESTAMP_LENGTH],

    /// Flash image name (zero padded)
    pub flash_image_name: [u8; FFFF_FLASH_IMAGE_NAME_LENGTH],

    /// Total capacity of the flash part in bytes
    #[getset(get_copy = "pub")]
    pub flash_capacity: u32,

    /// Erase block size in bytes (power of two)
    #[getset(get_copy = "pub")]
    pub erase_block_size: u32,

    /// Total header size in bytes (512..4096)
    #[getset(get_copy = "pub")]
    pub header_size: u32,

    /// Length of the flash span covered by this image
    #[getset(get_copy = "pub")]
    pub flash_image_length: u32,

    /// Header generation number
    #[getset(get_copy = "pub")]
    pub header_generation_number: u32,
}

/// One packed FFFF element table entry
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, CopyGetters, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfffElementEntry {
    /// Element type
    #[getset(get_copy = "pub")]
    pub element_type: u32,

    /// Element ID
    #[getset(get_copy = "pub")]
    pub element_id: u32,

    /// Element generation number
    #[getset(get_copy = "pub")]
    pub element_generation: u32,

    /// Absolute byte offset of the element in flash
    #[getset(get_copy = "pub")]
    pub element_location: u32,

    /// Total length of the element in bytes
    #[getset(get_copy = "pub")]
    pub element_length: u32,
}

/// TFTF section types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TftfSectionType {
    RawCode = 0x01,
    RawData = 0x02,
    CompressedCode = 0x03,
    CompressedData = 0x04,
    Manifest = 0x05,
    Signature = 0x80,
    Certificate = 0x81,
    EndOfDescriptors = 0xfe,
}

impl TftfSectionType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::RawCode),
            0x02 => Some(Self::RawData),
            0x03 => Some(Self::CompressedCode),
            0x04 => Some(Self::CompressedData),
            0x05 => Some(Self::Manifest),
            0x80 => Some(Self::Signature),
            0x81 => Some(Self::Certificate),
            0xfe => Some(Self::EndOfDescriptors),
            _ => None,
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "code" => Some(Self::RawCode),
            "data" => Some(Self::RawData),
            "compressed_code" => Some(Self::CompressedCode),
            "compressed_data" => Some(Self::CompressedData),
            "manifest" => Some(Self::Manifest),
            "signature" => Some(Self::Signature),
            "certificate" => Some(Self::Certificate),
            "eot" => Some(Self::EndOfDescriptors),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RawCode => "Code",
            Self::RawData => "Data",
            Self::CompressedCode => "Compressed code",
            Self::CompressedData => "Compressed data",
            Self::Manifest => "Manifest",
            Self::Signature => "Signature",
            Self::Certificate => "Certificate",
            Self::EndOfDescriptors => "End of descriptors",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::RawCode => "code",
            Self::RawData => "data",
            Self::CompressedCode => "compressed_code",
            Self::CompressedData => "compressed_data",
            Self::Manifest => "manifest",
            Self::Signature => "signature",
            Self::Certificate => "certificate",
            Self::EndOfDescriptors => "eot",
        }
    }

    /// Sections that contribute to load-length and collision accounting.
    /// Certificates located after the first signature section are further
    /// excluded by the scan order, not by this predicate.
    pub fn is_countable(self) -> bool {
        !matches!(self, Self::Signature | Self::EndOfDescriptors)
    }

    /// Signature and certificate sections carry no real load address.
    pub fn has_load_address(self) -> bool {
        !matches!(self, Self::Signature | Self::Certificate)
    }
}

impl From<TftfSectionType> for u8 {
    fn from(value: TftfSectionType) -> Self {
        value.raw()
    }
}

/// FFFF element types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfffElementType {
    Stage2FirmwarePackage = 0x01,
    Stage3FirmwarePackage = 0x02,
    ImsCertificate = 0x03,
    CmsCertificate = 0x04,
    Data = 0x05,
    EndOfElementTable = 0xfe,
}

pub const FFFF_ELEMENT_TYPE_MIN: u32 = FfffElementType::Stage2FirmwarePackage as u32;
pub const FFFF_ELEMENT_TYPE_MAX: u32 = FfffElementType::Data as u32;
pub const FFFF_ELEMENT_END_OF_ELEMENT_TABLE: u32 = FfffElementType::EndOfElementTable as u32;

impl FfffElementType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Stage2FirmwarePackage),
            0x02 => Some(Self::Stage3FirmwarePackage),
            0x03 => Some(Self::ImsCertificate),
            0x04 => Some(Self::CmsCertificate),
            0x05 => Some(Self::Data),
            0xfe => Some(Self::EndOfElementTable),
            _ => None,
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "2fw" => Some(Self::Stage2FirmwarePackage),
            "3fw" => Some(Self::Stage3FirmwarePackage),
            "ims_cert" => Some(Self::ImsCertificate),
            "cms_cert" => Some(Self::CmsCertificate),
            "data" => Some(Self::Data),
            "eot" => Some(Self::EndOfElementTable),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stage2FirmwarePackage => "stage 2 firmware",
            Self::Stage3FirmwarePackage => "stage 3 firmware",
            Self::ImsCertificate => "IMS certificate",
            Self::CmsCertificate => "CMS certificate",
            Self::Data => "data",
            Self::EndOfElementTable => "end of elements",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Stage2FirmwarePackage => "2fw",
            Self::Stage3FirmwarePackage => "3fw",
            Self::ImsCertificate => "ims_cert",
            Self::CmsCertificate => "cms_cert",
            Self::Data => "data",
            Self::EndOfElementTable => "eot",
        }
    }
}

impl From<FfffElementType> for u32 {
    fn from(value: FfffElementType) -> Self {
        value.raw()
    }
}

/// TFTF header validity assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TftfValidity {
    Valid,
    #[default]
    Invalid,
    /// Sentinel is good but sections overlap; the image is still writable.
    ValidWithCollisions,
}

/// FFFF header validity assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FfffValidity {
    Valid,
    /// The header span is a constant 0x00 or 0xff fill.
    Erased,
    #[default]
    Invalid,
}

/// Derived TFTF header layout.
///
/// The section table capacity and the field offsets that follow the fixed
/// part depend on `header_size`. Each image instance owns its layout; the
/// values are never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftfLayout {
    pub header_size: usize,
    pub section_capacity: usize,
    pub reserved_count: usize,
    pub reserved_offset: usize,
    pub section_table_offset: usize,
}

impl TftfLayout {
    /// Compute the layout for a header size, or `None` when the size is out
    /// of the 512..=4096 range.
    pub fn for_header_size(header_size: u32) -> Option<TftfLayout> {
        if !(TFTF_HEADER_SIZE_MIN..=TFTF_HEADER_SIZE_MAX).contains(&header_size) {
            return None;
        }
        let header_size = header_size as usize;
        let min_reserved = TFTF_HDR_NUM_RESERVED_MIN * TFTF_RSVD_SIZE;
        let section_capacity =
            (header_size - TFTF_HDR_LEN_FIXED_PART - min_reserved) / TFTF_SECTION_LEN;
        let section_table_len = section_capacity * TFTF_SECTION_LEN;
        // The reserved array soaks up whatever the section table leaves over.
        let reserved_len = header_size - TFTF_HDR_LEN_FIXED_PART - section_table_len;
        Some(TftfLayout {
            header_size,
            section_capacity,
            reserved_count: reserved_len / TFTF_RSVD_SIZE,
            reserved_offset: TFTF_HDR_LEN_FIXED_PART,
            section_table_offset: TFTF_HDR_LEN_FIXED_PART + reserved_len,
        })
    }
}

impl Default for TftfLayout {
    fn default() -> Self {
        TftfLayout::for_header_size(TFTF_HEADER_SIZE_DEFAULT).unwrap()
    }
}

/// Derived FFFF header layout; same discipline as [`TftfLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfffLayout {
    pub header_size: usize,
    pub element_capacity: usize,
    pub reserved_count: usize,
    pub reserved_offset: usize,
    pub element_table_offset: usize,
    pub tail_sentinel_offset: usize,
}

impl FfffLayout {
    /// Compute the layout for a header size, or `None` when the size is out
    /// of the 512..=4096 range.
    pub fn for_header_size(header_size: u32) -> Option<FfffLayout> {
        if !(FFFF_HEADER_SIZE_MIN..=FFFF_HEADER_SIZE_MAX).contains(&header_size) {
            return None;
        }
        let header_size = header_size as usize;
        let min_reserved = FFFF_HDR_NUM_RESERVED_MIN * FFFF_RSVD_SIZE;
        let element_capacity = (header_size
            - FFFF_HDR_LEN_FIXED_PART
            - FFFF_SENTINEL_LENGTH
            - min_reserved)
            / FFFF_ELT_LENGTH;
        let element_table_len = element_capacity * FFFF_ELT_LENGTH;
        let reserved_len =
            header_size - FFFF_HDR_LEN_FIXED_PART - FFFF_SENTINEL_LENGTH - element_table_len;
        Some(FfffLayout {
            header_size,
            element_capacity,
            reserved_count: reserved_len / FFFF_RSVD_SIZE,
            reserved_offset: FFFF_HDR_LEN_FIXED_PART,
            element_table_offset: FFFF_HDR_LEN_FIXED_PART + reserved_len,
            tail_sentinel_offset: header_size - FFFF_SENTINEL_LENGTH,
        })
    }
}

impl Default for FfffLayout {
    fn default() -> Self {
        FfffLayout::for_header_size(FFFF_HEADER_SIZE_DEFAULT).unwrap()
    }
}

/// Size of the FFFF header block: the smallest power-of-two multiple of the
/// erase block size that exceeds the minimal header length. The redundant
/// header lives at this offset.
pub fn ffff_header_block_size(erase_block_size: u32) -> u32 {
    let mut size = erase_block_size.max(1);
    while size <= FFFF_HEADER_SIZE_MIN && size < FFFF_MAX_HEADER_BLOCK_SIZE {
        size <<= 1;
    }
    size
}
