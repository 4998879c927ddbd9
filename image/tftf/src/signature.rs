/*++

Licensed under the Apache-2.0 license.

File Name:

   signature.rs

Abstract:

    TFTF signature block: the fixed-prefix record carried as the payload of
    a signature section.

--*/

use std::io::Write;

use anyhow::ensure;
use bootrom_image_types::util;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const TFTF_SIGNATURE_KEY_NAME_LENGTH: usize = 96;
pub const TFTF_SIGNATURE_LEN_FIXED_PART: usize = core::mem::size_of::<SignatureBlockFixed>();

pub const TFTF_SIGNATURE_OFF_LENGTH: usize = 0x00;
pub const TFTF_SIGNATURE_OFF_TYPE: usize = 0x04;
pub const TFTF_SIGNATURE_OFF_KEY_NAME: usize = 0x08;
pub const TFTF_SIGNATURE_OFF_KEY_SIGNATURE: usize = 0x68;

pub const TFTF_SIGNATURE_TYPE_UNKNOWN: u32 = 0x00;
pub const TFTF_SIGNATURE_TYPE_RSA_2048_SHA_256: u32 = 0x01;

/// Convert a signature type into textual form
pub fn signature_type_name(signature_type: u32) -> &'static str {
    match signature_type {
        TFTF_SIGNATURE_TYPE_RSA_2048_SHA_256 => "rsa2048-sha256",
        _ => "unknown",
    }
}

/// Fixed prefix of a signature block
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy)]
struct SignatureBlockFixed {
    length: u32,
    signature_type: u32,
    key_name: [u8; TFTF_SIGNATURE_KEY_NAME_LENGTH],
}

/// TFTF signature block: `length` always equals the fixed prefix size plus
/// the signature byte count, making the record self-sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub signature_type: u32,
    pub key_name: [u8; TFTF_SIGNATURE_KEY_NAME_LENGTH],
    pub signature: Vec<u8>,
}

impl SignatureBlock {
    pub fn new(signature_type: u32, key_name: &str, signature: Vec<u8>) -> SignatureBlock {
        SignatureBlock {
            signature_type,
            key_name: util::packed_string(key_name),
            signature,
        }
    }

    /// Total packed length of the block
    pub fn length(&self) -> usize {
        TFTF_SIGNATURE_LEN_FIXED_PART + self.signature.len()
    }

    /// Pack the signature data into a binary blob
    pub fn pack(&self) -> Vec<u8> {
        let fixed = SignatureBlockFixed {
            length: self.length() as u32,
            signature_type: self.signature_type,
            key_name: self.key_name,
        };
        let mut buf = Vec::with_capacity(self.length());
        buf.extend_from_slice(fixed.as_bytes());
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Unpack a signature block from a binary buffer
    pub fn unpack(buf: &[u8]) -> anyhow::Result<SignatureBlock> {
        let fixed = SignatureBlockFixed::read_from_prefix(buf)
            .ok_or_else(|| anyhow::anyhow!("signature block buffer too short"))?;
        let length = fixed.length as usize;
        ensure!(
            (TFTF_SIGNATURE_LEN_FIXED_PART..=buf.len()).contains(&length),
            "signature block length {:#x} is inconsistent with a {} byte buffer",
            fixed.length,
            buf.len()
        );
        Ok(SignatureBlock {
            signature_type: fixed.signature_type,
            key_name: fixed.key_name,
            signature: buf[TFTF_SIGNATURE_LEN_FIXED_PART..length].to_vec(),
        })
    }

    /// Display the signature block
    pub fn display(&self, indent: &str) {
        println!("{indent}    Length:    {:08x}", self.length());
        println!(
            "{indent}    Sig. type: {} ({})",
            self.signature_type,
            signature_type_name(self.signature_type)
        );
        println!("{indent}    Key name:");
        println!("{indent}        '{}'", util::unpacked_string(&self.key_name));
        println!("{indent}    Signature:");
        util::display_binary_data(&self.signature, true, &format!("{indent}        "));
    }
}

/// Write the field names and offsets of a signature block to a map file
pub fn signature_block_write_map<W: Write>(
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
        "{prefix}length  {:08x}",
        base_offset + TFTF_SIGNATURE_OFF_LENGTH
    )?;
    writeln!(
        w,
        "{prefix}type  {:08x}",
        base_offset + TFTF_SIGNATURE_OFF_TYPE
    )?;
    writeln!(
        w,
        "{prefix}key_name  {:08x}",
        base_offset + TFTF_SIGNATURE_OFF_KEY_NAME
    )?;
    writeln!(
        w,
        "{prefix}key_signature  {:08x}",
        base_offset + TFTF_SIGNATURE_OFF_KEY_SIGNATURE
    )
}
