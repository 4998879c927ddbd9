/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    TFTF firmware blob codec: header, section table and payload handling.

--*/

mod image;
mod section;
mod signature;

pub use image::Tftf;
pub use section::TftfSection;
pub use signature::{
    signature_block_write_map, signature_type_name, SignatureBlock,
    TFTF_SIGNATURE_KEY_NAME_LENGTH, TFTF_SIGNATURE_LEN_FIXED_PART,
    TFTF_SIGNATURE_TYPE_RSA_2048_SHA_256, TFTF_SIGNATURE_TYPE_UNKNOWN,
};
