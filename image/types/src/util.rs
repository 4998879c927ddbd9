/*++

Licensed under the Apache-2.0 license.

File Name:

   util.rs

Abstract:

    Byte-layout and filename helpers shared by the TFTF and FFFF codecs.

--*/

use std::path::{Path, PathBuf};

/// Determine if a number is a power of 2
pub fn is_power_of_2(x: u32) -> bool {
    x != 0 && (x & (x - 1)) == 0
}

/// Determine if a location is block-aligned
pub fn block_aligned(location: u32, block_size: u32) -> bool {
    (location & (block_size - 1)) == 0
}

/// Round up to the next block boundary
pub fn next_boundary(location: u32, block_size: u32) -> u32 {
    (location + (block_size - 1)) & !(block_size - 1)
}

/// Check a range of bytes for a constant fill
pub fn is_constant_fill(bytes: &[u8], fill_byte: u8) -> bool {
    bytes.iter().all(|&b| b == fill_byte)
}

/// Copy a string into a fixed-size, zero-padded field, truncating as needed
pub fn packed_string<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Recover a string from a zero-padded field, stopping at the first NUL
pub fn unpacked_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Trim a string to at most `max_len` bytes, respecting char boundaries
pub fn truncate_name(name: &mut String, max_len: usize) {
    if name.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.truncate(end);
}

/// Display a binary blob in 32-byte hex lines.
///
/// If `show_all` is false and the blob is longer than 96 bytes, only the
/// first and last 32 bytes are shown with a ":" spacer between them.
pub fn display_binary_data(blob: &[u8], show_all: bool, indent: &str) {
    const MAX_ON_LINE: usize = 32;

    if show_all || blob.len() <= 3 * MAX_ON_LINE {
        for chunk in blob.chunks(MAX_ON_LINE) {
            println!("{}{}", indent, hex::encode(chunk));
        }
    } else {
        println!("{}{}", indent, hex::encode(&blob[..MAX_ON_LINE]));
        println!("{}  :", indent);
        println!("{}{}", indent, hex::encode(&blob[blob.len() - MAX_ON_LINE..]));
    }
}

/// Resolve an input filename, retrying with the default extension appended
/// when the file as given does not exist.
pub fn resolve_input_path(path: &Path, extension: &str) -> PathBuf {
    if path.is_file() {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    let alternate = PathBuf::from(name);
    if alternate.is_file() {
        alternate
    } else {
        path.to_path_buf()
    }
}

/// Append the default extension to an output filename that has none.
pub fn output_path(path: &Path, extension: &str) -> PathBuf {
    if path.extension().is_none() {
        path.with_extension(extension)
    } else {
        path.to_path_buf()
    }
}
