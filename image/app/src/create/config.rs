/*++

Licensed under the Apache-2.0 license.

File Name:

   config.rs

Abstract:

    File contains utilities for parsing image layout configuration files.

--*/

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

/// One TFTF section description
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct SectionConfig {
    /// Section type short name: code, data, compressed_code,
    /// compressed_data, manifest, signature, certificate
    pub r#type: String,

    #[serde(default)]
    pub class: u32,

    #[serde(default)]
    pub id: u32,

    #[serde(default)]
    pub load_address: u32,

    /// File holding the section payload
    pub file: PathBuf,
}

/// TFTF package configuration
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct TftfConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub package_type: u32,

    #[serde(default)]
    pub start_location: u32,

    #[serde(default)]
    pub unipro_mfg_id: u32,

    #[serde(default)]
    pub unipro_pid: u32,

    #[serde(default)]
    pub ara_vid: u32,

    #[serde(default)]
    pub ara_pid: u32,

    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

/// One FFFF element description
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct ElementConfig {
    /// Element type short name: 2fw, 3fw, ims_cert, cms_cert, data
    pub r#type: String,

    #[serde(default)]
    pub id: u32,

    #[serde(default)]
    pub generation: u32,

    /// Absolute flash offset; 0 lets the layout pass pick the next free
    /// erase block
    #[serde(default)]
    pub location: u32,

    /// TFTF file providing the element contents
    pub file: PathBuf,
}

/// FFFF flash image configuration
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct FfffConfig {
    #[serde(default)]
    pub name: String,

    pub flash_capacity: u32,

    pub erase_block_size: u32,

    #[serde(default)]
    pub image_length: u32,

    #[serde(default)]
    pub generation: u32,

    #[serde(default)]
    pub elements: Vec<ElementConfig>,
}

/// Load a TFTF layout configuration from file
pub(crate) fn load_tftf_config(path: &PathBuf) -> anyhow::Result<TftfConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file {}", path.display()))?;

    let config: TftfConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    Ok(config)
}

/// Load an FFFF layout configuration from file
pub(crate) fn load_ffff_config(path: &PathBuf) -> anyhow::Result<FfffConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file {}", path.display()))?;

    let config: FfffConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tftf_config() {
        let config: TftfConfig = toml::from_str(
            r#"
            name = "bridge firmware"
            unipro_mfg_id = 0x126

            [[sections]]
            type = "code"
            id = 1
            load_address = 0x10000000
            file = "code.bin"

            [[sections]]
            type = "manifest"
            file = "manifest.mnfs"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "bridge firmware");
        assert_eq!(config.unipro_mfg_id, 0x126);
        assert_eq!(config.sections.len(), 2);
        assert_eq!(config.sections[0].r#type, "code");
        assert_eq!(config.sections[1].load_address, 0);
    }

    #[test]
    fn test_parse_ffff_config() {
        let config: FfffConfig = toml::from_str(
            r#"
            name = "spirom"
            flash_capacity = 0x40000
            erase_block_size = 0x800
            image_length = 0x20000
            generation = 1

            [[elements]]
            type = "2fw"
            id = 1
            generation = 1
            file = "stage2.bin"
            "#,
        )
        .unwrap();
        assert_eq!(config.erase_block_size, 0x800);
        assert_eq!(config.elements.len(), 1);
        assert_eq!(config.elements[0].r#type, "2fw");
        assert_eq!(config.elements[0].location, 0);
    }
}
