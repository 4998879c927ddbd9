/*++

Licensed under the Apache-2.0 license.

File Name:

   mod.rs

Abstract:

    File contains the implementation of the image creation commands.

--*/

mod config;

use anyhow::{bail, Context};
use bootrom_ffff::FfffRomImage;
use bootrom_image_types::*;
use bootrom_tftf::Tftf;
use clap::ArgMatches;
use std::path::PathBuf;

/// Run the create-tftf command
pub(crate) fn run_create_tftf(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let out_path: &PathBuf = args
        .get_one::<PathBuf>("out")
        .with_context(|| "out arg not specified")?;

    let header_size = args
        .get_one::<u32>("header-size")
        .copied()
        .unwrap_or(TFTF_HEADER_SIZE_DEFAULT);

    let config = config::load_tftf_config(config_path)?;

    let mut tftf = Tftf::new(header_size)?;
    tftf.firmware_package_name = config.name;
    tftf.package_type = config.package_type;
    tftf.start_location = config.start_location;
    tftf.unipro_mfg_id = config.unipro_mfg_id;
    tftf.unipro_pid = config.unipro_pid;
    tftf.ara_vid = config.ara_vid;
    tftf.ara_pid = config.ara_pid;

    for section in &config.sections {
        let Some(section_type) = TftfSectionType::from_short_name(&section.r#type) else {
            bail!("unknown section type '{}'", section.r#type);
        };
        tftf.add_section_from_file(
            section_type,
            section.class,
            section.id,
            &section.file,
            section.load_address,
        )?;
    }

    tftf.post_process();
    if !tftf.is_good() {
        bail!("TFTF header failed validation");
    }
    tftf.write(out_path)?;

    if args.get_flag("map") {
        tftf.create_map_file(out_path, 0, "tftf")?;
    }
    Ok(())
}

/// Run the create-ffff command
pub(crate) fn run_create_ffff(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let out_path: &PathBuf = args
        .get_one::<PathBuf>("out")
        .with_context(|| "out arg not specified")?;

    let config = config::load_ffff_config(config_path)?;

    let mut rom = FfffRomImage::new(
        &config.name,
        config.flash_capacity,
        config.erase_block_size,
        config.image_length,
        config.generation,
    )?;

    for element in &config.elements {
        let Some(element_type) = FfffElementType::from_short_name(&element.r#type) else {
            bail!("unknown element type '{}'", element.r#type);
        };
        rom.add_element(
            element_type.raw(),
            element.id,
            element.generation,
            element.location,
            0,
            Some(&element.file),
        )?;
    }

    rom.post_process()?;
    rom.write(out_path)?;

    if args.get_flag("map") {
        rom.create_map_file(out_path, 0)?;
    }
    Ok(())
}
