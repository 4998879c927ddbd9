/*++

Licensed under the Apache-2.0 license.

File Name:

   display.rs

Abstract:

    File contains the implementation of the image display commands.

--*/

use anyhow::Context;
use bootrom_ffff::FfffRomImage;
use bootrom_tftf::Tftf;
use clap::ArgMatches;
use std::path::PathBuf;

/// Run the display-tftf command
pub(crate) fn run_display_tftf(args: &ArgMatches) -> anyhow::Result<()> {
    let file: &PathBuf = args
        .get_one::<PathBuf>("FILE")
        .with_context(|| "FILE arg not specified")?;

    let tftf = Tftf::load_from_file(file)?;
    let title = file.display().to_string();
    tftf.display(Some(&title), "");
    tftf.display_data(Some(&title), "");
    Ok(())
}

/// Run the display-ffff command
pub(crate) fn run_display_ffff(args: &ArgMatches) -> anyhow::Result<()> {
    let file: &PathBuf = args
        .get_one::<PathBuf>("FILE")
        .with_context(|| "FILE arg not specified")?;

    let rom = FfffRomImage::from_file(file)?;
    rom.display(Some(&file.display().to_string()));

    if let Some(root) = args.get_one::<String>("explode") {
        rom.explode(Some(root))?;
    }
    Ok(())
}
