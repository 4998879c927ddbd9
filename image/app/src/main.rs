/*++

Licensed under the Apache-2.0 license.

File Name:

   main.rs

Abstract:

    Main entry point for the boot ROM imaging application.

--*/

use std::path::PathBuf;

use clap::{arg, value_parser, Command};

mod create;
mod display;

/// Entry point
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sub_cmds = vec![
        Command::new("create-tftf")
            .about("Create a TFTF firmware package")
            .arg(
                arg!(--"config" <FILE> "TFTF layout configuration file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"header-size" <U32> "TFTF header size in bytes")
                    .required(false)
                    .value_parser(value_parser!(u32)),
            )
            .arg(
                arg!(--"out" <FILE> "Output file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(arg!(--"map" "Emit a companion .map file of field offsets")),
        Command::new("display-tftf")
            .about("Display a TFTF firmware package")
            .arg(
                arg!(<FILE> "TFTF file to display")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("create-ffff")
            .about("Create an FFFF flash image")
            .arg(
                arg!(--"config" <FILE> "FFFF layout configuration file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"out" <FILE> "Output file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(arg!(--"map" "Emit a companion .map file of field offsets")),
        Command::new("display-ffff")
            .about("Display an FFFF flash image")
            .arg(
                arg!(<FILE> "FFFF file to display")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"explode" <ROOT> "Write each element out as <ROOT>_element_<N>")
                    .required(false)
                    .value_parser(value_parser!(String)),
            ),
    ];

    let cmd = Command::new("bootrom-image-app")
        .arg_required_else_help(true)
        .subcommands(sub_cmds)
        .about("Boot ROM flash imaging tools")
        .get_matches();

    let result = match cmd.subcommand().unwrap() {
        ("create-tftf", args) => create::run_create_tftf(args),
        ("display-tftf", args) => display::run_display_tftf(args),
        ("create-ffff", args) => create::run_create_ffff(args),
        ("display-ffff", args) => display::run_display_ffff(args),
        (_, _) => unreachable!(),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {e:#}");
        std::process::exit(2);
    }
}
