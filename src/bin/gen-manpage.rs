//! Writes flashmon(1) and one page per subcommand
//!
//! The pages carry an EXIT STATUS section listing the session and
//! boot-strap codes, which clap knows nothing about.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;
use flashmon_serial::error::{BOOTSTRAP_CODE_OFFSET, HEX_PARSE_CODE, SESSION_CODE_OFFSET};
use flashmon_serial::{Stage, Step};

#[path = "../cli.rs"]
mod cli;

/// Subcommands that talk to a target and exit with a session or boot-strap code
const TARGET_COMMANDS: &[&str] = &["program", "bootstrap"];

fn exit_status(out: &mut dyn Write, command: &str) -> io::Result<()> {
    writeln!(out, ".SH \"EXIT STATUS\"")?;
    writeln!(out, "0 on success. Failures that are not listed below exit with 1.")?;

    if command != "bootstrap" {
        writeln!(out, ".PP\nSession failures exit with the code printed in the error:")?;
        writeln!(
            out,
            ".TP\n{}\nThe input is not valid Intel\\-HEX.",
            SESSION_CODE_OFFSET + HEX_PARSE_CODE as u16
        )?;
        for step in Step::ALL {
            writeln!(out, ".TP\n{}\nFailure at {}.", step.display_code(), step)?;
        }
    }

    if command != "program" {
        writeln!(out, ".PP\nBoot\\-strap failures:")?;
        for stage in [Stage::One, Stage::Two, Stage::Three] {
            writeln!(
                out,
                ".TP\n{}\nThe {} image is not valid Intel\\-HEX.",
                BOOTSTRAP_CODE_OFFSET + stage.hex_code() as u16,
                stage
            )?;
        }
        writeln!(
            out,
            ".TP\n{}\nThe boot\\-strap loader did not identify the CPU.",
            BOOTSTRAP_CODE_OFFSET + 10
        )?;
        writeln!(
            out,
            ".TP\n{}\nStage 3 was not echoed correctly.",
            BOOTSTRAP_CODE_OFFSET + 11
        )?;
    }
    Ok(())
}

/// Render `cmd` as `<name>.1`, with the exit codes for target commands
fn write_page(cmd: Command, name: &str, exit_codes: Option<&str>, dir: &Path) -> io::Result<PathBuf> {
    let man = Man::new(cmd).title(name.to_uppercase()).section("1");
    let mut buffer = Vec::new();

    man.render_title(&mut buffer)?;
    man.render_name_section(&mut buffer)?;
    man.render_synopsis_section(&mut buffer)?;
    man.render_description_section(&mut buffer)?;
    man.render_options_section(&mut buffer)?;
    man.render_subcommands_section(&mut buffer)?;
    if let Some(command) = exit_codes {
        exit_status(&mut buffer, command)?;
    }
    man.render_version_section(&mut buffer)?;

    let path = dir.join(format!("{}.1", name));
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> io::Result<()> {
    let dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&dir)?;

    let cmd = cli::Cli::command();
    let mut pages = vec![write_page(cmd.clone(), "flashmon", Some("flashmon"), &dir)?];

    for sub in cmd.get_subcommands() {
        let name = sub.get_name();
        let exit_codes = TARGET_COMMANDS.contains(&name).then_some(name);
        pages.push(write_page(
            sub.clone(),
            &format!("flashmon-{}", name),
            exit_codes,
            &dir,
        )?);
    }

    for page in &pages {
        println!("{}", page.display());
    }
    println!("\nView with: man -l {}", pages[0].display());
    Ok(())
}
