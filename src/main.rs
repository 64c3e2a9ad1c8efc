#![forbid(unsafe_code)]

use clap::Parser;
use log::warn;
use rstfix::{RefTable, RstfixError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "rstfix", version)]
struct Cli {
    /// Pandoc-generated RST input file.
    input: PathBuf,

    /// Destination file; stdout when omitted.
    output: Option<PathBuf>,

    /// Reference table listing valid cross-reference targets, one per line.
    #[arg(long = "refs", value_name = "PATH", default_value = "allrefs.txt")]
    refs: PathBuf,
}

fn write_output(path: Option<&Path>, contents: &str) -> io::Result<()> {
    match path {
        Some(path) => fs::write(path, contents),
        None => io::stdout().write_all(contents.as_bytes()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let input = fs::read_to_string(&cli.input)
        .map_err(|err| RstfixError::MissingInput(format!("{}: {err}", cli.input.display())))?;
    let cmdname = rstfix::command_name(&cli.input);

    // A missing reference table is not fatal: cross-referencing degrades
    // to plain-text passthrough.
    let refs = match RefTable::load(&cli.refs) {
        Ok(refs) => refs,
        Err(err) => {
            warn!("{err}; continuing without cross-references");
            RefTable::empty()
        }
    };
    if !refs.is_empty() && !refs.contains(&cmdname) {
        warn!("{cmdname} is not in the reference table");
    }

    let output = rstfix::transform(&input, &cmdname, &refs);
    write_output(cli.output.as_deref(), &output)
        .map_err(|err| RstfixError::Output(err.to_string()))?;
    Ok(())
}
