//! Renders the `duplexwire(1)` manual page from the clap definition.

use std::{fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let out_dir = PathBuf::from("target/generated-man");
    fs::create_dir_all(&out_dir)?;

    let mut page = Vec::new();
    Man::new(cli::Cli::command())
        .section("1")
        .manual("duplexwire manual")
        .render(&mut page)?;
    fs::write(out_dir.join("duplexwire.1"), page)?;

    Ok(())
}
