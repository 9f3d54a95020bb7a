//! folio CLI: batch DOCX → Markdown conversion.
//!
//! Converts every `.docx` file in a folder to a Markdown file next to it,
//! extracting embedded media, using pandoc or the built-in reader.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    match commands::run(cli).await {
        Ok(code) => Ok(code),
        Err(report) => {
            eprintln!("Error: {report:?}");
            Ok(commands::exit_code(&report))
        }
    }
}
