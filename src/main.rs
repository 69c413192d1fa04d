//! peflatten CLI - flatten a PE32 image into a rebased raw binary.

use anyhow::Context;
use bytesize::ByteSize;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use peflatten::{flatten_file, FlattenConfig, DEFAULT_OUTPUT};

/// Flatten a PE32 image into a raw binary rebased for a target address.
#[derive(Parser)]
#[command(name = "peflatten")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// PE32 image to flatten
    input: PathBuf,

    /// Address the flat image will be loaded at (decimal or 0x-prefixed hex)
    #[arg(value_parser = parse_address)]
    flatten_base: u32,

    /// Output file path
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = FlattenConfig {
        flatten_base: cli.flatten_base,
        output: cli.output,
    };

    let report = flatten_file(&cli.input, &config)
        .with_context(|| format!("failed to flatten {}", cli.input.display()))?;

    println!(
        "Wrote flattened binary! {} ({}, {} sections, {} relocations) based at 0x{:X}",
        config.output.display(),
        ByteSize::b(report.image_len as u64),
        report.sections.len(),
        report.relocations.highlow,
        report.flatten_base,
    );

    Ok(())
}

fn main() -> ExitCode {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprint!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Every failure is one line and status 1, never a backtrace.
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
