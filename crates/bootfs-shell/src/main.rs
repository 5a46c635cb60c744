//! bootfs: run filesystem commands against disk images and host directories.
//!
//! Usage:
//!   # Interactive
//!   bootfs --config bootfs.toml
//!
//!   # One-shot commands
//!   bootfs -c 'ls mmc 0:1 /boot' -c 'load mmc 0:1 42000000 /boot/Image'
//!
//!   # Script file, one command line per line
//!   bootfs --config bootfs.toml boot.cmd

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use bootfs_kernel::BootfsConfig;
use bootfs_shell::Shell;

/// Filesystem command shell.
#[derive(Parser, Debug)]
#[command(name = "bootfs")]
#[command(about = "Boot-loader style filesystem commands over disk images")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command line to run (repeatable, runs before the script)
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Script to run instead of reading stdin
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Logs go to stderr; command output owns stdout
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BootfsConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BootfsConfig::default(),
    };
    let mut shell = Shell::from_config(&config, Box::new(io::stdout()))
        .context("setting up devices")?;

    let mut failures = 0;
    for line in &args.commands {
        if !shell.run_line(line).is_success() {
            failures += 1;
        }
    }

    if let Some(script) = &args.script {
        let file = File::open(script)
            .with_context(|| format!("opening script {}", script.display()))?;
        failures += shell.run_script(BufReader::new(file), false)?;
    } else if args.commands.is_empty() {
        let stdin = io::stdin();
        let prompt = stdin.is_terminal();
        failures += shell.run_script(stdin.lock(), prompt)?;
    }

    if failures > 0 {
        tracing::debug!(failures, "exiting with failure");
        std::process::exit(1);
    }
    Ok(())
}
