//! sfloader - Serial NOR flash loader simulator
//!
//! Drives the flash loader the way the debug probe's host tool does:
//! every command is one session of Prepare, the requested operations and
//! Restore. The chip behind the loader is the in-memory emulator, backed by
//! an image file that persists between runs.

mod cli;
mod commands;
mod session;

use clap::Parser;
use cli::{Cli, Commands};
use session::Session;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let session = Session::open(cli.device.as_deref(), &cli.image, cli.dry_run)?;

    match cli.command {
        Commands::Info => commands::info::run_info(&session),
        Commands::Descriptor { output } => commands::info::run_descriptor(&session, &output),
        Commands::Read {
            output,
            addr,
            length,
        } => commands::read::run_read(&session, &output, addr, length),
        Commands::Program {
            input,
            addr,
            force_erase,
            verify,
        } => commands::program::run_program(&session, &input, addr, force_erase, verify),
        Commands::Erase {
            addr,
            sectors,
            chip,
        } => match addr {
            Some(addr) if !chip => commands::erase::run_erase(&session, addr, sectors),
            _ => commands::erase::run_erase_chip(&session),
        },
        Commands::BlankCheck {
            addr,
            length,
            value,
        } => commands::scan::run_blank_check(&session, addr, length, value),
        Commands::Verify { input, addr } => commands::scan::run_verify(&session, &input, addr),
        Commands::Crc {
            addr,
            length,
            polynomial,
        } => commands::scan::run_crc(&session, addr, length, polynomial),
    }?;

    Ok(())
}
