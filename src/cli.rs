//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a byte value (hex or decimal)
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Value {} does not fit in a byte", value))
}

#[derive(Parser)]
#[command(name = "sfloader")]
#[command(author, version, about = "Serial NOR flash loader simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Device description (TOML); defaults to the built-in W25Q64JV
    #[arg(long, global = true)]
    pub device: Option<PathBuf>,

    /// Flash image backing the emulated chip; created erased if missing
    #[arg(long, global = true, default_value = "flash.bin")]
    pub image: PathBuf,

    /// Run the session but do not write the image back
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare the loader and show the device
    Info,

    /// Write the raw descriptor record the host tool reads
    Descriptor {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Read flash contents to file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start address (defaults to the device base)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: Option<u32>,

        /// Number of bytes (defaults to the rest of the device)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Program a file into flash the way the host tool does
    Program {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (defaults to the device base)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: Option<u32>,

        /// Erase the covered sectors without blank-checking them first
        #[arg(long)]
        force_erase: bool,

        /// Verify after programming
        #[arg(long)]
        verify: bool,
    },

    /// Erase sectors or the whole chip
    Erase {
        /// Address of the first sector
        #[arg(long, value_parser = parse_hex_u32, required_unless_present = "chip")]
        addr: Option<u32>,

        /// Number of sectors
        #[arg(long, value_parser = parse_hex_u32, default_value = "1")]
        sectors: u32,

        /// Erase the whole chip
        #[arg(long, conflicts_with = "addr")]
        chip: bool,
    },

    /// Check that a range holds only the erased value
    BlankCheck {
        /// Start address (defaults to the device base)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: Option<u32>,

        /// Number of bytes (defaults to the rest of the device)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,

        /// Value to check for (defaults to the device's erased value)
        #[arg(long, value_parser = parse_hex_u8)]
        value: Option<u8>,
    },

    /// Verify flash contents against file
    Verify {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (defaults to the device base)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: Option<u32>,
    },

    /// CRC-32 of a flash range
    Crc {
        /// Start address (defaults to the device base)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: Option<u32>,

        /// Number of bytes (defaults to the rest of the device)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,

        /// Reflected polynomial
        #[arg(long, value_parser = parse_hex_u32, default_value = "0xEDB88320")]
        polynomial: u32,
    },
}
