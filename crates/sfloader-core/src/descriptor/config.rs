//! TOML device file parsing
//!
//! Parses device files in TOML format into a validated descriptor:
//!
//! ```toml
//! [device]
//! name = "W25Q64JV SPI Flash"
//! base_addr = 0x90000000
//! total_size = "8 MiB"
//! page_size = 256
//! erased_value = 0xFF
//! timeout_prog_ms = 30
//! timeout_erase_ms = 4000
//!
//! [[region]]
//! size = "4 KiB"
//! start = 0x0
//! ```

use std::fs;
use std::path::Path;
use std::string::String;
use std::vec::Vec;
use std::format;

use thiserror::Error;

use super::{DescriptorError, DeviceDescriptor, MAX_NUM_SECTORS, NAME_LEN};

/// Errors from loading a device file
#[derive(Debug, Error)]
pub enum DeviceConfigError {
    /// I/O error reading the file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or schema error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Name does not fit the descriptor's name field
    #[error("device name is longer than {max} bytes")]
    NameTooLong {
        /// Maximum name length
        max: usize,
    },

    /// More regions than the sector info list can hold
    #[error("too many sector regions: {count} (max {max})")]
    TooManyRegions {
        /// Regions in the file
        count: usize,
        /// Maximum supported
        max: usize,
    },

    /// The resulting descriptor is inconsistent
    #[error("invalid device descriptor: {0}")]
    Invalid(#[from] DescriptorError),
}

/// TOML device file structure
#[derive(Debug, serde::Deserialize)]
struct TomlDeviceFile {
    device: TomlDevice,
    region: Vec<TomlRegion>,
}

/// Device section
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDevice {
    name: String,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    base_addr: u32,
    #[serde(deserialize_with = "deserialize_size")]
    total_size: u32,
    #[serde(default = "default_page_size", deserialize_with = "deserialize_size")]
    page_size: u32,
    #[serde(default = "default_erased_value")]
    erased_value: u8,
    timeout_prog_ms: u32,
    timeout_erase_ms: u32,
}

/// Region definition in TOML
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlRegion {
    #[serde(deserialize_with = "deserialize_size")]
    size: u32,
    #[serde(default, deserialize_with = "deserialize_hex_u32")]
    start: u32,
}

fn default_page_size() -> u32 {
    256
}

fn default_erased_value() -> u8 {
    0xFF
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size that can be a number or a string like "4 KiB"
fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "8 MiB", "4 KiB" or "0x1000"
fn parse_size(s: &str) -> Result<u32, String> {
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.trim().to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let value: u32 = num
        .parse()
        .map_err(|e| format!("invalid size '{}': {}", s, e))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size overflows 32 bits: {}", s))
}

/// Parse a TOML device description into a validated descriptor
pub fn parse_device_toml(content: &str) -> Result<DeviceDescriptor, DeviceConfigError> {
    let file: TomlDeviceFile = toml::from_str(content)?;
    let dev = file.device;

    if dev.name.len() > NAME_LEN - 1 {
        return Err(DeviceConfigError::NameTooLong { max: NAME_LEN - 1 });
    }
    if file.region.len() > MAX_NUM_SECTORS - 1 {
        return Err(DeviceConfigError::TooManyRegions {
            count: file.region.len(),
            max: MAX_NUM_SECTORS - 1,
        });
    }

    let mut desc = DeviceDescriptor::new(&dev.name, dev.base_addr, dev.total_size)
        .with_page_size(dev.page_size)
        .with_erased_value(dev.erased_value)
        .with_timeouts(dev.timeout_prog_ms, dev.timeout_erase_ms);
    for region in &file.region {
        desc = desc.with_region(region.size, region.start);
    }

    desc.validate()?;
    log::debug!("Loaded device '{}' from TOML", desc.name_str());
    Ok(desc)
}

/// Load a TOML device file
pub fn load_device_toml(path: &Path) -> Result<DeviceDescriptor, DeviceConfigError> {
    let content = fs::read_to_string(path)?;
    parse_device_toml(&content)
}
