//! Error types for sfloader-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Every variant maps to a stable negative status
//! code, which is what the host tool sees through the loader ABI.

use core::fmt;

use crate::erase::EraseGranularity;

/// Details about an erase failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseFailure {
    /// Erase command failed on the bus
    CommandFailed {
        /// Physical offset where the erase was attempted
        addr: u32,
    },
    /// The driver has no command for this erase unit
    Unsupported {
        /// The requested erase unit
        granularity: EraseGranularity,
    },
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // SPI errors
    /// SPI transfer failed
    SpiTransferFailed,
    /// The device stayed busy past the operation timeout
    Timeout,
    /// Opcode is not supported by the bus master
    OpcodeNotSupported,

    // Chip errors
    /// Identification returned no device (all zeroes or all ones)
    ChipNotFound,

    // Operation errors
    /// Erase operation failed
    EraseError(EraseFailure),
    /// Write/program operation failed
    WriteError,
    /// Read operation failed
    ReadError,
    /// Write enable latch did not set
    WriteProtected,

    // Address/size errors
    /// Physical range extends beyond the device
    AddressOutOfBounds,
    /// Provided buffer is too small for the operation
    BufferTooSmall,

    // Loader errors
    /// The compiled-in device descriptor failed validation
    InvalidDescriptor,
    /// An entry point was called before Prepare
    NotPrepared,
}

impl Error {
    /// Status code reported to the host tool for this error
    ///
    /// Codes are negative so they never collide with the success values of
    /// the entry points (0, a byte count, or a device identification).
    pub const fn code(self) -> i32 {
        match self {
            Self::SpiTransferFailed => -1,
            Self::Timeout => -2,
            Self::ChipNotFound => -3,
            Self::EraseError(_) => -4,
            Self::WriteError => -5,
            Self::ReadError => -6,
            Self::AddressOutOfBounds => -7,
            Self::WriteProtected => -8,
            Self::OpcodeNotSupported => -9,
            Self::BufferTooSmall => -10,
            Self::InvalidDescriptor => -11,
            Self::NotPrepared => -12,
        }
    }
}

impl fmt::Display for EraseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed { addr } => {
                write!(f, "erase command failed at offset 0x{:08X}", addr)
            }
            Self::Unsupported { granularity } => {
                write!(f, "{} erase is not supported by the driver", granularity)
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpiTransferFailed => write!(f, "SPI transfer failed"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::OpcodeNotSupported => write!(f, "SPI opcode not supported by bus master"),
            Self::ChipNotFound => write!(f, "flash chip not found"),
            Self::EraseError(failure) => write!(f, "{}", failure),
            Self::WriteError => write!(f, "write operation failed"),
            Self::ReadError => write!(f, "read operation failed"),
            Self::WriteProtected => write!(f, "write enable latch not set"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::InvalidDescriptor => write!(f, "invalid device descriptor"),
            Self::NotPrepared => write!(f, "loader not prepared"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
