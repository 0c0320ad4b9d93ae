//! SPI types and command structures
//!
//! Single-I/O transactions with an optional 3-byte address phase, which is
//! all the serial NOR parts this loader targets need.

mod command;
pub mod opcodes;

pub use command::{AddressWidth, SpiCommand};
pub use opcodes::StatusRegister1;
