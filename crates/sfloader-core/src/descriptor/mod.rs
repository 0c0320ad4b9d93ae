//! Flash device descriptor
//!
//! The descriptor is the record the host tool reads straight out of the
//! loader image to learn the flash geometry before it calls any entry
//! point. Its layout is a binary contract; see [`DeviceDescriptor`].

#[cfg(feature = "std")]
mod config;
pub mod devices;
mod types;

#[cfg(feature = "std")]
pub use config::*;
pub use types::*;
