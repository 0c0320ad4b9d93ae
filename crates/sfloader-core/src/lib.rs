//! sfloader-core - Serial NOR flash loader algorithm
//!
//! This crate implements the algorithm a host debug probe runs on the
//! target to program an external SPI NOR flash: it turns byte-range
//! program/erase/verify requests from the host into device operations that
//! respect the flash geometry and the offset between the host's address
//! space and the flash's own offsets. It is `no_std` so it can be linked
//! into the RAM-resident loader image.
//!
//! # Features
//!
//! - `std` - Enable standard library support: TOML device files and
//!   `std::error::Error` impls
//!
//! # Example
//!
//! ```ignore
//! use sfloader_core::descriptor::devices::W25Q64JV;
//! use sfloader_core::driver::{NoPlatform, SpiMaster, SpiNorConfig, SpiNorFlash};
//! use sfloader_core::erase::EraseRequest;
//! use sfloader_core::loader::{FlashLoader, PrepareParams};
//!
//! fn program<M: SpiMaster>(master: M, image: &[u8]) -> sfloader_core::Result<()> {
//!     let driver = SpiNorFlash::new(master, SpiNorConfig::from_descriptor(&W25Q64JV));
//!     let mut loader = FlashLoader::new(&W25Q64JV, driver, NoPlatform, [0u8; 4096]);
//!     loader.prepare(PrepareParams::from_raw(0, 0, 2))?;
//!     loader.erase(EraseRequest {
//!         start_addr: W25Q64JV.base_addr,
//!         start_sector: 0,
//!         sector_count: 16,
//!     })?;
//!     loader.program(W25Q64JV.base_addr, image)?;
//!     loader.restore();
//!     Ok(())
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod abi;
pub mod address;
pub mod descriptor;
pub mod driver;
pub mod erase;
pub mod error;
pub mod loader;
pub mod protocol;
pub mod scan;
pub mod spi;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
