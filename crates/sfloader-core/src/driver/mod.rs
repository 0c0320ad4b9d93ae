//! Driver seams
//!
//! The loader core talks to the flash only through [`FlashDriver`] and to
//! the board only through [`Platform`]. [`SpiNorFlash`] implements the
//! driver for any serial NOR part behind a [`SpiMaster`].

mod spi_nor;
mod traits;

pub use spi_nor::{SpiNorConfig, SpiNorFlash};
pub use traits::{FlashDriver, NoPlatform, Platform, SpiMaster};
