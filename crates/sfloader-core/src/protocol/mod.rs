//! Protocol implementations
//!
//! Serial NOR command sequences on top of a [`SpiMaster`](crate::driver::SpiMaster).

mod spi25;

pub use spi25::*;
