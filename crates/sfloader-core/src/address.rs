//! Logical to physical address translation
//!
//! The host tool addresses the flash through the window the device is
//! mapped at (`base_addr`); the driver wants offsets from the start of the
//! flash itself.

use crate::descriptor::DeviceDescriptor;

/// Maps host-visible addresses to physical flash offsets and back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTranslator {
    base: u32,
}

impl AddressTranslator {
    /// Create a translator for a flash mapped at `base`
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    /// Create a translator for the descriptor's base address
    pub const fn from_descriptor(desc: &DeviceDescriptor) -> Self {
        Self::new(desc.base_addr)
    }

    /// Logical address of physical offset 0
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Physical offset for a logical address
    ///
    /// Addresses below the base are clamped to offset 0 instead of failing.
    pub fn to_physical(&self, logical: u32) -> u32 {
        match logical.checked_sub(self.base) {
            Some(offset) => offset,
            None => {
                log::debug!(
                    "Address 0x{:08X} below base 0x{:08X}, clamped to offset 0",
                    logical,
                    self.base
                );
                0
            }
        }
    }

    /// Logical address for a physical offset
    pub const fn to_logical(&self, physical: u32) -> u32 {
        physical.wrapping_add(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x9000_0000;

    #[test]
    fn test_above_base_subtracts() {
        let t = AddressTranslator::new(BASE);
        assert_eq!(t.to_physical(BASE), 0);
        assert_eq!(t.to_physical(BASE + 0x1234), 0x1234);
        assert_eq!(t.to_physical(u32::MAX), u32::MAX - BASE);
    }

    #[test]
    fn test_below_base_clamps_to_zero() {
        let t = AddressTranslator::new(BASE);
        for addr in [0, 1, 0x0800_0000, BASE - 1] {
            assert_eq!(t.to_physical(addr), 0, "0x{:08X}", addr);
        }
    }

    #[test]
    fn test_to_logical() {
        let t = AddressTranslator::new(BASE);
        assert_eq!(t.to_logical(0), BASE);
        assert_eq!(t.to_logical(0x80_0000), 0x9080_0000);
        assert_eq!(t.to_logical(t.to_physical(BASE + 42)), BASE + 42);
    }

    #[test]
    fn test_zero_base_is_identity() {
        let t = AddressTranslator::new(0);
        assert_eq!(t.to_physical(0x1000), 0x1000);
        assert_eq!(t.to_logical(0x1000), 0x1000);
    }

    #[test]
    fn test_from_descriptor() {
        let t = AddressTranslator::from_descriptor(&crate::descriptor::devices::W25Q64JV);
        assert_eq!(t.base(), BASE);
    }
}
