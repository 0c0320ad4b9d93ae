//! SPI command structure

/// Address width for SPI commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressWidth {
    /// No address phase
    #[default]
    None,
    /// 3-byte (24-bit) address - supports up to 16 MiB
    ThreeByte,
}

impl AddressWidth {
    /// Returns the number of address bytes
    pub const fn bytes(&self) -> usize {
        match self {
            Self::None => 0,
            Self::ThreeByte => 3,
        }
    }

    /// Returns the maximum addressable size in bytes
    pub const fn max_size(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::ThreeByte => 16 * 1024 * 1024,
        }
    }

    /// Encode an address into bytes, most significant first
    pub fn encode(&self, address: u32, buf: &mut [u8]) {
        if let Self::ThreeByte = self {
            buf[0] = (address >> 16) as u8;
            buf[1] = (address >> 8) as u8;
            buf[2] = address as u8;
        }
    }
}

/// A single SPI transaction
///
/// Designed to avoid allocation - uses slices for data.
/// The lifetime parameter `'a` ties the command to the buffers it references.
pub struct SpiCommand<'a> {
    /// The opcode byte
    pub opcode: u8,

    /// Address (if any)
    pub address: Option<u32>,

    /// Address width
    pub address_width: AddressWidth,

    /// Number of dummy cycles after address
    pub dummy_cycles: u8,

    /// Data to write after opcode/address/dummy
    pub write_data: &'a [u8],

    /// Buffer to read into (mutable)
    pub read_buf: &'a mut [u8],
}

impl<'a> SpiCommand<'a> {
    /// Create a simple command with no address or data (e.g., WREN, CE)
    pub fn simple(opcode: u8) -> Self {
        Self {
            opcode,
            address: None,
            address_width: AddressWidth::None,
            dummy_cycles: 0,
            write_data: &[],
            read_buf: &mut [],
        }
    }

    /// Create a read register command with no address (e.g., RDSR, RDID)
    pub fn read_reg(opcode: u8, buf: &'a mut [u8]) -> Self {
        Self {
            read_buf: buf,
            ..Self::simple(opcode)
        }
    }

    /// Create a read command with 3-byte address (e.g., READ)
    pub fn read_3b(opcode: u8, addr: u32, buf: &'a mut [u8]) -> Self {
        Self {
            address: Some(addr),
            address_width: AddressWidth::ThreeByte,
            read_buf: buf,
            ..Self::simple(opcode)
        }
    }

    /// Create a write command with 3-byte address (e.g., PP)
    pub fn write_3b(opcode: u8, addr: u32, data: &'a [u8]) -> Self {
        Self {
            address: Some(addr),
            address_width: AddressWidth::ThreeByte,
            write_data: data,
            ..Self::simple(opcode)
        }
    }

    /// Create an erase command with 3-byte address
    pub fn erase_3b(opcode: u8, addr: u32) -> Self {
        Self {
            address: Some(addr),
            address_width: AddressWidth::ThreeByte,
            ..Self::simple(opcode)
        }
    }

    /// Set the number of dummy cycles
    pub fn with_dummy_cycles(mut self, cycles: u8) -> Self {
        self.dummy_cycles = cycles;
        self
    }

    /// Returns true if this command has an address phase
    pub fn has_address(&self) -> bool {
        self.address.is_some()
    }

    /// Length of opcode, address and dummy bytes
    pub fn header_len(&self) -> usize {
        1 + self.address_width.bytes() + (self.dummy_cycles as usize) / 8
    }

    /// Write opcode, address and dummy bytes into `buf`
    ///
    /// `buf` must be at least [`header_len`](Self::header_len) bytes.
    pub fn encode_header(&self, buf: &mut [u8]) {
        buf[0] = self.opcode;
        let addr_len = self.address_width.bytes();
        if let Some(addr) = self.address {
            self.address_width.encode(addr, &mut buf[1..1 + addr_len]);
        }
        for b in &mut buf[1 + addr_len..self.header_len()] {
            *b = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::opcodes;

    #[test]
    fn test_header_encoding() {
        let cmd = SpiCommand::erase_3b(opcodes::SE_20, 0x12_3456);
        let mut buf = [0xAA; 4];
        assert_eq!(cmd.header_len(), 4);
        cmd.encode_header(&mut buf);
        assert_eq!(buf, [0x20, 0x12, 0x34, 0x56]);

        let mut out = [0u8; 4];
        let cmd = SpiCommand::read_3b(opcodes::FAST_READ, 0x10, &mut out).with_dummy_cycles(8);
        let mut buf = [0xAA; 5];
        assert_eq!(cmd.header_len(), 5);
        cmd.encode_header(&mut buf);
        assert_eq!(buf, [0x0B, 0x00, 0x00, 0x10, 0x00]);
    }
}
