//! Loader session
//!
//! [`FlashLoader`] ties the descriptor, the address translator, the erase
//! planner and the scanner to a driver and a platform. It is what every
//! host entry point ends up calling.
//!
//! The host calls [`prepare`](FlashLoader::prepare) once, then any number
//! of program, erase, read and check operations, then
//! [`restore`](FlashLoader::restore). Calls never overlap.

use crate::address::AddressTranslator;
use crate::descriptor::DeviceDescriptor;
use crate::driver::{FlashDriver, Platform};
use crate::erase::{EraseGeometry, ErasePlan, EraseRequest};
use crate::error::{Error, Result};
use crate::scan::{BlankCheck, ScanError, Scanner, VerifyOutcome};

/// What the host intends to do in this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareFunction {
    /// Erase
    Erase,
    /// Program
    Program,
    /// Verify
    Verify,
    /// Any other value the host passes
    Other(u32),
}

impl From<u32> for PrepareFunction {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Erase,
            2 => Self::Program,
            3 => Self::Verify,
            other => Self::Other(other),
        }
    }
}

/// Arguments the host passes to Prepare
///
/// All of them are advisory; the loader only logs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareParams {
    /// Base address the host assumes for the flash
    pub base_addr: u32,
    /// Clock frequency in Hz, 0 if unknown
    pub clock_hz: u32,
    /// Intended operation
    pub function: PrepareFunction,
}

impl PrepareParams {
    /// Build from the raw entry point arguments
    pub fn from_raw(base_addr: u32, clock_hz: u32, function: u32) -> Self {
        Self {
            base_addr,
            clock_hz,
            function: function.into(),
        }
    }
}

/// A flash loader bound to one device
pub struct FlashLoader<'d, D, P, B> {
    descriptor: &'d DeviceDescriptor,
    translator: AddressTranslator,
    driver: D,
    platform: P,
    scanner: Scanner<B>,
}

impl<'d, D, P, B> FlashLoader<'d, D, P, B>
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a loader; `staging` is the scanner's reusable buffer
    pub fn new(descriptor: &'d DeviceDescriptor, driver: D, platform: P, staging: B) -> Self {
        Self {
            descriptor,
            translator: AddressTranslator::from_descriptor(descriptor),
            driver,
            platform,
            scanner: Scanner::new(staging),
        }
    }

    /// The device descriptor
    pub fn descriptor(&self) -> &'d DeviceDescriptor {
        self.descriptor
    }

    /// The address translator
    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    /// Get a reference to the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get a mutable reference to the driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Consume the loader and return the driver and the platform
    pub fn into_parts(self) -> (D, P) {
        (self.driver, self.platform)
    }

    /// Bring the device online and identify it
    ///
    /// Returns the driver's identification unchanged.
    pub fn prepare(&mut self, params: PrepareParams) -> Result<u32> {
        log::debug!(
            "Prepare: base 0x{:08X}, clock {} Hz, function {:?}",
            params.base_addr,
            params.clock_hz,
            params.function
        );
        if params.base_addr != 0 && params.base_addr != self.descriptor.base_addr {
            log::warn!(
                "Host base 0x{:08X} differs from device base 0x{:08X}",
                params.base_addr,
                self.descriptor.base_addr
            );
        }

        if let Err(e) = self.descriptor.validate() {
            log::error!("Descriptor '{}': {}", self.descriptor.name_str(), e);
            return Err(Error::InvalidDescriptor);
        }

        self.platform.bring_up()?;
        let id = self.driver.identify()?;
        log::info!("Prepared '{}', id 0x{:08X}", self.descriptor.name_str(), id);
        Ok(id)
    }

    /// Quiesce the device; never fails
    pub fn restore(&mut self) {
        self.platform.quiesce();
        log::info!("Restored");
    }

    /// Program `data` at logical address `addr`
    ///
    /// The whole range goes to the driver in one call.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let offset = self.translator.to_physical(addr);
        log::debug!("Program 0x{:08X}+0x{:X}", offset, data.len());
        self.driver.write_buffer(offset, data)
    }

    /// Erase a sector range
    pub fn erase(&mut self, request: EraseRequest) -> Result<()> {
        let offset = self.translator.to_physical(request.start_addr);

        // The host passes both an address and a sector index; the address wins
        match self.descriptor.sector_offset(request.start_sector) {
            Some(by_index) if by_index != offset => log::warn!(
                "Sector {} is at 0x{:08X} but address 0x{:08X} maps to 0x{:08X}",
                request.start_sector,
                by_index,
                request.start_addr,
                offset
            ),
            None if request.sector_count > 0 => {
                log::warn!("Sector index {} out of range", request.start_sector)
            }
            _ => {}
        }

        let sector_size = self.descriptor.sector_size();
        let end = offset as u64 + request.sector_count as u64 * sector_size as u64;
        if end > self.descriptor.total_size as u64 {
            log::error!(
                "Erase of {} sectors at 0x{:08X} runs past the device end",
                request.sector_count,
                offset
            );
            return Err(Error::AddressOutOfBounds);
        }

        let geometry = EraseGeometry::for_driver(sector_size, &self.driver);
        let plan = ErasePlan::new(&geometry, offset, request.sector_count)?;
        log::debug!(
            "Erase 0x{:08X}: {} sectors in {} operations",
            offset,
            request.sector_count,
            plan.op_count()
        );
        plan.execute(&mut self.driver)
    }

    /// Erase the whole device
    pub fn erase_chip(&mut self) -> Result<()> {
        log::debug!("Erase chip");
        self.driver.erase_chip()
    }

    /// Read into `buf` from logical address `addr`
    ///
    /// Returns the number of bytes requested.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize> {
        let offset = self.translator.to_physical(addr);
        log::debug!("Read 0x{:08X}+0x{:X}", offset, buf.len());
        self.driver.read_buffer(offset, buf)?;
        Ok(buf.len())
    }

    /// Check whether `len` bytes at `addr` all equal `value`
    pub fn check_blank(&mut self, addr: u32, len: u32, value: u8) -> Result<BlankCheck> {
        let translator = self.translator;
        Ok(self
            .scanner
            .check_blank(&mut self.driver, &translator, addr, len, value)?)
    }

    /// Compare the flash at `addr` against `expected`
    ///
    /// A failed read reports the address of the chunk being read.
    pub fn verify(
        &mut self,
        addr: u32,
        expected: &[u8],
    ) -> core::result::Result<VerifyOutcome, ScanError> {
        let translator = self.translator;
        self.scanner
            .verify(&mut self.driver, &translator, addr, expected)
    }

    /// Reflected CRC of `len` bytes at `addr`, continuing from `crc`
    pub fn calc_crc(&mut self, crc: u32, addr: u32, len: u32, polynomial: u32) -> Result<u32> {
        let translator = self.translator;
        Ok(self
            .scanner
            .calc_crc(&mut self.driver, &translator, crc, addr, len, polynomial)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DeviceDescriptor;
    use crate::erase::EraseGranularity;
    use crate::error::EraseFailure;
    use crate::testing::{CountingPlatform, Op, RamFlash};
    use std::vec::Vec;

    const BASE: u32 = 0x9000_0000;
    const SIZE: u32 = 0x10_0000;

    static DEV: DeviceDescriptor = DeviceDescriptor::new("Test NOR", BASE, SIZE)
        .with_page_size(256)
        .with_timeouts(30, 4000)
        .with_region(0x1000, 0);

    type TestLoader = FlashLoader<'static, RamFlash, CountingPlatform, [u8; 256]>;

    fn loader() -> TestLoader {
        FlashLoader::new(
            &DEV,
            RamFlash::new(SIZE as usize),
            CountingPlatform::default(),
            [0; 256],
        )
    }

    fn params() -> PrepareParams {
        PrepareParams::from_raw(BASE, 0, 2)
    }

    fn erase(l: &mut TestLoader, sector: u32, count: u32) -> Result<()> {
        l.erase(EraseRequest {
            start_addr: BASE + sector * 0x1000,
            start_sector: sector,
            sector_count: count,
        })
    }

    #[test]
    fn test_prepare_returns_id() {
        let mut l = loader();
        assert_eq!(l.prepare(params()), Ok(0x00EF_4017));
        let (driver, platform) = l.into_parts();
        assert_eq!(platform.bring_ups, 1);
        assert_eq!(driver.ops, [Op::Identify]);
    }

    #[test]
    fn test_prepare_failures() {
        let mut l = loader();
        l.driver_mut().id = Err(Error::ChipNotFound);
        assert_eq!(l.prepare(params()), Err(Error::ChipNotFound));

        let mut l = loader();
        l.platform.fail_bring_up = true;
        assert_eq!(l.prepare(params()), Err(Error::SpiTransferFailed));
        assert!(l.driver().ops.is_empty());

        static EMPTY: DeviceDescriptor = DeviceDescriptor::new("empty", BASE, SIZE);
        let mut l = FlashLoader::new(
            &EMPTY,
            RamFlash::new(SIZE as usize),
            CountingPlatform::default(),
            [0u8; 16],
        );
        assert_eq!(l.prepare(params()), Err(Error::InvalidDescriptor));
    }

    #[test]
    fn test_restore_quiesces() {
        let mut l = loader();
        l.restore();
        l.restore();
        assert_eq!(l.into_parts().1.quiesces, 2);
    }

    #[test]
    fn test_prepare_function_codes() {
        assert_eq!(PrepareFunction::from(1), PrepareFunction::Erase);
        assert_eq!(PrepareFunction::from(3), PrepareFunction::Verify);
        assert_eq!(PrepareFunction::from(9), PrepareFunction::Other(9));
    }

    #[test]
    fn test_program_forwards_whole_range() {
        let mut l = loader();
        let data = [0x5Au8; 1000];
        l.program(BASE + 0x1F0, &data).unwrap();
        assert_eq!(l.driver().ops, [Op::Write(0x1F0, 1000)]);
        assert!(l.driver().mem[0x1F0..0x1F0 + 1000].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_program_below_base_clamps() {
        let mut l = loader();
        l.program(0x100, &[0]).unwrap();
        assert_eq!(l.driver().ops, [Op::Write(0, 1)]);
    }

    #[test]
    fn test_program_failure_surfaces() {
        let mut l = loader();
        l.driver_mut().fail_write = true;
        assert_eq!(l.program(BASE, &[0]), Err(Error::WriteError));
    }

    #[test]
    fn test_erase_decomposition() {
        let mut l = loader();
        erase(&mut l, 16, 28).unwrap();
        assert_eq!(
            l.driver().erases(),
            [
                (EraseGranularity::Block, 0x1_0000),
                (EraseGranularity::HalfBlock, 0x2_0000),
                (EraseGranularity::Sector, 0x2_8000),
                (EraseGranularity::Sector, 0x2_9000),
                (EraseGranularity::Sector, 0x2_A000),
                (EraseGranularity::Sector, 0x2_B000),
            ]
        );
    }

    #[test]
    fn test_erase_past_device_end() {
        let mut l = loader();
        assert_eq!(erase(&mut l, 0, 0x10_0000), Err(Error::AddressOutOfBounds));
        assert_eq!(erase(&mut l, 0xFF, 2), Err(Error::AddressOutOfBounds));
        assert!(l.driver().erases().is_empty());

        erase(&mut l, 0xFF, 1).unwrap();
        assert_eq!(l.driver().erases(), [(EraseGranularity::Sector, 0xF_F000)]);
    }

    #[test]
    fn test_erase_uses_address_over_index() {
        let mut l = loader();
        l.erase(EraseRequest {
            start_addr: BASE + 0x5000,
            start_sector: 2,
            sector_count: 1,
        })
        .unwrap();
        assert_eq!(l.driver().erases(), [(EraseGranularity::Sector, 0x5000)]);
    }

    #[test]
    fn test_erase_failure_aborts() {
        let mut l = loader();
        l.driver_mut().fail_erase_at = Some(0x1_0000);
        assert_eq!(
            erase(&mut l, 0, 40),
            Err(Error::EraseError(EraseFailure::CommandFailed { addr: 0x1_0000 }))
        );
        assert_eq!(l.driver().erases().len(), 2);
    }

    #[test]
    fn test_erase_sector_only_driver() {
        let mut l = loader();
        l.driver_mut().half_block_size = None;
        l.driver_mut().block_size = None;
        erase(&mut l, 0, 20).unwrap();
        let erases = l.driver().erases();
        assert_eq!(erases.len(), 20);
        assert!(erases.iter().all(|(g, _)| *g == EraseGranularity::Sector));
    }

    #[test]
    fn test_read_returns_requested_len() {
        let mut l = loader();
        l.driver_mut().mem[0x300..0x304].copy_from_slice(&[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        assert_eq!(l.read(BASE + 0x300, &mut buf), Ok(4));
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(l.driver().ops, [Op::Read(0x300, 4)]);

        l.driver_mut().fail_read_at = Some(0x300);
        assert_eq!(l.read(BASE + 0x300, &mut buf), Err(Error::ReadError));
    }

    #[test]
    fn test_blank_check_idempotence() {
        let mut l = loader();
        erase(&mut l, 0, 4).unwrap();
        assert_eq!(l.check_blank(BASE, 0x4000, DEV.erased_value), Ok(BlankCheck::Blank));

        l.program(BASE + 0x3FFF, &[0xFE]).unwrap();
        assert_eq!(
            l.check_blank(BASE, 0x4000, DEV.erased_value),
            Ok(BlankCheck::NotBlank { addr: BASE + 0x3FFF })
        );
    }

    #[test]
    fn test_verify_round_trip() {
        let mut l = loader();
        let addr = BASE + 0x2_0010;
        let data: Vec<u8> = (0..1500u32).map(|i| (i ^ (i >> 3)) as u8).collect();

        l.program(addr, &data).unwrap();
        assert_eq!(
            l.verify(addr, &data),
            Ok(VerifyOutcome::Match {
                end: addr + data.len() as u32
            })
        );

        for k in [0usize, 255, 256, 1499] {
            let mut expected = data.clone();
            expected[k] = !expected[k];
            assert_eq!(
                l.verify(addr, &expected).map(|o| o.address()),
                Ok(addr + k as u32)
            );
        }
    }

    #[test]
    fn test_verify_read_failure_reports_chunk() {
        let mut l = loader();
        l.driver_mut().fail_read_at = Some(0x1234);
        let err = l.verify(BASE + 0x1000, &[0xFF; 0x800]).unwrap_err();
        assert_eq!(err.addr, BASE + 0x1200);
        assert_eq!(err.error, Error::ReadError);
    }

    #[test]
    fn test_erase_chip_blanks_device() {
        let mut l = loader();
        l.program(BASE, &[0u8; 64]).unwrap();
        l.program(BASE + SIZE - 1, &[0]).unwrap();

        l.erase_chip().unwrap();
        assert_eq!(l.check_blank(BASE, SIZE, DEV.erased_value), Ok(BlankCheck::Blank));
    }

    #[test]
    fn test_calc_crc() {
        let mut l = loader();
        l.program(BASE, b"123456789").unwrap();
        let crc = l.calc_crc(0xFFFF_FFFF, BASE, 9, 0xEDB8_8320).unwrap();
        assert_eq!(crc ^ 0xFFFF_FFFF, 0xCBF4_3926);
    }
}
