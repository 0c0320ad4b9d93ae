//! Host tool entry points
//!
//! The host finds the loader by symbol name: a `FlashDevice` descriptor
//! record, the `SEGGER_FL_MaxBlocksizeErase` override and a fixed set of
//! `extern "C"` functions. [`flash_loader!`](crate::flash_loader) emits all
//! of them for one device; the functions in this module turn loader results
//! into the integer statuses the host expects.
//!
//! ```ignore
//! sfloader_core::flash_loader! {
//!     device: sfloader_core::descriptor::devices::W25Q64JV,
//!     staging: 4096,
//!     driver: SpiNorFlash<Octospi>,
//!     platform: Board,
//!     init: (
//!         SpiNorFlash::new(Octospi::take(), SpiNorConfig::from_descriptor(&W25Q64JV)),
//!         Board::new(),
//!     ),
//! }
//! ```

use core::cell::UnsafeCell;

use crate::driver::{FlashDriver, Platform};
use crate::erase::EraseRequest;
use crate::error::{Error, Result};
use crate::loader::{FlashLoader, PrepareParams};
use crate::scan::BlankCheck;

/// Largest erase unit the host may request in one Erase call
pub const MAX_BLOCKSIZE_ERASE: u32 = 0x1_0000;

/// CheckBlank status for a blank range
pub const BLANK: i32 = 0;

/// CheckBlank status for a range with at least one non-blank byte
pub const NOT_BLANK: i32 = 1;

/// Loader slot shared by the entry points of one image
pub type LoaderSlot<D, P, B> = Option<FlashLoader<'static, D, P, B>>;

/// Interior-mutable static for state only one caller ever touches
///
/// The host calls exactly one entry point at a time and never re-enters,
/// so handing out `&mut` from a shared static is sound as long as that
/// contract holds. There is no locking.
pub struct SingleCaller<T>(UnsafeCell<T>);

// SAFETY: access is serialized by the single-caller contract
unsafe impl<T> Sync for SingleCaller<T> {}

impl<T> SingleCaller<T> {
    /// Wrap a value
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Get exclusive access to the value
    ///
    /// # Safety
    ///
    /// No other reference obtained from this cell may be alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        // SAFETY: guaranteed by the caller
        unsafe { &mut *self.0.get() }
    }
}

/// View a host buffer as a slice
///
/// # Safety
///
/// `ptr` must be valid for reads of `len` bytes unless `len` is zero.
pub unsafe fn host_slice<'a>(ptr: *const u8, len: u32) -> &'a [u8] {
    if len == 0 || ptr.is_null() {
        return &[];
    }
    // SAFETY: guaranteed by the caller
    unsafe { core::slice::from_raw_parts(ptr, len as usize) }
}

/// View a host buffer as a mutable slice
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes unless `len` is zero.
pub unsafe fn host_slice_mut<'a>(ptr: *mut u8, len: u32) -> &'a mut [u8] {
    if len == 0 || ptr.is_null() {
        return &mut [];
    }
    // SAFETY: guaranteed by the caller
    unsafe { core::slice::from_raw_parts_mut(ptr, len as usize) }
}

fn status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

fn with_loader<D, P, B, T>(
    slot: &mut LoaderSlot<D, P, B>,
    f: impl FnOnce(&mut FlashLoader<'static, D, P, B>) -> Result<T>,
) -> Result<T> {
    match slot.as_mut() {
        Some(loader) => f(loader),
        None => {
            log::error!("Entry point called before Prepare");
            Err(Error::NotPrepared)
        }
    }
}

/// Install `loader` in the slot and prepare it
///
/// A loader still in the slot from an earlier Prepare is restored first.
/// Returns the device identification, or a negative code after which the
/// slot is empty again.
pub fn prepare<D, P, B>(
    slot: &mut LoaderSlot<D, P, B>,
    loader: FlashLoader<'static, D, P, B>,
    params: PrepareParams,
) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    restore(slot);
    let result = slot.insert(loader).prepare(params);
    match result {
        Ok(id) => id as i32,
        Err(e) => {
            *slot = None;
            e.code()
        }
    }
}

/// Quiesce and drop the loader; always 0
pub fn restore<D, P, B>(slot: &mut LoaderSlot<D, P, B>) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    if let Some(mut loader) = slot.take() {
        loader.restore();
    }
    0
}

/// Program; 0 or a negative code
pub fn program<D, P, B>(slot: &mut LoaderSlot<D, P, B>, addr: u32, data: &[u8]) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    status(with_loader(slot, |l| l.program(addr, data)))
}

/// Erase `num_sectors` sectors; 0 or a negative code
pub fn erase<D, P, B>(
    slot: &mut LoaderSlot<D, P, B>,
    sector_addr: u32,
    sector_index: u32,
    num_sectors: u32,
) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    let request = EraseRequest {
        start_addr: sector_addr,
        start_sector: sector_index,
        sector_count: num_sectors,
    };
    status(with_loader(slot, |l| l.erase(request)))
}

/// Chip erase; 0 or a negative code
pub fn erase_chip<D, P, B>(slot: &mut LoaderSlot<D, P, B>) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    status(with_loader(slot, |l| l.erase_chip()))
}

/// Read; the byte count or a negative code
pub fn read<D, P, B>(slot: &mut LoaderSlot<D, P, B>, addr: u32, buf: &mut [u8]) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    match with_loader(slot, |l| l.read(addr, buf)) {
        Ok(len) => len as i32,
        Err(e) => e.code(),
    }
}

/// Blank check; [`BLANK`], [`NOT_BLANK`] or a negative code
pub fn check_blank<D, P, B>(slot: &mut LoaderSlot<D, P, B>, addr: u32, len: u32, value: u8) -> i32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    match with_loader(slot, |l| l.check_blank(addr, len, value)) {
        Ok(BlankCheck::Blank) => BLANK,
        Ok(BlankCheck::NotBlank { .. }) => NOT_BLANK,
        Err(e) => e.code(),
    }
}

/// Verify; the address past the range on success, otherwise the address of
/// the first difference
///
/// A read failure reports the start of the chunk that failed; calling
/// before Prepare reports `addr` itself.
pub fn verify<D, P, B>(slot: &mut LoaderSlot<D, P, B>, addr: u32, expected: &[u8]) -> u32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    match slot.as_mut() {
        Some(loader) => match loader.verify(addr, expected) {
            Ok(outcome) => outcome.address(),
            Err(e) => e.addr,
        },
        None => {
            log::error!("Verify called before Prepare");
            addr
        }
    }
}

/// CRC over a flash range; `crc` comes back unchanged on failure
pub fn calc_crc<D, P, B>(
    slot: &mut LoaderSlot<D, P, B>,
    crc: u32,
    addr: u32,
    len: u32,
    polynomial: u32,
) -> u32
where
    D: FlashDriver,
    P: Platform,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    with_loader(slot, |l| l.calc_crc(crc, addr, len, polynomial)).unwrap_or(crc)
}

/// Emit the descriptor, the statics and the host entry points for one device
///
/// `init` is evaluated on every Prepare and must produce the
/// `(driver, platform)` pair. The staging buffer and the loader live in
/// [`SingleCaller`] statics; the entry points rely on the host calling them
/// one at a time.
#[macro_export]
macro_rules! flash_loader {
    (
        device: $device:expr,
        staging: $staging:expr,
        driver: $driver:ty,
        platform: $platform:ty,
        init: $init:expr $(,)?
    ) => {
        /// Device description read by the host before any call
        #[no_mangle]
        #[used]
        #[allow(non_upper_case_globals)]
        #[cfg_attr(target_os = "none", link_section = "DevDscr")]
        pub static FlashDevice: $crate::descriptor::DeviceDescriptor = $device;

        /// Largest erase unit the host may request at once
        #[no_mangle]
        #[used]
        #[allow(non_upper_case_globals)]
        pub static SEGGER_FL_MaxBlocksizeErase: u32 = $crate::abi::MAX_BLOCKSIZE_ERASE;

        static SFL_STAGING: $crate::abi::SingleCaller<[u8; $staging]> =
            $crate::abi::SingleCaller::new([0; $staging]);

        static SFL_LOADER: $crate::abi::SingleCaller<
            $crate::abi::LoaderSlot<$driver, $platform, &'static mut [u8; $staging]>,
        > = $crate::abi::SingleCaller::new(None);

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_Prepare(base_addr: u32, clock_hz: u32, function: u32) -> i32 {
            // SAFETY: the host calls one entry point at a time. The old
            // loader, which borrows the staging buffer, is restored and
            // dropped before the buffer is borrowed again.
            let slot = unsafe { SFL_LOADER.get_mut() };
            $crate::abi::restore(slot);
            let staging = unsafe { SFL_STAGING.get_mut() };

            let (driver, platform): ($driver, $platform) = $init;
            let loader = $crate::loader::FlashLoader::new(&FlashDevice, driver, platform, staging);
            $crate::abi::prepare(
                slot,
                loader,
                $crate::loader::PrepareParams::from_raw(base_addr, clock_hz, function),
            )
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_Restore(_p0: u32, _p1: u32, _p2: u32) -> i32 {
            // SAFETY: single caller
            $crate::abi::restore(unsafe { SFL_LOADER.get_mut() })
        }

        /// # Safety
        ///
        /// `src` must be valid for reads of `num_bytes` bytes.
        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub unsafe extern "C" fn SEGGER_FL_Program(
            dest_addr: u32,
            num_bytes: u32,
            src: *const u8,
        ) -> i32 {
            let data = unsafe { $crate::abi::host_slice(src, num_bytes) };
            $crate::abi::program(unsafe { SFL_LOADER.get_mut() }, dest_addr, data)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_Erase(
            sector_addr: u32,
            sector_index: u32,
            num_sectors: u32,
        ) -> i32 {
            // SAFETY: single caller
            let slot = unsafe { SFL_LOADER.get_mut() };
            $crate::abi::erase(slot, sector_addr, sector_index, num_sectors)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_EraseChip() -> i32 {
            // SAFETY: single caller
            $crate::abi::erase_chip(unsafe { SFL_LOADER.get_mut() })
        }

        /// # Safety
        ///
        /// `dest` must be valid for writes of `num_bytes` bytes.
        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub unsafe extern "C" fn SEGGER_FL_Read(addr: u32, num_bytes: u32, dest: *mut u8) -> i32 {
            let buf = unsafe { $crate::abi::host_slice_mut(dest, num_bytes) };
            $crate::abi::read(unsafe { SFL_LOADER.get_mut() }, addr, buf)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_CheckBlank(addr: u32, num_bytes: u32, blank_value: u8) -> i32 {
            // SAFETY: single caller
            let slot = unsafe { SFL_LOADER.get_mut() };
            $crate::abi::check_blank(slot, addr, num_bytes, blank_value)
        }

        /// # Safety
        ///
        /// `data` must be valid for reads of `num_bytes` bytes.
        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub unsafe extern "C" fn SEGGER_FL_Verify(addr: u32, num_bytes: u32, data: *const u8) -> u32 {
            let expected = unsafe { $crate::abi::host_slice(data, num_bytes) };
            $crate::abi::verify(unsafe { SFL_LOADER.get_mut() }, addr, expected)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        #[cfg_attr(target_os = "none", link_section = "PrgCode")]
        pub extern "C" fn SEGGER_FL_CalcCRC(
            crc: u32,
            addr: u32,
            num_bytes: u32,
            polynomial: u32,
        ) -> u32 {
            // SAFETY: single caller
            let slot = unsafe { SFL_LOADER.get_mut() };
            $crate::abi::calc_crc(slot, crc, addr, num_bytes, polynomial)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DeviceDescriptor;
    use crate::testing::{CountingPlatform, RamFlash};
    use std::cell::Cell;
    use std::rc::Rc;

    const BASE: u32 = 0x9000_0000;
    const SIZE: u32 = 0x10_0000;

    static DEV: DeviceDescriptor = DeviceDescriptor::new("Test NOR", BASE, SIZE)
        .with_page_size(256)
        .with_timeouts(30, 4000)
        .with_region(0x1000, 0);

    type Slot = LoaderSlot<RamFlash, CountingPlatform, [u8; 128]>;

    fn prepared() -> Slot {
        let mut slot = None;
        let loader = FlashLoader::new(
            &DEV,
            RamFlash::new(SIZE as usize),
            CountingPlatform::default(),
            [0; 128],
        );
        assert_eq!(prepare(&mut slot, loader, PrepareParams::from_raw(BASE, 0, 1)), 0x00EF_4017);
        slot
    }

    #[test]
    fn test_not_prepared() {
        let mut slot: Slot = None;
        let code = Error::NotPrepared.code();
        assert_eq!(program(&mut slot, BASE, &[0]), code);
        assert_eq!(erase(&mut slot, BASE, 0, 1), code);
        assert_eq!(erase_chip(&mut slot), code);
        assert_eq!(read(&mut slot, BASE, &mut [0; 4]), code);
        assert_eq!(check_blank(&mut slot, BASE, 4, 0xFF), code);
        assert_eq!(verify(&mut slot, BASE + 4, &[0; 4]), BASE + 4);
        assert_eq!(calc_crc(&mut slot, 0x1234, BASE, 4, 0xEDB8_8320), 0x1234);
        assert_eq!(restore(&mut slot), 0);
    }

    #[test]
    fn test_failed_prepare_empties_slot() {
        let mut slot = None;
        let mut flash = RamFlash::new(SIZE as usize);
        flash.id = Err(Error::ChipNotFound);
        let loader = FlashLoader::new(&DEV, flash, CountingPlatform::default(), [0u8; 128]);

        let code = prepare(&mut slot, loader, PrepareParams::from_raw(BASE, 0, 1));
        assert_eq!(code, Error::ChipNotFound.code());
        assert!(slot.is_none());
    }

    #[test]
    fn test_status_codes() {
        let mut slot = prepared();

        assert_eq!(erase(&mut slot, BASE, 0, 2), 0);
        assert_eq!(check_blank(&mut slot, BASE, 0x2000, 0xFF), BLANK);
        assert_eq!(program(&mut slot, BASE + 0x10, &[1, 2, 3]), 0);
        assert_eq!(check_blank(&mut slot, BASE, 0x2000, 0xFF), NOT_BLANK);

        let mut buf = [0u8; 3];
        assert_eq!(read(&mut slot, BASE + 0x10, &mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);

        assert_eq!(verify(&mut slot, BASE + 0x10, &[1, 2, 3]), BASE + 0x13);
        assert_eq!(verify(&mut slot, BASE + 0x10, &[1, 9, 3]), BASE + 0x11);

        assert_eq!(
            read(&mut slot, BASE + SIZE - 1, &mut buf),
            Error::AddressOutOfBounds.code()
        );
        assert_eq!(erase_chip(&mut slot), 0);
        assert_eq!(check_blank(&mut slot, BASE, SIZE, 0xFF), BLANK);

        assert_eq!(restore(&mut slot), 0);
        assert!(slot.is_none());
    }

    #[test]
    fn test_verify_read_failure_returns_chunk_address() {
        let mut slot = prepared();
        if let Some(l) = slot.as_mut() {
            l.driver_mut().fail_read_at = Some(0x190);
        }
        assert_eq!(verify(&mut slot, BASE + 0x100, &[0xFF; 0x200]), BASE + 0x180);
    }

    #[test]
    fn test_erase_past_device_end() {
        let mut slot = prepared();
        assert_eq!(
            erase(&mut slot, BASE, 0, 0x10_0000),
            Error::AddressOutOfBounds.code()
        );
        assert_eq!(erase(&mut slot, BASE + SIZE - 0x1000, 0xFF, 2), -7);
        assert_eq!(erase(&mut slot, BASE + SIZE - 0x1000, 0xFF, 1), 0);
    }

    #[test]
    fn test_prepare_again_restores_previous_loader() {
        let quiesces = Rc::new(Cell::new(0));
        let mut slot: Slot = None;
        for _ in 0..2 {
            let loader = FlashLoader::new(
                &DEV,
                RamFlash::new(SIZE as usize),
                CountingPlatform::shared(&quiesces),
                [0; 128],
            );
            assert_eq!(prepare(&mut slot, loader, PrepareParams::from_raw(BASE, 0, 1)), 0x00EF_4017);
        }
        assert_eq!(quiesces.get(), 1);

        assert_eq!(restore(&mut slot), 0);
        assert_eq!(quiesces.get(), 2);
    }

    #[test]
    fn test_host_slices() {
        let data = [1u8, 2, 3];
        assert_eq!(unsafe { host_slice(data.as_ptr(), 3) }, &[1, 2, 3]);
        assert!(unsafe { host_slice(core::ptr::null(), 8) }.is_empty());
        assert!(unsafe { host_slice_mut(core::ptr::null_mut(), 0) }.is_empty());
    }

    mod exported {
        use crate::descriptor::DeviceDescriptor;
        use crate::testing::{CountingPlatform, RamFlash};

        const DEV: DeviceDescriptor = DeviceDescriptor::new("ABI NOR", 0x9000_0000, 0x4_0000)
            .with_page_size(256)
            .with_timeouts(30, 4000)
            .with_region(0x1000, 0);

        crate::flash_loader! {
            device: DEV,
            staging: 256,
            driver: RamFlash,
            platform: CountingPlatform,
            init: (RamFlash::new(0x4_0000), CountingPlatform::default()),
        }

        // All entry point calls live in one test; they share static state
        #[test]
        fn test_entry_points() {
            assert_eq!(FlashDevice.name_str(), "ABI NOR");
            assert_eq!(SEGGER_FL_MaxBlocksizeErase, 0x1_0000);

            assert_eq!(SEGGER_FL_Erase(0x9000_0000, 0, 1), -12);
            assert_eq!(SEGGER_FL_Prepare(0x9000_0000, 0, 2), 0x00EF_4017);

            let data = [0xA5u8; 300];
            let mut out = [0u8; 300];
            unsafe {
                assert_eq!(SEGGER_FL_Program(0x9000_1000, 300, data.as_ptr()), 0);
                assert_eq!(SEGGER_FL_Read(0x9000_1000, 300, out.as_mut_ptr()), 300);
                assert_eq!(SEGGER_FL_Verify(0x9000_1000, 300, data.as_ptr()), 0x9000_112C);
            }
            assert_eq!(out, data);
            assert_eq!(SEGGER_FL_CheckBlank(0x9000_1000, 0x1000, 0xFF), 1);
            assert_eq!(SEGGER_FL_Erase(0x9000_1000, 1, 1), 0);
            assert_eq!(SEGGER_FL_CheckBlank(0x9000_1000, 0x1000, 0xFF), 0);
            assert_eq!(
                SEGGER_FL_CalcCRC(0xFFFF_FFFF, 0x9000_0000, 4, 0xEDB8_8320),
                crate::scan::crc_update(0xFFFF_FFFF, 0xEDB8_8320, &[0xFF; 4])
            );
            assert_eq!(SEGGER_FL_EraseChip(), 0);
            assert_eq!(SEGGER_FL_Restore(0, 0, 0), 0);
            assert_eq!(SEGGER_FL_EraseChip(), -12);

            // Prepare again after Restore reuses the staging buffer
            assert_eq!(SEGGER_FL_Prepare(0, 0, 3), 0x00EF_4017);
            assert_eq!(SEGGER_FL_Restore(0, 0, 0), 0);
        }
    }
}
