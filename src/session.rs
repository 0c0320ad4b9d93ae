//! Loader session against the emulated chip
//!
//! A session plays the host tool's part: it loads the flash image into the
//! emulator, runs Prepare, hands the loader to a command, runs Restore and
//! writes the image back if anything changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sfloader_core::descriptor::devices::W25Q64JV;
use sfloader_core::descriptor::{self, DeviceConfigError, DeviceDescriptor};
use sfloader_core::driver::{NoPlatform, SpiNorConfig, SpiNorFlash};
use sfloader_core::loader::{FlashLoader, PrepareFunction, PrepareParams};
use sfloader_core::scan::{ScanError, DEFAULT_STAGING_SIZE};
use sfloader_dummy::{DummyConfig, DummyFlash};
use thiserror::Error;

/// Sector size the emulator's erase opcodes assume
const EMULATED_SECTOR_SIZE: u32 = 4096;

/// Loader over the emulated chip
pub type Loader<'d> = FlashLoader<'d, SpiNorFlash<DummyFlash>, NoPlatform, Vec<u8>>;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// File access failed
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Device file could not be used
    #[error(transparent)]
    Device(#[from] DeviceConfigError),

    /// The loader reported an error
    #[error("flash operation failed: {0}")]
    Flash(#[from] sfloader_core::Error),

    /// A scan could not read the flash
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The image file is larger than the device
    #[error("image is {len} bytes but the device holds {size}")]
    ImageTooLarge { len: usize, size: u32 },

    /// The requested range is not inside the device
    #[error("range 0x{addr:08X}+0x{len:X} is outside the device")]
    OutOfRange { addr: u32, len: u64 },

    /// Content differs from the expected data
    #[error("verify failed at 0x{0:08X}")]
    VerifyFailed(u32),

    /// A range that must be blank is not
    #[error("not blank at 0x{0:08X}")]
    NotBlank(u32),
}

impl SessionError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct Session {
    descriptor: DeviceDescriptor,
    image: PathBuf,
    dry_run: bool,
}

impl Session {
    /// Pick the device and the backing image
    pub fn open(device: Option<&Path>, image: &Path, dry_run: bool) -> Result<Self, SessionError> {
        let descriptor = match device {
            Some(path) => descriptor::load_device_toml(path)?,
            None => W25Q64JV,
        };
        if descriptor.sector_size() != EMULATED_SECTOR_SIZE {
            log::warn!(
                "Device uses {} byte sectors, the emulator erases {} byte sectors",
                descriptor.sector_size(),
                EMULATED_SECTOR_SIZE
            );
        }
        log::debug!(
            "Device '{}' at 0x{:08X}, image {}",
            descriptor.name_str(),
            descriptor.base_addr,
            image.display()
        );

        Ok(Self {
            descriptor,
            image: image.to_path_buf(),
            dry_run,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Resolve an optional start address and length against the device
    ///
    /// The start defaults to the device base and the length to the rest of
    /// the device.
    pub fn range(&self, addr: Option<u32>, len: Option<u32>) -> Result<(u32, u32), SessionError> {
        let base = self.descriptor.base_addr as u64;
        let end = base + self.descriptor.total_size as u64;
        let start = addr.unwrap_or(self.descriptor.base_addr);
        let len = match len {
            Some(len) => len as u64,
            None => end.saturating_sub(start as u64),
        };

        if (start as u64) < base || start as u64 + len > end {
            return Err(SessionError::OutOfRange { addr: start, len });
        }
        Ok((start, len as u32))
    }

    fn load_image(&self) -> Result<Vec<u8>, SessionError> {
        let size = self.descriptor.total_size;
        let mut data = match fs::read(&self.image) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("{} not found, starting erased", self.image.display());
                Vec::new()
            }
            Err(e) => return Err(SessionError::io(&self.image, e)),
        };

        if data.len() > size as usize {
            return Err(SessionError::ImageTooLarge {
                len: data.len(),
                size,
            });
        }
        data.resize(size as usize, self.descriptor.erased_value);
        Ok(data)
    }

    fn save(&self, before: &[u8], after: &[u8]) -> Result<(), SessionError> {
        if before == after {
            log::debug!("Flash content unchanged");
            return Ok(());
        }
        if self.dry_run {
            log::info!("Dry run, {} left untouched", self.image.display());
            return Ok(());
        }
        fs::write(&self.image, after).map_err(|e| SessionError::io(&self.image, e))?;
        log::info!("Saved {}", self.image.display());
        Ok(())
    }

    /// Run `f` between Prepare and Restore
    ///
    /// Returns the device identification together with the result of `f`.
    /// Whatever reached the flash is saved even if `f` fails, as it would
    /// be on a real chip.
    pub fn run<T>(
        &self,
        function: PrepareFunction,
        f: impl FnOnce(&mut Loader<'_>) -> Result<T, SessionError>,
    ) -> Result<(u32, T), SessionError> {
        let image = self.load_image()?;

        let config = DummyConfig {
            size: image.len(),
            page_size: self.descriptor.page_size as usize,
            erased_value: self.descriptor.erased_value,
            ..DummyConfig::default()
        };
        let flash = DummyFlash::with_data(config, &image);
        let driver = SpiNorFlash::new(flash, SpiNorConfig::from_descriptor(&self.descriptor));
        let mut loader = FlashLoader::new(
            &self.descriptor,
            driver,
            NoPlatform,
            vec![0u8; DEFAULT_STAGING_SIZE],
        );

        let id = loader.prepare(PrepareParams {
            base_addr: self.descriptor.base_addr,
            clock_hz: 0,
            function,
        })?;
        let result = f(&mut loader);
        loader.restore();

        let (driver, _) = loader.into_parts();
        self.save(&image, &driver.into_master().into_data())?;
        result.map(|value| (id, value))
    }
}
