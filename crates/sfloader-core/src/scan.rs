//! Verify and blank-check scanner
//!
//! The flash is streamed through a fixed staging buffer, one chunk of at
//! most the buffer's capacity at a time, so arbitrarily large ranges can be
//! checked without a buffer of the same size. Every byte of the range is
//! read exactly once and the scan stops at the first divergence.

use core::fmt;
use core::ops::ControlFlow;

use crate::address::AddressTranslator;
use crate::driver::FlashDriver;
use crate::error::Error;

/// Default staging buffer size, sixteen 256-byte pages
pub const DEFAULT_STAGING_SIZE: usize = 4096;

/// Blank check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankCheck {
    /// Every byte equals the blank value
    Blank,
    /// At least one byte differs
    NotBlank {
        /// Logical address of the first non-blank byte
        addr: u32,
    },
}

impl BlankCheck {
    /// Returns true if the range is blank
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank)
    }
}

/// Verify result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The whole range matched
    Match {
        /// Logical address one past the verified range
        end: u32,
    },
    /// Content differs
    Mismatch {
        /// Logical address of the first differing byte
        addr: u32,
    },
}

impl VerifyOutcome {
    /// The address the host sees: the end on a match, the first difference otherwise
    pub fn address(&self) -> u32 {
        match *self {
            Self::Match { end } => end,
            Self::Mismatch { addr } => addr,
        }
    }

    /// Returns true if the whole range matched
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// A scan aborted by a failed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanError {
    /// Logical address of the chunk being read
    pub addr: u32,
    /// The driver's error
    pub error: Error,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan failed at 0x{:08X}: {}", self.addr, self.error)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScanError {}

impl From<ScanError> for Error {
    fn from(e: ScanError) -> Self {
        e.error
    }
}

/// Streams flash content through a staging buffer
///
/// The buffer is reused for every scan. Any storage that derefs to a byte
/// slice works: an owned array, a `&'static mut` to a static buffer, a
/// `Vec`.
pub struct Scanner<B> {
    buf: B,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Scanner<B> {
    /// Create a scanner over a staging buffer
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Staging buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len()
    }

    /// Check that `len` bytes at logical `addr` all equal `value`
    pub fn check_blank<D: FlashDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        translator: &AddressTranslator,
        addr: u32,
        len: u32,
        value: u8,
    ) -> Result<BlankCheck, ScanError> {
        let start = translator.to_physical(addr);
        log::debug!("Blank check 0x{:08X}+0x{:X} for 0x{:02X}", start, len, value);

        let found = self.stream(driver, translator, start, len, |done, chunk| {
            match chunk.iter().position(|&b| b != value) {
                Some(i) => ControlFlow::Break(done + i as u32),
                None => ControlFlow::Continue(()),
            }
        })?;

        Ok(match found {
            Some(pos) => BlankCheck::NotBlank {
                addr: translator.to_logical(start.wrapping_add(pos)),
            },
            None => BlankCheck::Blank,
        })
    }

    /// Compare the flash at logical `addr` against `expected`
    pub fn verify<D: FlashDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        translator: &AddressTranslator,
        addr: u32,
        expected: &[u8],
    ) -> Result<VerifyOutcome, ScanError> {
        let start = translator.to_physical(addr);
        let len = expected.len() as u32;
        log::debug!("Verify 0x{:08X}+0x{:X}", start, len);

        let found = self.stream(driver, translator, start, len, |done, chunk| {
            let want = &expected[done as usize..done as usize + chunk.len()];
            match chunk.iter().zip(want).position(|(a, b)| a != b) {
                Some(i) => ControlFlow::Break(done + i as u32),
                None => ControlFlow::Continue(()),
            }
        })?;

        Ok(match found {
            Some(pos) => {
                let addr = translator.to_logical(start.wrapping_add(pos));
                log::debug!("Verify mismatch at 0x{:08X}", addr);
                VerifyOutcome::Mismatch { addr }
            }
            None => VerifyOutcome::Match {
                end: translator.to_logical(start.wrapping_add(len)),
            },
        })
    }

    /// Reflected CRC over `len` bytes at logical `addr`
    ///
    /// `crc` is the running value (the caller applies any initial or final
    /// XOR), `polynomial` is in reflected form (0xEDB88320 for CRC-32).
    pub fn calc_crc<D: FlashDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        translator: &AddressTranslator,
        crc: u32,
        addr: u32,
        len: u32,
        polynomial: u32,
    ) -> Result<u32, ScanError> {
        let start = translator.to_physical(addr);
        let mut crc = crc;
        self.stream(driver, translator, start, len, |_, chunk| {
            crc = crc_update(crc, polynomial, chunk);
            ControlFlow::<()>::Continue(())
        })?;
        Ok(crc)
    }

    /// Read `len` bytes from physical `start` chunk by chunk
    ///
    /// `f` gets the offset of each chunk within the range and its content,
    /// and may stop the scan early with a value.
    fn stream<D, T, F>(
        &mut self,
        driver: &mut D,
        translator: &AddressTranslator,
        start: u32,
        len: u32,
        mut f: F,
    ) -> Result<Option<T>, ScanError>
    where
        D: FlashDriver + ?Sized,
        F: FnMut(u32, &[u8]) -> ControlFlow<T>,
    {
        let buf = self.buf.as_mut();
        if buf.is_empty() {
            return Err(ScanError {
                addr: translator.to_logical(start),
                error: Error::BufferTooSmall,
            });
        }

        let mut done = 0u32;
        while done < len {
            let chunk_len = (len - done).min(buf.len() as u32) as usize;
            let chunk = &mut buf[..chunk_len];
            let offset = start.wrapping_add(done);

            log::trace!("Scan chunk 0x{:08X}+0x{:X}", offset, chunk_len);
            if let Err(error) = driver.read_buffer(offset, chunk) {
                let addr = translator.to_logical(offset);
                log::error!("Read at 0x{:08X} failed: {}", addr, error);
                return Err(ScanError { addr, error });
            }

            if let ControlFlow::Break(value) = f(done, chunk) {
                return Ok(Some(value));
            }
            done += chunk_len as u32;
        }

        Ok(None)
    }
}

/// Update a reflected CRC with `data`, bit by bit
pub fn crc_update(crc: u32, polynomial: u32, data: &[u8]) -> u32 {
    let mut crc = crc;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ polynomial
            } else {
                crc >> 1
            };
        }
    }
    crc
}
