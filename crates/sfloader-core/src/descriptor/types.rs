//! Device descriptor type definitions

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Algorithm version tag expected by the host tool
pub const ALGO_VERSION: u16 = 0x0101;

/// Size of the NUL-terminated device name field
pub const NAME_LEN: usize = 128;

/// Number of entries in the sector info list (sentinel included)
pub const MAX_NUM_SECTORS: usize = 512;

/// Device type hint; the host ignores it, 1 gives the widest compatibility
pub const DEVICE_TYPE: u16 = 1;

/// One uniform erase region of the flash
///
/// All sectors from `start` up to the next region's start (or the end of
/// the flash) have `size` bytes. `start` is relative to the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SectorInfo {
    /// Sector size in bytes
    pub size: u32,
    /// Offset of the first sector of this region
    pub start: u32,
}

impl SectorInfo {
    /// End-of-list marker. Always present, never a real region.
    pub const SENTINEL: Self = Self {
        size: u32::MAX,
        start: u32::MAX,
    };

    const UNUSED: Self = Self { size: 0, start: 0 };

    /// Create a new region entry
    pub const fn new(size: u32, start: u32) -> Self {
        Self { size, start }
    }

    /// Returns true if this entry terminates the region list
    pub const fn is_sentinel(&self) -> bool {
        self.size == u32::MAX && self.start == u32::MAX
    }
}

/// Flash device descriptor
///
/// The host tool reads this record directly from the loader image, so the
/// field order, the explicit padding after `erased_value` and the sentinel
/// convention of `sector_info` must never change. The layout matches the
/// C definition byte for byte:
///
/// | Offset | Field           |
/// |--------|-----------------|
/// | 0      | `algo_version`  |
/// | 2      | `name`          |
/// | 130    | `device_type`   |
/// | 132    | `base_addr`     |
/// | 136    | `total_size`    |
/// | 140    | `page_size`     |
/// | 144    | `reserved`      |
/// | 148    | `erased_value`  |
/// | 152    | `timeout_prog`  |
/// | 156    | `timeout_erase` |
/// | 160    | `sector_info`   |
///
/// Descriptors are built with `const fn` so they can live in a `static`:
///
/// ```
/// use sfloader_core::descriptor::DeviceDescriptor;
///
/// const DEV: DeviceDescriptor = DeviceDescriptor::new("Example", 0x9000_0000, 0x10_0000)
///     .with_page_size(256)
///     .with_timeouts(30, 4000)
///     .with_region(0x1000, 0);
///
/// assert_eq!(DEV.sector_size(), 0x1000);
/// assert_eq!(DEV.sector_count(), 256);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DeviceDescriptor {
    /// Algorithm version, always [`ALGO_VERSION`]
    pub algo_version: u16,
    /// Human-readable device name, NUL-terminated
    pub name: [u8; NAME_LEN],
    /// Device type hint (advisory)
    pub device_type: u16,
    /// Logical address of the first flash byte in the host's address space
    pub base_addr: u32,
    /// Total flash size in bytes
    pub total_size: u32,
    /// Chunk size the host feeds to Program
    pub page_size: u32,
    /// Must be zero
    pub reserved: u32,
    /// Value of an erased byte
    pub erased_value: u8,
    padding: [u8; 3],
    /// Timeout in ms to program one page
    pub timeout_prog: u32,
    /// Timeout in ms to erase one sector
    pub timeout_erase: u32,
    /// Region list terminated by [`SectorInfo::SENTINEL`]
    pub sector_info: [SectorInfo; MAX_NUM_SECTORS],
}

const _: () = assert!(core::mem::size_of::<DeviceDescriptor>() == 160 + 8 * MAX_NUM_SECTORS);

impl DeviceDescriptor {
    /// Create a descriptor with no regions
    ///
    /// The name is truncated to leave room for the NUL terminator. Page size
    /// defaults to 256 and the erased value to 0xFF.
    pub const fn new(name: &str, base_addr: u32, total_size: u32) -> Self {
        let mut desc = Self {
            algo_version: ALGO_VERSION,
            name: [0; NAME_LEN],
            device_type: DEVICE_TYPE,
            base_addr,
            total_size,
            page_size: 256,
            reserved: 0,
            erased_value: 0xFF,
            padding: [0; 3],
            timeout_prog: 0,
            timeout_erase: 0,
            sector_info: [SectorInfo::UNUSED; MAX_NUM_SECTORS],
        };

        let bytes = name.as_bytes();
        let mut i = 0;
        while i < bytes.len() && i < NAME_LEN - 1 {
            desc.name[i] = bytes[i];
            i += 1;
        }

        desc.sector_info[0] = SectorInfo::SENTINEL;
        desc
    }

    /// Set the page size
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the erased byte value
    pub const fn with_erased_value(mut self, value: u8) -> Self {
        self.erased_value = value;
        self
    }

    /// Set the program (per page) and erase (per sector) timeouts in ms
    pub const fn with_timeouts(mut self, prog_ms: u32, erase_ms: u32) -> Self {
        self.timeout_prog = prog_ms;
        self.timeout_erase = erase_ms;
        self
    }

    /// Append a region, moving the sentinel behind it
    ///
    /// Panics (at compile time for `const` descriptors) when the list is full.
    pub const fn with_region(mut self, size: u32, start: u32) -> Self {
        let mut i = 0;
        while !self.sector_info[i].is_sentinel() {
            i += 1;
        }
        assert!(i + 1 < MAX_NUM_SECTORS, "sector info list is full");

        self.sector_info[i] = SectorInfo::new(size, start);
        self.sector_info[i + 1] = SectorInfo::SENTINEL;
        self
    }

    /// Device name up to the NUL terminator
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("<invalid name>")
    }

    /// Real regions, in order, stopping at the sentinel
    pub fn regions(&self) -> impl Iterator<Item = &SectorInfo> + '_ {
        self.sector_info.iter().take_while(|s| !s.is_sentinel())
    }

    /// Number of real regions
    pub fn region_count(&self) -> usize {
        self.regions().count()
    }

    /// Size of the base erase unit (the first region's sector size)
    ///
    /// Returns 0 when the descriptor has no regions.
    pub fn sector_size(&self) -> u32 {
        self.regions().next().map_or(0, |r| r.size)
    }

    /// Total number of sectors across all regions
    pub fn sector_count(&self) -> u32 {
        let mut count = 0;
        for (i, region) in self.regions().enumerate() {
            if region.size != 0 {
                count += self.region_len(i, region) / region.size;
            }
        }
        count
    }

    /// Physical offset of the sector with the given index
    pub fn sector_offset(&self, index: u32) -> Option<u32> {
        let mut index = index;
        for (i, region) in self.regions().enumerate() {
            if region.size == 0 {
                return None;
            }
            let sectors = self.region_len(i, region) / region.size;
            if index < sectors {
                return Some(region.start + index * region.size);
            }
            index -= sectors;
        }
        None
    }

    /// Logical address one past the last flash byte
    pub fn end_addr(&self) -> u32 {
        self.base_addr.wrapping_add(self.total_size)
    }

    /// Raw bytes exactly as the host tool sees them
    pub fn as_raw(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }

    /// Parse a descriptor from its raw byte image
    pub fn from_raw(bytes: &[u8]) -> Option<Self> {
        Self::read_from_bytes(bytes).ok()
    }

    /// Check the geometry invariants the loader relies on
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.algo_version != ALGO_VERSION {
            return Err(DescriptorError::UnsupportedVersion(self.algo_version));
        }
        if self.total_size == 0 {
            return Err(DescriptorError::InvalidTotalSize);
        }
        if self.page_size == 0 {
            return Err(DescriptorError::InvalidPageSize);
        }
        if !self.sector_info.iter().any(SectorInfo::is_sentinel) {
            return Err(DescriptorError::MissingSentinel);
        }
        if self.region_count() == 0 {
            return Err(DescriptorError::NoRegions);
        }

        let mut prev_start = None;
        for (index, region) in self.regions().enumerate() {
            if region.size == 0 || !region.size.is_power_of_two() {
                return Err(DescriptorError::InvalidSectorSize { index });
            }
            if region.start >= self.total_size {
                return Err(DescriptorError::RegionOutOfBounds { index });
            }
            if prev_start.is_some_and(|prev| region.start <= prev) {
                return Err(DescriptorError::RegionOrder { index });
            }
            if region.start % region.size != 0 {
                return Err(DescriptorError::MisalignedRegion { index });
            }
            if self.region_len(index, region) % region.size != 0 {
                return Err(DescriptorError::SizeMismatch { index });
            }
            prev_start = Some(region.start);
        }

        Ok(())
    }

    /// Bytes covered by region `index`, up to the next region or the end
    fn region_len(&self, index: usize, region: &SectorInfo) -> u32 {
        let end = match self.sector_info.get(index + 1) {
            Some(next) if !next.is_sentinel() => next.start,
            _ => self.total_size,
        };
        end.saturating_sub(region.start)
    }
}

impl fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Regions<'a>(&'a DeviceDescriptor);

        impl fmt::Debug for Regions<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(self.0.regions()).finish()
            }
        }

        f.debug_struct("DeviceDescriptor")
            .field("algo_version", &format_args!("0x{:04X}", self.algo_version))
            .field("name", &self.name_str())
            .field("device_type", &self.device_type)
            .field("base_addr", &format_args!("0x{:08X}", self.base_addr))
            .field("total_size", &format_args!("0x{:08X}", self.total_size))
            .field("page_size", &self.page_size)
            .field("erased_value", &format_args!("0x{:02X}", self.erased_value))
            .field("timeout_prog", &self.timeout_prog)
            .field("timeout_erase", &self.timeout_erase)
            .field("regions", &Regions(self))
            .finish()
    }
}

/// Descriptor validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// Algorithm version is not [`ALGO_VERSION`]
    UnsupportedVersion(u16),
    /// Total size is zero
    InvalidTotalSize,
    /// Page size is zero
    InvalidPageSize,
    /// The sector info list has no sentinel
    MissingSentinel,
    /// The sector info list has no real region
    NoRegions,
    /// Region sector size is zero or not a power of two
    InvalidSectorSize {
        /// Region index
        index: usize,
    },
    /// Region starts at or past the end of the flash
    RegionOutOfBounds {
        /// Region index
        index: usize,
    },
    /// Region does not start after the previous one
    RegionOrder {
        /// Region index
        index: usize,
    },
    /// Region start is not aligned to its sector size
    MisalignedRegion {
        /// Region index
        index: usize,
    },
    /// Region length is not a multiple of its sector size
    SizeMismatch {
        /// Region index
        index: usize,
    },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "unsupported algorithm version 0x{:04X}", v),
            Self::InvalidTotalSize => write!(f, "total size is zero"),
            Self::InvalidPageSize => write!(f, "page size is zero"),
            Self::MissingSentinel => write!(f, "sector list has no terminating sentinel"),
            Self::NoRegions => write!(f, "sector list is empty"),
            Self::InvalidSectorSize { index } => {
                write!(f, "region {}: sector size must be a power of two", index)
            }
            Self::RegionOutOfBounds { index } => {
                write!(f, "region {}: starts beyond the end of the flash", index)
            }
            Self::RegionOrder { index } => {
                write!(f, "region {}: regions must be in ascending order", index)
            }
            Self::MisalignedRegion { index } => {
                write!(f, "region {}: start is not aligned to the sector size", index)
            }
            Self::SizeMismatch { index } => {
                write!(f, "region {}: length is not a multiple of the sector size", index)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DescriptorError {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    const DEV: DeviceDescriptor = DeviceDescriptor::new("Test NOR", 0x9000_0000, 0x0080_0000)
        .with_page_size(256)
        .with_timeouts(30, 4000)
        .with_region(0x1000, 0);

    #[test]
    fn test_field_offsets() {
        assert_eq!(offset_of!(DeviceDescriptor, algo_version), 0);
        assert_eq!(offset_of!(DeviceDescriptor, name), 2);
        assert_eq!(offset_of!(DeviceDescriptor, device_type), 130);
        assert_eq!(offset_of!(DeviceDescriptor, base_addr), 132);
        assert_eq!(offset_of!(DeviceDescriptor, total_size), 136);
        assert_eq!(offset_of!(DeviceDescriptor, page_size), 140);
        assert_eq!(offset_of!(DeviceDescriptor, reserved), 144);
        assert_eq!(offset_of!(DeviceDescriptor, erased_value), 148);
        assert_eq!(offset_of!(DeviceDescriptor, timeout_prog), 152);
        assert_eq!(offset_of!(DeviceDescriptor, timeout_erase), 156);
        assert_eq!(offset_of!(DeviceDescriptor, sector_info), 160);
    }

    #[test]
    fn test_raw_layout() {
        let raw = DEV.as_raw();
        assert_eq!(raw.len(), 160 + 8 * MAX_NUM_SECTORS);
        assert_eq!(&raw[0..2], &[0x01, 0x01]);
        assert_eq!(&raw[2..10], b"Test NOR");
        assert_eq!(raw[10], 0);
        assert_eq!(&raw[132..136], &0x9000_0000u32.to_le_bytes());
        assert_eq!(raw[148], 0xFF);
        assert_eq!(&raw[149..152], &[0, 0, 0]);
        // First region then the all-ones sentinel
        assert_eq!(&raw[160..168], &[0x00, 0x10, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&raw[168..176], &[0xFF; 8]);
    }

    #[test]
    fn test_raw_round_trip() {
        let parsed = DeviceDescriptor::from_raw(DEV.as_raw()).unwrap();
        assert_eq!(parsed, DEV);
        assert!(DeviceDescriptor::from_raw(&DEV.as_raw()[..100]).is_none());
    }

    #[test]
    fn test_sentinel_always_terminates() {
        let desc = DeviceDescriptor::new("empty", 0, 0x1000);
        assert!(desc.sector_info[0].is_sentinel());
        assert_eq!(desc.region_count(), 0);
        assert_eq!(desc.sector_size(), 0);

        let desc = desc.with_region(0x100, 0);
        assert_eq!(desc.region_count(), 1);
        assert!(desc.sector_info[1].is_sentinel());
    }

    #[test]
    fn test_name_truncated() {
        let long = [b'x'; 200];
        let desc = DeviceDescriptor::new(core::str::from_utf8(&long).unwrap(), 0, 0x1000);
        assert_eq!(desc.name_str().len(), NAME_LEN - 1);
        assert_eq!(desc.name[NAME_LEN - 1], 0);
    }

    #[test]
    fn test_sector_queries() {
        assert_eq!(DEV.sector_size(), 0x1000);
        assert_eq!(DEV.sector_count(), 2048);
        assert_eq!(DEV.sector_offset(0), Some(0));
        assert_eq!(DEV.sector_offset(3), Some(0x3000));
        assert_eq!(DEV.sector_offset(2047), Some(0x7F_F000));
        assert_eq!(DEV.sector_offset(2048), None);
        assert_eq!(DEV.end_addr(), 0x9080_0000);
    }

    #[test]
    fn test_sector_offset_multiple_regions() {
        let desc = DeviceDescriptor::new("split", 0, 0x2_0000)
            .with_region(0x1000, 0)
            .with_region(0x1_0000, 0x1_0000);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.sector_count(), 17);
        assert_eq!(desc.sector_offset(15), Some(0xF000));
        assert_eq!(desc.sector_offset(16), Some(0x1_0000));
        assert_eq!(desc.sector_offset(17), None);
    }

    #[test]
    fn test_validate() {
        assert_eq!(DEV.validate(), Ok(()));

        let no_regions = DeviceDescriptor::new("x", 0, 0x1000);
        assert_eq!(no_regions.validate(), Err(DescriptorError::NoRegions));

        let odd = DeviceDescriptor::new("x", 0, 0x1000).with_region(3000, 0);
        assert_eq!(
            odd.validate(),
            Err(DescriptorError::InvalidSectorSize { index: 0 })
        );

        let short = DeviceDescriptor::new("x", 0, 0x1800).with_region(0x1000, 0);
        assert_eq!(short.validate(), Err(DescriptorError::SizeMismatch { index: 0 }));

        let unordered = DeviceDescriptor::new("x", 0, 0x4000)
            .with_region(0x1000, 0x2000)
            .with_region(0x1000, 0x1000);
        assert_eq!(unordered.validate(), Err(DescriptorError::RegionOrder { index: 1 }));

        let mut no_sentinel = DEV;
        no_sentinel.sector_info[1] = SectorInfo::new(0x1000, 0x1000);
        // Fill the rest so no sentinel remains anywhere
        for entry in no_sentinel.sector_info.iter_mut().skip(1) {
            *entry = SectorInfo::new(0, 0);
        }
        assert_eq!(no_sentinel.validate(), Err(DescriptorError::MissingSentinel));

        let zero_page = DEV.with_page_size(0);
        assert_eq!(zero_page.validate(), Err(DescriptorError::InvalidPageSize));
    }
}
