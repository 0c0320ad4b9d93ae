//! Compiled-in device descriptors

use super::DeviceDescriptor;

/// Winbond W25Q64JV, 64 Mbit serial NOR mapped at the OCTOSPI window
///
/// Capacity follows the datasheet (8 MiB). Uniform 4 KiB sectors; the part
/// also supports 32 KiB and 64 KiB block erase, which the SPI NOR driver
/// reports to the erase planner. Timeouts carry margin over the datasheet
/// maxima (3 ms page program, 400 ms sector erase).
pub const W25Q64JV: DeviceDescriptor =
    DeviceDescriptor::new("W25Q64JV SPI Flash", 0x9000_0000, 0x0080_0000)
        .with_page_size(256)
        .with_erased_value(0xFF)
        .with_timeouts(30, 4000)
        .with_region(0x1000, 0x0000_0000);
