//! CLI command implementations
//!
//! Every command opens one loader session; the progress helpers here are
//! shared by the commands that stream through the flash.

pub mod erase;
pub mod info;
pub mod program;
pub mod read;
pub mod scan;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Chunk size commands use when they walk a range
pub(crate) const CHUNK_SIZE: usize = 4096;

/// Byte progress bar labelled with `phase`
pub(crate) fn byte_bar(total: u64, phase: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Spinner for operations without intermediate progress
pub(crate) fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Human readable size
pub(crate) fn format_size(size: u32) -> String {
    if size >= 1024 * 1024 && size % (1024 * 1024) == 0 {
        format!("{} MiB", size / (1024 * 1024))
    } else if size >= 1024 && size % 1024 == 0 {
        format!("{} KiB", size / 1024)
    } else {
        format!("{} bytes", size)
    }
}
