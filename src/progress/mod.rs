//! Progress tracking shared between running tasks and pollers

pub mod record;
pub mod store;

pub use record::{LayerProgress, LogEntry, ProgressRecord, Status, LOG_CAPACITY, LOG_RETAIN};
pub use store::ProgressStore;

/// Progress bands each phase reports within
pub mod bands {
    pub const DOWNLOAD_FLOOR: u8 = 5;
    pub const DOWNLOAD_SPAN: u64 = 60;
    pub const LOCAL_IMAGE_FIRST: u8 = 30;
    pub const LOCAL_IMAGE_SECOND: u8 = 60;
    pub const SAVING: u8 = 70;
    pub const COMPRESS_LOW: u8 = 80;
    pub const COMPRESS_HIGH: u8 = 95;
    pub const COMPLETE: u8 = 100;

    /// Scale a 0..=100 compressor reading into the compression band
    pub fn compression(percent: u8) -> u8 {
        let span = (COMPRESS_HIGH - COMPRESS_LOW) as u32;
        COMPRESS_LOW + (percent.min(100) as u32 * span / 100) as u8
    }
}
