//! Media metadata profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bytes in one megabyte (binary).
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Measured or estimated metadata of a source media file.
///
/// All quantities are non-negative; constructors clamp floating point
/// inputs at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadataProfile {
    /// File size in bytes
    pub file_size_bytes: u64,
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bitrate in kilobits/second
    pub bitrate_kbps: u32,
    /// Video codec name (lowercase, e.g. "h264", "hevc")
    pub codec: String,
}

impl MediaMetadataProfile {
    pub fn new(
        file_size_bytes: u64,
        duration_seconds: f64,
        width: u32,
        height: u32,
        bitrate_kbps: u32,
        codec: impl Into<String>,
    ) -> Self {
        Self {
            file_size_bytes,
            duration_seconds: clamp_non_negative(duration_seconds),
            width,
            height,
            bitrate_kbps,
            codec: codec.into().to_lowercase(),
        }
    }

    /// File size in megabytes.
    pub fn size_mb(&self) -> f64 {
        self.file_size_bytes as f64 / BYTES_PER_MB as f64
    }

    /// Total pixel count of one frame.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Estimate bitrate (kbps) from size and duration.
    ///
    /// Returns 0 when the duration is unknown.
    pub fn estimate_bitrate_kbps(file_size_bytes: u64, duration_seconds: f64) -> u32 {
        if duration_seconds <= 0.0 {
            return 0;
        }
        let kbps = (file_size_bytes as f64 * 8.0) / duration_seconds / 1000.0;
        kbps.min(u32::MAX as f64) as u32
    }
}

fn clamp_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
