use crate::config::MemoryTierSetting;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;

/// Available memory at or above which the extended tier is selected.
const EXTENDED_MEMORY_THRESHOLD_KB: u64 = 256 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryTier {
    /// Large external memory pool is available.
    Extended,
    /// Only the small internal memory pool is available.
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSize {
    /// 320x240
    Qvga,
    /// 800x600
    Svga,
}

impl FrameSize {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Svga => (800, 600),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLocation {
    ExtendedMemory,
    InternalMemory,
}

/// Sensor and frame-buffer parameters handed to the driver on init.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub pixel_format: PixelFormat,
    pub xclk_freq_hz: u32,
    pub frame_size: FrameSize,
    /// Lower is better quality.
    pub jpeg_quality: u8,
    pub frame_buffers: usize,
    pub buffer_location: BufferLocation,
}

impl CaptureConfig {
    const XCLK_FREQ_HZ: u32 = 20_000_000;

    /// Degrade frame size, quality and buffering to what the memory tier can
    /// hold instead of failing on small hardware.
    pub fn for_tier(tier: MemoryTier) -> Self {
        match tier {
            MemoryTier::Extended => Self {
                pixel_format: PixelFormat::Jpeg,
                xclk_freq_hz: Self::XCLK_FREQ_HZ,
                frame_size: FrameSize::Svga,
                jpeg_quality: 10,
                frame_buffers: 2,
                buffer_location: BufferLocation::ExtendedMemory,
            },
            MemoryTier::Internal => Self {
                pixel_format: PixelFormat::Jpeg,
                xclk_freq_hz: Self::XCLK_FREQ_HZ,
                frame_size: FrameSize::Qvga,
                jpeg_quality: 12,
                frame_buffers: 1,
                buffer_location: BufferLocation::InternalMemory,
            },
        }
    }
}

/// Resolve the configured tier, probing `/proc/meminfo` for `Auto`.
pub fn resolve_memory_tier(setting: MemoryTierSetting) -> MemoryTier {
    match setting {
        MemoryTierSetting::Extended => MemoryTier::Extended,
        MemoryTierSetting::Internal => MemoryTier::Internal,
        MemoryTierSetting::Auto => match available_memory_kb(Path::new("/proc/meminfo")) {
            Ok(kb) => {
                debug!("available memory: {kb} kB");
                tier_for_available_kb(kb)
            }
            Err(e) => {
                warn!("failed to read available memory, assuming internal tier: {e:#}");
                MemoryTier::Internal
            }
        },
    }
}

fn tier_for_available_kb(kb: u64) -> MemoryTier {
    if kb >= EXTENDED_MEMORY_THRESHOLD_KB {
        MemoryTier::Extended
    } else {
        MemoryTier::Internal
    }
}

fn available_memory_kb(meminfo: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(meminfo)
        .context(format!("failed to read {meminfo:?}"))?;
    parse_mem_available(&content).context("failed to find MemAvailable")
}

fn parse_mem_available(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}
