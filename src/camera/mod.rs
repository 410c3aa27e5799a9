//! Camera driver seam and the process-wide camera handle.
//!
//! Drivers lend frames out of a fixed buffer pool. [`Camera::capture`] wraps
//! every lent frame in a [`FrameGuard`] which hands the frame back to the
//! driver when dropped, so a frame is returned exactly once on every path.

pub mod config;
pub mod pool;
pub mod replay;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use config::{CaptureConfig, MemoryTier};

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    ops::Deref,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

/// One JPEG-encoded image lent out by a driver.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    slot: usize,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(slot: usize, data: Vec<u8>) -> Self {
        Self { slot, data }
    }

    /// Pool slot the frame was lent from.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CameraDriver: Send + Sync {
    /// Memory tier of the hardware, used to pick the capture configuration.
    fn memory_tier(&self) -> MemoryTier;

    fn init(&self, config: &CaptureConfig) -> Result<()>;

    /// Borrow the next frame, or `None` when no buffer is ready.
    fn capture_frame(&self) -> Option<Frame>;

    /// Return a frame to the pool.
    fn release_frame(&self, frame: Frame);
}

/// A lent frame, returned to its driver on drop.
pub struct FrameGuard<'a, D: CameraDriver> {
    driver: &'a D,
    frame: Option<Frame>,
}

impl<D: CameraDriver> Deref for FrameGuard<'_, D> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame.as_ref().expect("frame is present until drop")
    }
}

impl<D: CameraDriver> Drop for FrameGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.driver.release_frame(frame);
        }
    }
}

/// Owner of the camera driver; initialises the hardware lazily, once.
///
/// `ensure_ready` may block on driver I/O. `is_ready` never blocks, so async
/// callers can check it before moving the init to a blocking thread.
pub struct Camera<D: CameraDriver> {
    driver: D,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl<D: CameraDriver> Camera<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Initialise the hardware unless a previous call already succeeded.
    ///
    /// A failed init leaves the camera unready so a later call retries it.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _init = self
            .init_lock
            .lock()
            .map_err(|_| anyhow!("camera init lock poisoned"))?;

        // another caller may have finished init while we waited
        if self.is_ready() {
            return Ok(());
        }

        let tier = self.driver.memory_tier();
        let config = CaptureConfig::for_tier(tier);
        debug!("camera init with {tier:?} memory tier: {config:?}");

        self.driver
            .init(&config)
            .context("failed to initialize camera")?;

        info!(
            "camera ready: {:?}, quality {}, {} frame buffer(s)",
            config.frame_size, config.jpeg_quality, config.frame_buffers
        );
        self.ready.store(true, Ordering::Release);

        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn capture(&self) -> Option<FrameGuard<'_, D>> {
        self.driver.capture_frame().map(|frame| FrameGuard {
            driver: &self.driver,
            frame: Some(frame),
        })
    }
}
