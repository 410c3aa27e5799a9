//! Camera backend replaying JPEG files from a directory.
//!
//! Used on boards without a supported sensor and in tests. Frames are lent
//! out through a [`FramePool`] sized like the real driver's buffer pool, so
//! pool exhaustion behaves the same way.

use super::{CameraDriver, CaptureConfig, Frame, MemoryTier, pool::FramePool};
use anyhow::{Context, Result, anyhow, ensure};
use log::info;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

struct ReplayState {
    images: Vec<Vec<u8>>,
    next: usize,
    pool: FramePool,
}

pub struct ReplayCamera {
    dir: PathBuf,
    memory_tier: MemoryTier,
    state: Mutex<Option<ReplayState>>,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>, memory_tier: MemoryTier) -> Self {
        Self {
            dir: dir.into(),
            memory_tier,
            state: Mutex::new(None),
        }
    }

    fn load_images(dir: &Path) -> Result<Vec<Vec<u8>>> {
        let mut paths = fs::read_dir(dir)
            .context(format!("failed to read frame directory {dir:?}"))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| is_jpeg(path))
            .collect::<Vec<_>>();
        paths.sort();

        ensure!(!paths.is_empty(), "failed to find jpeg files in {dir:?}");

        paths
            .iter()
            .map(|path| fs::read(path).context(format!("failed to read frame {path:?}")))
            .collect()
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl CameraDriver for ReplayCamera {
    fn memory_tier(&self) -> MemoryTier {
        self.memory_tier
    }

    fn init(&self, config: &CaptureConfig) -> Result<()> {
        let images = Self::load_images(&self.dir)?;
        info!(
            "replaying {} frame(s) from {:?} with {} buffer(s)",
            images.len(),
            self.dir,
            config.frame_buffers
        );

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("replay camera lock poisoned"))?;

        *state = Some(ReplayState {
            images,
            next: 0,
            pool: FramePool::new(config.frame_buffers),
        });

        Ok(())
    }

    fn capture_frame(&self) -> Option<Frame> {
        let mut guard = self.state.lock().ok()?;
        let state = guard.as_mut()?;

        let slot = state.pool.checkout()?;
        let data = state.images[state.next].clone();
        state.next = (state.next + 1) % state.images.len();

        Some(Frame::new(slot, data))
    }

    fn release_frame(&self, frame: Frame) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some(state) = guard.as_mut() {
                state.pool.checkin(frame.slot());
            }
        }
    }
}
