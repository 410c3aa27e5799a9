//! V4L2 capture backend.
//!
//! The device is opened and configured for MJPEG on init. A capture thread
//! copies frames out of the mmap stream into a bounded channel sized like the
//! frame-buffer pool, so `capture_frame` never blocks.

use super::{CameraDriver, CaptureConfig, Frame, MemoryTier, pool::FramePool};
use anyhow::{Context, Result, anyhow, bail};
use log::{error, info};
use std::{
    sync::Mutex,
    thread::{self, JoinHandle},
};
use tokio::sync::mpsc;
use v4l::{
    Device, Format, FourCC, buffer::Type, io::mmap::Stream as MmapStream,
    io::traits::CaptureStream, video::Capture, video::capture::Parameters,
};

const MJPEG: &[u8; 4] = b"MJPG";
const FRAMES_PER_SECOND: u32 = 30;

struct CaptureState {
    receiver: mpsc::Receiver<Vec<u8>>,
    pool: FramePool,
    thread_handle: Option<JoinHandle<()>>,
}

pub struct V4l2Camera {
    device_path: String,
    memory_tier: MemoryTier,
    state: Mutex<Option<CaptureState>>,
}

impl V4l2Camera {
    pub fn new(device_path: impl Into<String>, memory_tier: MemoryTier) -> Self {
        Self {
            device_path: device_path.into(),
            memory_tier,
            state: Mutex::new(None),
        }
    }

    fn open_device(&self, config: &CaptureConfig) -> Result<Device> {
        let device = Device::with_path(&self.device_path)
            .context(format!("failed to open {}", self.device_path))?;

        let (width, height) = config.frame_size.dimensions();
        let format = Capture::set_format(&device, &Format::new(width, height, FourCC::new(MJPEG)))
            .context("failed to set capture format")?;

        if format.fourcc != FourCC::new(MJPEG) {
            bail!("device {} does not support MJPEG", self.device_path);
        }

        Capture::set_params(&device, &Parameters::with_fps(FRAMES_PER_SECOND))
            .context("failed to set capture parameters")?;

        info!(
            "{} streaming {}x{} MJPEG",
            self.device_path, format.width, format.height
        );

        Ok(device)
    }

    fn capture_loop(device: Device, tx: mpsc::Sender<Vec<u8>>, buffers: u32) -> Result<()> {
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffers)
            .context("failed to create mmap stream")?;

        loop {
            let (data, _metadata) =
                CaptureStream::next(&mut stream).context("failed to dequeue frame")?;

            // the mmap buffer is only valid until the next dequeue
            if tx.blocking_send(data.to_vec()).is_err() {
                return Ok(());
            }
        }
    }
}

impl CameraDriver for V4l2Camera {
    fn memory_tier(&self) -> MemoryTier {
        self.memory_tier
    }

    fn init(&self, config: &CaptureConfig) -> Result<()> {
        let device = self.open_device(config)?;
        let buffers = config.frame_buffers.max(1);
        let (tx, receiver) = mpsc::channel(buffers);

        let thread_handle = thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                if let Err(e) = Self::capture_loop(device, tx, buffers as u32) {
                    error!("capture thread stopped: {e:#}");
                }
            })
            .context("failed to spawn capture thread")?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("v4l2 camera lock poisoned"))?;

        *state = Some(CaptureState {
            receiver,
            pool: FramePool::new(buffers),
            thread_handle: Some(thread_handle),
        });

        Ok(())
    }

    fn capture_frame(&self) -> Option<Frame> {
        let mut guard = self.state.lock().ok()?;
        let state = guard.as_mut()?;

        let slot = state.pool.checkout()?;
        match state.receiver.try_recv() {
            Ok(data) => Some(Frame::new(slot, data)),
            Err(_) => {
                state.pool.checkin(slot);
                None
            }
        }
    }

    fn release_frame(&self, frame: Frame) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some(state) = guard.as_mut() {
                state.pool.checkin(frame.slot());
            }
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };

        if let Some(mut state) = state.take() {
            // closing the channel ends the capture loop after its next frame
            drop(state.receiver);
            if let Some(handle) = state.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }
}
