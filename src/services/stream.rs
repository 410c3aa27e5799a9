//! Per-connection MJPEG frame loop
//!
//! The loop runs until the client goes away: a failed chunk send ends it,
//! a failed capture does not. Captured frames are held in a
//! [`FrameGuard`](crate::camera::FrameGuard) and therefore go back to the
//! driver's pool on every path, including a send failure mid-frame.

use crate::{
    camera::{Camera, CameraDriver, Frame},
    mjpeg,
};
use actix_web::web::Bytes;
use anyhow::{Result, anyhow};
use log::debug;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use trait_variant::make;

/// Ordered, awaitable chunk writer of one streaming response.
#[make(Send)]
pub trait ChunkSink {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// True once the client is gone and no chunk can be delivered anymore.
    fn is_closed(&self) -> bool;
}

/// Feeds a streaming response body through a bounded channel.
///
/// A slow client fills the channel and suspends the loop; a disconnected
/// client drops the receiver and fails the next send.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for ChannelSink {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| anyhow!("stream client disconnected"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct FrameLoop<D: CameraDriver> {
    camera: Arc<Camera<D>>,
    frame_delay: Duration,
}

impl<D: CameraDriver> FrameLoop<D> {
    pub fn new(camera: Arc<Camera<D>>, frame_delay: Duration) -> Self {
        Self {
            camera,
            frame_delay,
        }
    }

    /// Stream frames into `sink` until a send fails or the client is gone.
    /// Returns the number of complete parts written.
    pub async fn run<S: ChunkSink>(&self, sink: &mut S) -> u64 {
        let mut frames = 0u64;

        loop {
            let Some(frame) = self.camera.capture() else {
                if sink.is_closed() {
                    debug!("stream client left while no frames were available");
                    return frames;
                }
                debug!("frame capture failed, retrying");
                sleep(self.frame_delay).await;
                continue;
            };

            let sent = Self::send_part(sink, &frame).await;
            drop(frame);

            if let Err(e) = sent {
                debug!("stream ended after {frames} frame(s): {e:#}");
                return frames;
            }

            frames += 1;
            sleep(self.frame_delay).await;
        }
    }

    async fn send_part<S: ChunkSink>(sink: &mut S, frame: &Frame) -> Result<()> {
        sink.send_chunk(mjpeg::part_header(frame.len())).await?;
        sink.send_chunk(Bytes::copy_from_slice(frame.data())).await?;
        sink.send_chunk(mjpeg::terminator()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MockCameraDriver;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    const DELAY: Duration = Duration::from_millis(30);

    /// Records chunks and fails once `fail_at` chunks were accepted.
    struct RecordingSink {
        chunks: Vec<Bytes>,
        fail_at: usize,
    }

    impl RecordingSink {
        fn failing_at(fail_at: usize) -> Self {
            Self {
                chunks: Vec::new(),
                fail_at,
            }
        }
    }

    impl ChunkSink for RecordingSink {
        async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
            if self.chunks.len() == self.fail_at {
                return Err(anyhow!("connection reset"));
            }
            self.chunks.push(chunk);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn camera_with_frames(
        sizes: &'static [usize],
        released: Arc<Mutex<Vec<usize>>>,
    ) -> Arc<Camera<MockCameraDriver>> {
        let mut driver = MockCameraDriver::new();
        let next = AtomicUsize::new(0);
        driver.expect_capture_frame().returning(move || {
            let index = next.fetch_add(1, Ordering::SeqCst);
            let size = sizes[index % sizes.len()];
            Some(Frame::new(index, vec![0xab; size]))
        });
        driver
            .expect_release_frame()
            .returning(move |frame| released.lock().unwrap().push(frame.slot()));

        Arc::new(Camera::new(driver))
    }

    mod framing {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn emits_one_section_per_frame_in_capture_order() {
            let released = Arc::new(Mutex::new(Vec::new()));
            let camera = camera_with_frames(&[3, 5, 7], released.clone());
            let mut sink = RecordingSink::failing_at(9);

            let frames = FrameLoop::new(camera, DELAY).run(&mut sink).await;

            assert_eq!(frames, 3);
            assert_eq!(sink.chunks.len(), 9);
            for (part, size) in sink.chunks.chunks(3).zip([3usize, 5, 7]) {
                assert_eq!(part[0], mjpeg::part_header(size));
                assert_eq!(part[1].len(), size);
                assert_eq!(part[2].as_ref(), mjpeg::TERMINATOR);
            }
        }

        #[tokio::test(start_paused = true)]
        async fn yields_between_frames() {
            let released = Arc::new(Mutex::new(Vec::new()));
            let camera = camera_with_frames(&[1], released);
            let mut sink = RecordingSink::failing_at(6);

            let started = tokio::time::Instant::now();
            FrameLoop::new(camera, DELAY).run(&mut sink).await;

            assert!(started.elapsed() >= DELAY * 2);
        }
    }

    mod release {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn every_captured_frame_is_released_once() {
            let released = Arc::new(Mutex::new(Vec::new()));
            let camera = camera_with_frames(&[4, 4], released.clone());
            let mut sink = RecordingSink::failing_at(6);

            FrameLoop::new(camera, DELAY).run(&mut sink).await;

            // two frames sent, the third fails on its header
            assert_eq!(*released.lock().unwrap(), vec![0, 1, 2]);
        }

        #[tokio::test(start_paused = true)]
        async fn frame_is_released_when_payload_send_fails() {
            let released = Arc::new(Mutex::new(Vec::new()));
            let camera = camera_with_frames(&[16], released.clone());
            let mut sink = RecordingSink::failing_at(1);

            let frames = FrameLoop::new(camera, DELAY).run(&mut sink).await;

            assert_eq!(frames, 0);
            assert_eq!(*released.lock().unwrap(), vec![0]);
        }
    }

    mod capture_failure {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn missed_capture_is_skipped_not_fatal() {
            let mut driver = MockCameraDriver::new();
            let calls = AtomicUsize::new(0);
            driver.expect_capture_frame().returning(move || {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => None,
                    n => Some(Frame::new(n, vec![0xff, 0xd8, 0xff, 0xd9])),
                }
            });
            driver.expect_release_frame().times(2).return_const(());

            let camera = Arc::new(Camera::new(driver));
            let mut sink = RecordingSink::failing_at(3);

            let started = tokio::time::Instant::now();
            let frames = FrameLoop::new(camera, DELAY).run(&mut sink).await;

            assert_eq!(frames, 1);
            assert_eq!(sink.chunks[0], mjpeg::part_header(4));
            // no busy spin on misses
            assert!(started.elapsed() >= DELAY * 3);
        }
    }

    mod channel_sink {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn client_leaving_during_capture_misses_ends_loop() {
            let mut driver = MockCameraDriver::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counted = calls.clone();
            driver.expect_capture_frame().returning(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                None
            });
            driver.expect_release_frame().never();

            let (tx, rx) = mpsc::channel(3);
            let mut sink = ChannelSink::new(tx);
            let frame_loop = FrameLoop::new(Arc::new(Camera::new(driver)), DELAY);

            let task = tokio::spawn(async move { frame_loop.run(&mut sink).await });

            tokio::time::sleep(DELAY * 5).await;
            assert!(!task.is_finished());

            drop(rx);
            let frames = tokio::time::timeout(DELAY * 3, task)
                .await
                .expect("loop should end once the client is gone")
                .unwrap();

            assert_eq!(frames, 0);
            assert!(calls.load(Ordering::SeqCst) >= 5);
        }

        #[tokio::test]
        async fn send_fails_once_receiver_is_gone() {
            let (tx, mut rx) = mpsc::channel(1);
            let mut sink = ChannelSink::new(tx);

            sink.send_chunk(Bytes::from_static(b"a")).await.unwrap();
            assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));

            drop(rx);
            assert!(sink.send_chunk(Bytes::from_static(b"b")).await.is_err());
        }
    }
}
