use anyhow::{Result, bail};
use netcam::{
    camera::{Camera, CameraDriver, CaptureConfig, Frame, MemoryTier},
    config::StreamConfig,
    connectivity::ConnectivityStatus,
    mjpeg,
    stream_server::StreamServer,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::watch;

const FRAME_SIZES: [usize; 3] = [120, 4096, 733];

/// Camera cycling through fixed-size frames, counting every driver call.
#[derive(Clone, Default)]
struct CountingCamera {
    failing_inits: Arc<AtomicUsize>,
    inits: Arc<AtomicUsize>,
    captures: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl CountingCamera {
    fn failing_first_inits(count: usize) -> Self {
        let camera = Self::default();
        camera.failing_inits.store(count, Ordering::SeqCst);
        camera
    }
}

impl CameraDriver for CountingCamera {
    fn memory_tier(&self) -> MemoryTier {
        MemoryTier::Internal
    }

    fn init(&self, _config: &CaptureConfig) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_inits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("sensor not detected");
        }
        Ok(())
    }

    fn capture_frame(&self) -> Option<Frame> {
        let index = self.captures.fetch_add(1, Ordering::SeqCst);
        let size = FRAME_SIZES[index % FRAME_SIZES.len()];
        Some(Frame::new(0, vec![(index % 251) as u8; size]))
    }

    fn release_frame(&self, _frame: Frame) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn server_for(camera: CountingCamera) -> (StreamServer<CountingCamera>, watch::Sender<ConnectivityStatus>) {
    let (status_tx, status_rx) = watch::channel(ConnectivityStatus::default());
    let config = StreamConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        path: "/stream".to_string(),
        frame_delay: Duration::from_millis(1),
        workers: 1,
    };

    (
        StreamServer::new(Arc::new(Camera::new(camera)), status_rx, config),
        status_tx,
    )
}

fn stream_url(addr: SocketAddr) -> String {
    format!("http://{addr}/stream")
}

/// Split complete multipart sections off the front of `buf`.
fn take_parts(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();

    loop {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            break;
        };
        let header = std::str::from_utf8(&buf[..header_end]).expect("header is ascii");
        assert!(header.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));

        let length: usize = header
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .expect("content length present")
            .parse()
            .expect("content length is numeric");

        let body_start = header_end + 4;
        let part_end = body_start + length + mjpeg::TERMINATOR.len();
        if buf.len() < part_end {
            break;
        }

        assert_eq!(&buf[body_start + length..part_end], mjpeg::TERMINATOR);
        parts.push(buf[body_start..body_start + length].to_vec());
        buf.drain(..part_end);
    }

    parts
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[actix_web::test]
async fn registration_is_idempotent() {
    let camera = CountingCamera::default();
    let inits = camera.inits.clone();
    let (mut server, _status_tx) = server_for(camera);

    assert!(!server.is_running());
    server.register_stream().unwrap();
    let addr = server.local_addr().expect("server should be bound");

    server.register_stream().unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    assert!(server.is_running());
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    server.stop().await;
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
}

#[actix_web::test]
async fn failed_camera_init_leaves_registration_retryable() {
    let camera = CountingCamera::failing_first_inits(1);
    let inits = camera.inits.clone();
    let (mut server, _status_tx) = server_for(camera);

    assert!(server.register_stream().is_err());
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());

    server.register_stream().unwrap();
    assert!(server.is_running());
    assert_eq!(inits.load(Ordering::SeqCst), 2);

    server.stop().await;
}

#[actix_web::test]
async fn client_receives_one_section_per_frame() {
    let camera = CountingCamera::default();
    let captures = camera.captures.clone();
    let releases = camera.releases.clone();
    let (mut server, _status_tx) = server_for(camera);
    server.register_stream().unwrap();
    let addr = server.local_addr().unwrap();

    let mut response = reqwest::get(stream_url(addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        mjpeg::CONTENT_TYPE
    );

    let mut buf = Vec::new();
    let mut parts = Vec::new();
    while parts.len() < FRAME_SIZES.len() {
        let chunk = response
            .chunk()
            .await
            .unwrap()
            .expect("stream should not end");
        buf.extend_from_slice(&chunk);
        parts.extend(take_parts(&mut buf));
    }

    for (index, (part, size)) in parts.iter().zip(FRAME_SIZES).enumerate() {
        assert_eq!(part.len(), size);
        assert!(part.iter().all(|byte| *byte == index as u8));
    }

    drop(response);

    assert!(wait_until(|| !server.is_streaming()).await);
    assert_eq!(
        captures.load(Ordering::SeqCst),
        releases.load(Ordering::SeqCst)
    );

    server.stop().await;
}

#[actix_web::test]
async fn second_client_is_turned_away_while_first_streams() {
    let (mut server, _status_tx) = server_for(CountingCamera::default());
    server.register_stream().unwrap();
    let addr = server.local_addr().unwrap();

    let mut first = reqwest::get(stream_url(addr)).await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);
    assert!(first.chunk().await.unwrap().is_some());

    let second = reqwest::get(stream_url(addr)).await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(second.text().await.unwrap(), "stream busy");

    drop(first);
    assert!(wait_until(|| !server.is_streaming()).await);

    let third = reqwest::get(stream_url(addr)).await.unwrap();
    assert_eq!(third.status(), reqwest::StatusCode::OK);
    drop(third);

    server.stop().await;
}

#[actix_web::test]
async fn status_route_reports_connectivity() {
    let (mut server, status_tx) = server_for(CountingCamera::default());
    server.register_stream().unwrap();
    let addr = server.local_addr().unwrap();

    status_tx.send_replace(ConnectivityStatus {
        state: netcam::connectivity::DeviceConnectivityState::LocalSetupMode,
        address: None,
    });

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["state"], "local_setup_mode");
    assert_eq!(body["streaming"], false);

    server.stop().await;
}
