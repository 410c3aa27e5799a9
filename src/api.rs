use crate::{
    camera::{Camera, CameraDriver},
    mjpeg,
    services::{
        connectivity::{ConnectivityStatus, DeviceConnectivityState},
        stream::{ChannelSink, FrameLoop},
    },
};
use actix_web::{HttpResponse, Responder, web};
use anyhow::Context;
use futures_util::stream;
use log::{debug, error, info};
use serde::Serialize;
use std::{convert::Infallible, net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::sync::{Semaphore, mpsc, watch};

/// Chunks buffered between the frame loop and the response body: one part.
const CHUNK_BUFFER: usize = 3;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: DeviceConnectivityState,
    pub address: Option<Ipv4Addr>,
    pub streaming: bool,
}

pub struct StreamApi<D>
where
    D: CameraDriver,
{
    camera: Arc<Camera<D>>,
    admission: Arc<Semaphore>,
    status_rx: watch::Receiver<ConnectivityStatus>,
    frame_delay: Duration,
}

impl<D> Clone for StreamApi<D>
where
    D: CameraDriver,
{
    fn clone(&self) -> Self {
        Self {
            camera: self.camera.clone(),
            admission: self.admission.clone(),
            status_rx: self.status_rx.clone(),
            frame_delay: self.frame_delay,
        }
    }
}

impl<D> StreamApi<D>
where
    D: CameraDriver + 'static,
{
    pub fn new(
        camera: Arc<Camera<D>>,
        status_rx: watch::Receiver<ConnectivityStatus>,
        frame_delay: Duration,
    ) -> Self {
        StreamApi {
            camera,
            // one streaming connection at a time
            admission: Arc::new(Semaphore::new(1)),
            status_rx,
            frame_delay,
        }
    }

    pub fn camera(&self) -> &Arc<Camera<D>> {
        &self.camera
    }

    pub fn is_streaming(&self) -> bool {
        self.admission.available_permits() == 0
    }

    /// Register the stream route at `path` plus `/status`.
    pub fn configure(&self, path: &str, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(self.clone()))
            .route(path, web::get().to(Self::stream))
            .route("/status", web::get().to(Self::status));
    }

    pub async fn stream(api: web::Data<Self>) -> impl Responder {
        debug!("stream() called");

        if let Err(e) = Self::prepare_camera(&api.camera).await {
            error!("stream rejected: {e:#}");
            return HttpResponse::InternalServerError().body("camera init failed");
        }

        let Ok(permit) = api.admission.clone().try_acquire_owned() else {
            info!("stream rejected: another client is streaming");
            return HttpResponse::ServiceUnavailable().body("stream busy");
        };

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let frame_loop = FrameLoop::new(api.camera.clone(), api.frame_delay);

        actix_web::rt::spawn(async move {
            let _permit = permit;
            let mut sink = ChannelSink::new(tx);
            let frames = frame_loop.run(&mut sink).await;
            info!("stream client left after {frames} frame(s)");
        });

        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });

        HttpResponse::Ok()
            .content_type(mjpeg::CONTENT_TYPE)
            .insert_header(("Cache-Control", "no-cache"))
            .streaming(body)
    }

    /// Driver init reads files or opens devices, so it runs on the blocking
    /// pool instead of the worker thread.
    async fn prepare_camera(camera: &Arc<Camera<D>>) -> anyhow::Result<()> {
        if camera.is_ready() {
            return Ok(());
        }

        let camera = camera.clone();
        web::block(move || camera.ensure_ready())
            .await
            .context("failed to run camera init")?
    }

    pub async fn status(api: web::Data<Self>) -> impl Responder {
        debug!("status() called");

        let status = api.status_rx.borrow().clone();

        HttpResponse::Ok().json(StatusResponse {
            state: status.state,
            address: status.address,
            streaming: api.is_streaming(),
        })
    }
}
