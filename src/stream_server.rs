//! Lifecycle of the process-wide MJPEG stream listener.

use crate::{
    api::StreamApi,
    camera::{Camera, CameraDriver},
    config::StreamConfig,
    services::connectivity::ConnectivityStatus,
};
use actix_server::ServerHandle;
use actix_web::{App, HttpServer};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};

struct RunningServer {
    handle: ServerHandle,
    addrs: Vec<SocketAddr>,
    task: JoinHandle<std::io::Result<()>>,
}

pub struct StreamServer<D>
where
    D: CameraDriver + 'static,
{
    api: StreamApi<D>,
    config: StreamConfig,
    running: Option<RunningServer>,
}

impl<D> StreamServer<D>
where
    D: CameraDriver + 'static,
{
    pub fn new(
        camera: Arc<Camera<D>>,
        status_rx: watch::Receiver<ConnectivityStatus>,
        config: StreamConfig,
    ) -> Self {
        let api = StreamApi::new(camera, status_rx, config.frame_delay);

        Self {
            api,
            config,
            running: None,
        }
    }

    /// Start the listener unless it already runs.
    ///
    /// The camera is brought up first. On any failure nothing is kept, so a
    /// later call starts over.
    pub fn register_stream(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("stream server already registered");
            return Ok(());
        }

        if self.running.take().is_some() {
            warn!("stream server exited, registering again");
        }

        self.api
            .camera()
            .ensure_ready()
            .context("failed to prepare camera for streaming")?;

        let api = self.api.clone();
        let path = self.config.path.clone();

        let server = HttpServer::new(move || {
            let api = api.clone();
            let path = path.clone();
            App::new().configure(move |cfg| api.configure(&path, cfg))
        })
        .workers(self.config.workers)
        .bind((self.config.bind_address, self.config.port))
        .context(format!(
            "failed to bind stream server to {}:{}",
            self.config.bind_address, self.config.port
        ))?
        .disable_signals();

        let addrs = server.addrs();
        let server = server.run();

        info!(
            "stream server listening on {addrs:?}, route {}",
            self.config.path
        );

        self.running = Some(RunningServer {
            handle: server.handle(),
            addrs,
            task: tokio::spawn(server),
        });

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// First bound address, if the listener runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .and_then(|running| running.addrs.first().copied())
    }

    pub fn is_streaming(&self) -> bool {
        self.api.is_streaming()
    }

    /// Stop the listener gracefully. The handle is cleared so the server may
    /// be registered again.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.handle.stop(true).await;

        match running.task.await {
            Ok(Ok(())) => info!("stream server stopped"),
            Ok(Err(e)) => error!("stream server stopped with error: {e}"),
            Err(e) => error!("stream server task panicked: {e}"),
        }
    }
}
