use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
#[cfg(not(feature = "v4l2"))]
use netcam::camera::replay::ReplayCamera;
#[cfg(feature = "v4l2")]
use netcam::camera::v4l2::V4l2Camera;
use netcam::{
    camera::{Camera, config::resolve_memory_tier},
    config::{AppConfig, CameraConfig},
    connectivity::ConnectivityManager,
    credential_store::{IniCredentialStore, WIFI_SCOPE},
    network_stack::WifiServiceClient,
    stream_server::StreamServer,
};
use std::{io::Write, sync::Arc, time::Duration};
use tokio::{
    signal::unix::{SignalKind, signal},
    time::{Instant, MissedTickBehavior, interval, interval_at},
};

const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(not(feature = "v4l2"))]
type DeviceCamera = ReplayCamera;
#[cfg(feature = "v4l2")]
type DeviceCamera = V4l2Camera;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::get();

    let store = match IniCredentialStore::open(&config.paths.credentials_file, WIFI_SCOPE) {
        Ok(store) => store,
        Err(e) => {
            error!("failed to open credential store, treating as unconfigured: {e:#}");
            IniCredentialStore::empty(WIFI_SCOPE)
        }
    };

    let network = WifiServiceClient::new(&config.paths.network_socket)
        .context("failed to create network service client")?;

    let mut connectivity = ConnectivityManager::new(
        store,
        network,
        &config.connectivity,
        config.setup_ap.clone(),
    );

    let camera = Arc::new(Camera::new(create_camera_driver(&config.camera)));
    let mut stream_server =
        StreamServer::new(camera, connectivity.subscribe(), config.stream.clone());

    if let Err(e) = connectivity.initialize().await {
        error!("failed to initialize connectivity: {e:#}");
    }

    if let Err(e) = stream_server.register_stream() {
        error!("failed to register stream: {e:#}");
    }

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut tick = interval(config.connectivity.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut register_retry = interval_at(
        Instant::now() + REGISTER_RETRY_INTERVAL,
        REGISTER_RETRY_INTERVAL,
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = connectivity.tick().await {
                    error!("connectivity tick failed: {e:#}");
                }
            },
            _ = register_retry.tick(), if !stream_server.is_running() => {
                if let Err(e) = stream_server.register_stream() {
                    error!("failed to register stream: {e:#}");
                }
            },
            _ = &mut ctrl_c => {
                debug!("ctrl-c received");
                break;
            },
            _ = sigterm.recv() => {
                debug!("SIGTERM received");
                break;
            },
        }
    }

    info!("shutting down");
    stream_server.stop().await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

fn create_camera_driver(config: &CameraConfig) -> DeviceCamera {
    let tier = resolve_memory_tier(config.memory_tier);
    info!("camera memory tier: {tier:?}");

    #[cfg(not(feature = "v4l2"))]
    return ReplayCamera::new(&config.replay_dir, tier);

    #[cfg(feature = "v4l2")]
    return V4l2Camera::new(&config.device, tier);
}
