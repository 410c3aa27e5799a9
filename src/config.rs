use anyhow::{Context, Result};
use log::warn;
use serde_valid::Validate;
use std::{env, net::IpAddr, path::PathBuf, str::FromStr, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// MJPEG stream server configuration
    pub stream: StreamConfig,

    /// Station connection and scheduler configuration
    pub connectivity: ConnectivityConfig,

    /// Local setup access point configuration
    pub setup_ap: SetupApConfig,

    /// Camera backend configuration
    pub camera: CameraConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub path: String,
    pub frame_delay: Duration,
    pub workers: usize,
}

#[derive(Clone, Debug)]
pub struct ConnectivityConfig {
    pub connect_timeout: Duration,
    pub tick_interval: Duration,
}

/// Network name and passphrase of the local setup access point.
///
/// The built-in values are placeholders. Devices leaving the lab are expected
/// to override them with `SETUP_AP_SSID` and `SETUP_AP_PASSPHRASE`.
#[derive(Clone, Debug, Validate)]
pub struct SetupApConfig {
    #[validate(min_length = 1)]
    #[validate(max_length = 32)]
    pub ssid: String,
    #[validate(min_length = 8)]
    #[validate(max_length = 63)]
    pub passphrase: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryTierSetting {
    #[default]
    Auto,
    Extended,
    Internal,
}

#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub memory_tier: MemoryTierSetting,
    pub replay_dir: PathBuf,
    pub device: String,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub credentials_file: PathBuf,
    pub network_socket: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// # Panics
    /// Panics if configuration loading fails. The daemon cannot do anything
    /// useful without a valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG
            .get_or_init(|| Self::load().expect("failed to load application configuration"))
    }

    /// Load and validate the configuration from environment variables
    pub fn load() -> Result<Self> {
        Ok(Self {
            stream: StreamConfig::load()?,
            connectivity: ConnectivityConfig::load()?,
            setup_ap: SetupApConfig::load()?,
            camera: CameraConfig::load()?,
            paths: PathConfig::load(),
        })
    }
}

impl StreamConfig {
    const DEFAULT_PORT: u16 = 81;
    const MAX_FRAME_DELAY_MS: u64 = 30;

    fn load() -> Result<Self> {
        let bind_address = env_or("STREAM_BIND_ADDRESS", "0.0.0.0")
            .parse::<IpAddr>()
            .context("failed to parse STREAM_BIND_ADDRESS: invalid format")?;

        let port = parse_env("STREAM_PORT", Self::DEFAULT_PORT)?;
        let path = env_or("STREAM_PATH", "/stream");
        anyhow::ensure!(
            path.starts_with('/'),
            "failed to load STREAM_PATH: must start with '/'"
        );

        let frame_delay_ms: u64 = parse_env("STREAM_FRAME_DELAY_MS", Self::MAX_FRAME_DELAY_MS)?;
        anyhow::ensure!(
            (1..=Self::MAX_FRAME_DELAY_MS).contains(&frame_delay_ms),
            "failed to load STREAM_FRAME_DELAY_MS: must be within 1..={}",
            Self::MAX_FRAME_DELAY_MS
        );

        let workers = parse_env("STREAM_WORKERS", 1usize)?.max(1);

        Ok(Self {
            bind_address,
            port,
            path,
            frame_delay: Duration::from_millis(frame_delay_ms),
            workers,
        })
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: Self::DEFAULT_PORT,
            path: "/stream".to_string(),
            frame_delay: Duration::from_millis(Self::MAX_FRAME_DELAY_MS),
            workers: 1,
        }
    }
}

impl ConnectivityConfig {
    fn load() -> Result<Self> {
        let timeout_secs: u64 = parse_env("WIFI_CONNECT_TIMEOUT_SECS", 15)?;
        let tick_ms: u64 = parse_env("WIFI_TICK_INTERVAL_MS", 100)?;
        anyhow::ensure!(
            tick_ms > 0,
            "failed to load WIFI_TICK_INTERVAL_MS: must be greater than 0"
        );

        Ok(Self {
            connect_timeout: Duration::from_secs(timeout_secs),
            tick_interval: Duration::from_millis(tick_ms),
        })
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl SetupApConfig {
    pub const DEFAULT_SSID: &str = "NETCAM-SETUP";
    pub const DEFAULT_PASSPHRASE: &str = "netcam-setup";

    fn load() -> Result<Self> {
        let config = Self {
            ssid: env_or("SETUP_AP_SSID", Self::DEFAULT_SSID),
            passphrase: env_or("SETUP_AP_PASSPHRASE", Self::DEFAULT_PASSPHRASE),
        };

        config
            .validate()
            .context("failed to validate setup access point configuration")?;

        if config.uses_default_passphrase() {
            warn!("setup access point uses the built-in passphrase, set SETUP_AP_PASSPHRASE");
        }

        Ok(config)
    }

    pub fn uses_default_passphrase(&self) -> bool {
        self.passphrase == Self::DEFAULT_PASSPHRASE
    }
}

impl Default for SetupApConfig {
    fn default() -> Self {
        Self {
            ssid: Self::DEFAULT_SSID.to_string(),
            passphrase: Self::DEFAULT_PASSPHRASE.to_string(),
        }
    }
}

impl FromStr for MemoryTierSetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "extended" => Ok(Self::Extended),
            "internal" => Ok(Self::Internal),
            other => anyhow::bail!("unknown memory tier: {other}"),
        }
    }
}

impl CameraConfig {
    fn load() -> Result<Self> {
        let memory_tier = env_or("CAMERA_MEMORY_TIER", "auto")
            .parse()
            .context("failed to parse CAMERA_MEMORY_TIER")?;

        Ok(Self {
            memory_tier,
            replay_dir: env_or("CAMERA_REPLAY_DIR", "/data/frames").into(),
            device: env_or("CAMERA_DEVICE", "/dev/video0"),
        })
    }
}

impl PathConfig {
    fn load() -> Self {
        Self {
            credentials_file: env_or("CREDENTIALS_PATH", "/data/config/wifi.ini").into(),
            network_socket: env_or("NETWORK_SOCKET_PATH", "/socket/wifi.sock").into(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}
