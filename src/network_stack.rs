use crate::http_client::{response_body, unix_socket_client};
use anyhow::{Context, Result};
use log::info;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{fmt::Debug, net::Ipv4Addr, path::Path};
use trait_variant::make;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiMode {
    Station,
    AccessPoint,
}

/// Link status codes reported by the radio.
#[derive(Clone, Copy, Debug, Default, Deserialize_repr, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum LinkStatus {
    #[default]
    Idle = 0,
    NoNetworkAvailable = 1,
    ScanCompleted = 2,
    Connected = 3,
    ConnectFailed = 4,
    ConnectionLost = 5,
    Disconnected = 6,
}

impl LinkStatus {
    pub fn is_connected(self) -> bool {
        self == LinkStatus::Connected
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StationStatus {
    pub status: LinkStatus,
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Serialize)]
struct ModeRequest {
    mode: WifiMode,
}

#[derive(Serialize)]
struct CredentialsRequest<'a> {
    ssid: &'a str,
    passphrase: &'a str,
}

impl Debug for CredentialsRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsRequest")
            .field("ssid", &self.ssid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct DisconnectRequest {
    forget: bool,
}

/// Radio control surface used by the connectivity manager.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NetworkStack {
    async fn configure_mode(&self, mode: WifiMode) -> Result<()>;
    async fn connect(&self, ssid: &str, passphrase: &str) -> Result<()>;
    async fn start_access_point(&self, ssid: &str, passphrase: &str) -> Result<()>;
    async fn status(&self) -> Result<StationStatus>;
    async fn disconnect(&self, forget: bool) -> Result<()>;
}

/// Client of the local network service that owns the radio.
#[derive(Clone)]
pub struct WifiServiceClient {
    client: Client,
}

impl WifiServiceClient {
    const MODE_ENDPOINT: &str = "/wifi/mode/v1";
    const CONNECT_ENDPOINT: &str = "/wifi/connect/v1";
    const ACCESS_POINT_ENDPOINT: &str = "/wifi/access-point/v1";
    const STATUS_ENDPOINT: &str = "/wifi/status/v1";
    const DISCONNECT_ENDPOINT: &str = "/wifi/disconnect/v1";

    /// The radio service may come up later; calls fail until it does.
    pub fn new(socket_path: &Path) -> Result<Self> {
        let client = unix_socket_client(socket_path)?;
        Ok(Self { client })
    }

    fn build_url(&self, path: &str) -> String {
        let normalized_path = path.trim_start_matches('/');
        format!("http://localhost/{normalized_path}")
    }

    async fn get(&self, path: &str) -> Result<String> {
        let url = self.build_url(path);

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .context(format!("failed to send GET request to {url}"))?;

        response_body(res, &format!("GET {url}")).await
    }

    async fn post_json(&self, path: &str, body: impl Debug + Serialize) -> Result<String> {
        let url = self.build_url(path);
        info!("POST {url} with body: {body:?}");

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context(format!("failed to send POST request to {url}"))?;

        response_body(res, &format!("POST {url}")).await
    }
}

impl NetworkStack for WifiServiceClient {
    async fn configure_mode(&self, mode: WifiMode) -> Result<()> {
        self.post_json(Self::MODE_ENDPOINT, ModeRequest { mode })
            .await?;
        Ok(())
    }

    async fn connect(&self, ssid: &str, passphrase: &str) -> Result<()> {
        self.post_json(Self::CONNECT_ENDPOINT, CredentialsRequest { ssid, passphrase })
            .await?;
        Ok(())
    }

    async fn start_access_point(&self, ssid: &str, passphrase: &str) -> Result<()> {
        self.post_json(
            Self::ACCESS_POINT_ENDPOINT,
            CredentialsRequest { ssid, passphrase },
        )
        .await?;
        Ok(())
    }

    async fn status(&self) -> Result<StationStatus> {
        let body = self.get(Self::STATUS_ENDPOINT).await?;
        serde_json::from_str(&body).context("failed to parse station status")
    }

    async fn disconnect(&self, forget: bool) -> Result<()> {
        self.post_json(Self::DISCONNECT_ENDPOINT, DisconnectRequest { forget })
            .await?;
        Ok(())
    }
}
