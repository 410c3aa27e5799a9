//! Station / setup-mode connectivity state machine
//!
//! Driven by the scheduler through [`ConnectivityManager::tick`]. A stored
//! network is tried once per [`ConnectivityManager::initialize`]; when it does
//! not come up within the connect timeout the device falls back to the local
//! setup access point and stays there until provisioning restarts it.

use crate::{
    config::{ConnectivityConfig, SetupApConfig},
    credential_store::{CredentialStore, StoredCredentials},
    network_stack::{NetworkStack, WifiMode},
};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{net::Ipv4Addr, time::Duration};
use tokio::{sync::watch, time::Instant};

/// Spacing between attempts to bring up a setup access point that failed.
pub const ACCESS_POINT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConnectivityState {
    #[default]
    ConnectingToNetwork,
    Connected,
    LocalSetupMode,
}

impl std::fmt::Display for DeviceConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectingToNetwork => write!(f, "connecting to network"),
            Self::Connected => write!(f, "connected"),
            Self::LocalSetupMode => write!(f, "local setup mode"),
        }
    }
}

/// Snapshot published to readers of the connectivity state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityStatus {
    pub state: DeviceConnectivityState,
    pub address: Option<Ipv4Addr>,
}

pub struct ConnectivityManager<Store, Network>
where
    Store: CredentialStore,
    Network: NetworkStack,
{
    store: Store,
    network: Network,
    setup_ap: SetupApConfig,
    connect_timeout: Duration,
    state: DeviceConnectivityState,
    attempt_started: Option<Instant>,
    access_point_active: bool,
    access_point_retry_at: Option<Instant>,
    address: Option<Ipv4Addr>,
    status_tx: watch::Sender<ConnectivityStatus>,
}

impl<Store, Network> ConnectivityManager<Store, Network>
where
    Store: CredentialStore,
    Network: NetworkStack,
{
    pub fn new(
        store: Store,
        network: Network,
        config: &ConnectivityConfig,
        setup_ap: SetupApConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectivityStatus::default());

        Self {
            store,
            network,
            setup_ap,
            connect_timeout: config.connect_timeout,
            state: DeviceConnectivityState::default(),
            attempt_started: None,
            access_point_active: false,
            access_point_retry_at: None,
            address: None,
            status_tx,
        }
    }

    pub fn state(&self) -> DeviceConnectivityState {
        self.state
    }

    /// Receiver for status snapshots, updated on every transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status_tx.subscribe()
    }

    /// Load stored credentials and start either a station connection attempt
    /// or the local setup access point.
    pub async fn initialize(&mut self) -> Result<()> {
        let Some(credentials) = StoredCredentials::load(&self.store) else {
            info!("no stored network credentials");
            return self.enter_local_setup_mode().await;
        };

        info!("connecting to {:?}", credentials.ssid);

        if let Err(e) = self.start_station(&credentials).await {
            error!("failed to start station connection: {e:#}");
            return self.enter_local_setup_mode().await;
        }

        self.attempt_started = Some(Instant::now());
        self.access_point_active = false;
        self.address = None;
        self.set_state(DeviceConnectivityState::ConnectingToNetwork);

        Ok(())
    }

    /// Advance the state machine. Never waits on the connection itself.
    pub async fn tick(&mut self) -> Result<()> {
        match self.state {
            DeviceConnectivityState::ConnectingToNetwork => self.poll_connection().await,
            DeviceConnectivityState::LocalSetupMode if !self.access_point_active => {
                if self
                    .access_point_retry_at
                    .is_some_and(|retry_at| Instant::now() < retry_at)
                {
                    return Ok(());
                }
                debug!("retrying setup access point");
                self.start_access_point().await
            }
            _ => Ok(()),
        }
    }

    /// Live link status, independent of the cached state.
    pub async fn is_connected(&self) -> bool {
        match self.network.status().await {
            Ok(status) => status.status.is_connected(),
            Err(e) => {
                warn!("failed to query station status: {e:#}");
                false
            }
        }
    }

    /// Station address assigned on connect; empty outside `Connected`.
    pub fn current_address(&self) -> String {
        match (self.state, self.address) {
            (DeviceConnectivityState::Connected, Some(address)) => address.to_string(),
            _ => String::new(),
        }
    }

    async fn poll_connection(&mut self) -> Result<()> {
        let Some(started) = self.attempt_started else {
            return Ok(());
        };

        match self.network.status().await {
            Ok(status) if status.status.is_connected() => {
                self.attempt_started = None;
                self.address = status.address;
                self.set_state(DeviceConnectivityState::Connected);
                info!("station address: {}", self.current_address());
                return Ok(());
            }
            Ok(status) => debug!("station status: {:?}", status.status),
            Err(e) => warn!("failed to query station status: {e:#}"),
        }

        if started.elapsed() > self.connect_timeout {
            warn!(
                "no connection within {}s, entering setup mode",
                self.connect_timeout.as_secs()
            );
            self.attempt_started = None;

            if let Err(e) = self.network.disconnect(true).await {
                error!("failed to disconnect station: {e:#}");
            }

            return self.enter_local_setup_mode().await;
        }

        Ok(())
    }

    async fn start_station(&self, credentials: &StoredCredentials) -> Result<()> {
        self.network
            .configure_mode(WifiMode::Station)
            .await
            .context("failed to switch to station mode")?;

        self.network
            .connect(&credentials.ssid, &credentials.passphrase)
            .await
            .context("failed to initiate station connection")
    }

    async fn enter_local_setup_mode(&mut self) -> Result<()> {
        if self.state == DeviceConnectivityState::LocalSetupMode && self.access_point_active {
            debug!("setup access point already active");
            return Ok(());
        }

        self.attempt_started = None;
        self.address = None;
        self.set_state(DeviceConnectivityState::LocalSetupMode);
        self.start_access_point().await
    }

    async fn start_access_point(&mut self) -> Result<()> {
        if let Err(e) = self.bring_up_access_point().await {
            self.access_point_retry_at = Some(Instant::now() + ACCESS_POINT_RETRY_INTERVAL);
            return Err(e);
        }

        self.access_point_retry_at = None;
        self.access_point_active = true;
        info!("setup access point {:?} active", self.setup_ap.ssid);

        Ok(())
    }

    async fn bring_up_access_point(&self) -> Result<()> {
        self.network
            .configure_mode(WifiMode::AccessPoint)
            .await
            .context("failed to switch to access point mode")?;

        self.network
            .start_access_point(&self.setup_ap.ssid, &self.setup_ap.passphrase)
            .await
            .context("failed to start setup access point")
    }

    fn set_state(&mut self, state: DeviceConnectivityState) {
        if self.state != state {
            info!("connectivity: {} -> {}", self.state, state);
        }
        self.state = state;

        let status = ConnectivityStatus {
            state,
            address: self.address,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
