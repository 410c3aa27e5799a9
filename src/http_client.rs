//! HTTP over the radio service's Unix domain socket.
//!
//! The socket is resolved per request, so the client can be built before the
//! service is up. Until then every request fails and the caller decides what
//! a failed radio call means.

use anyhow::{Context, Result, ensure};
use log::warn;
use reqwest::{Client, Response};
use std::{path::Path, time::Duration};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a client whose connections all go to `socket_path`.
pub fn unix_socket_client(socket_path: &Path) -> Result<Client> {
    if !socket_path.exists() {
        warn!("radio service socket {socket_path:?} not present yet");
    }

    Client::builder()
        .unix_socket(socket_path)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context(format!("failed to create client for {socket_path:?}"))
}

/// Body of a successful response; any other status is an error naming the
/// request and carrying the body the service sent back.
pub async fn response_body(res: Response, request: &str) -> Result<String> {
    let status = res.status();
    let body = res
        .text()
        .await
        .context(format!("failed to read response to {request}"))?;

    ensure!(
        status.is_success(),
        "{request} failed with status {status} and body: {body}"
    );

    Ok(body)
}
