//! Network link association checks.
//!
//! Association and signal management live outside this crate; the uploader
//! only asks whether the link is currently up.

use crate::config::{LinkConfig, LinkKind, UploadConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Reports whether the network link is associated.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkMonitor: Send + Sync {
    async fn is_associated(&self) -> bool;
}

/// Link that is always considered up (wired hosts, tests).
pub struct AlwaysUp;

#[async_trait]
impl LinkMonitor for AlwaysUp {
    async fn is_associated(&self) -> bool {
        true
    }
}

/// Reads `/sys/class/net/<iface>/operstate`.
pub struct InterfaceLink {
    operstate: PathBuf,
}

impl InterfaceLink {
    pub fn new(interface: &str) -> Self {
        Self::with_operstate_path(PathBuf::from(format!(
            "/sys/class/net/{}/operstate",
            interface
        )))
    }

    fn with_operstate_path(operstate: PathBuf) -> Self {
        Self { operstate }
    }
}

#[async_trait]
impl LinkMonitor for InterfaceLink {
    async fn is_associated(&self) -> bool {
        match tokio::fs::read_to_string(&self.operstate).await {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!(path = %self.operstate.display(), error = %e, "Interface state unreadable");
                false
            }
        }
    }
}

/// Opens a TCP connection to the upload host.
pub struct TcpProbeLink {
    address: String,
    timeout: Duration,
}

impl TcpProbeLink {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LinkMonitor for TcpProbeLink {
    async fn is_associated(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "Link probe failed");
                false
            }
            Err(_) => {
                debug!(address = %self.address, "Link probe timed out");
                false
            }
        }
    }
}

/// host:port of the upload endpoint.
fn probe_address_from_url(url: &str) -> Result<String> {
    let url = reqwest::Url::parse(url).context("Invalid upload URL")?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Upload URL has no host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("Upload URL has no port"))?;
    Ok(format!("{}:{}", host, port))
}

/// Build the link monitor selected by configuration.
pub fn build_link(link: &LinkConfig, upload: &UploadConfig) -> Result<Box<dyn LinkMonitor>> {
    let monitor: Box<dyn LinkMonitor> = match link.kind {
        LinkKind::Always => Box::new(AlwaysUp),
        LinkKind::Interface => {
            info!(interface = %link.interface, "Monitoring interface state");
            Box::new(InterfaceLink::new(&link.interface))
        }
        LinkKind::TcpProbe => {
            let address = match &link.probe_address {
                Some(address) => address.clone(),
                None => probe_address_from_url(&upload.url)?,
            };
            info!(address = %address, "Monitoring link with TCP probe");
            Box::new(TcpProbeLink::new(address, link.probe_timeout()))
        }
    };
    Ok(monitor)
}
