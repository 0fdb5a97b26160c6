//! VPN relay rotation.
//!
//! A fresh relay is picked at the start of each browser run and dropped at the end.
//! [`MullvadVpn`] drives the `mullvad` CLI; [`NoVpn`] does nothing.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// US WireGuard relays to rotate through.
pub const US_RELAYS: &[&str] = &[
    "us-qas-wg-001",
    "us-qas-wg-002",
    "us-qas-wg-003",
    "us-qas-wg-004",
    "us-qas-wg-101",
    "us-qas-wg-102",
    "us-qas-wg-103",
    "us-qas-wg-201",
    "us-qas-wg-202",
    "us-qas-wg-203",
    "us-qas-wg-204",
    "us-atl-wg-001",
    "us-atl-wg-002",
    "us-atl-wg-301",
];

/// Errors from the VPN controller.
#[derive(Debug, Error)]
pub enum VpnError {
    #[error("mullvad CLI not found in PATH")]
    NotInstalled,

    #[error("`mullvad {command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("VPN did not report a connection within {0:?}")]
    NotConnected(Duration),
}

/// VPN configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Rotate to a fresh relay before each browser run.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds to wait for the tunnel to come up.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl VpnConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `MULLVAD_ENABLED`: "true" or "false"
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MULLVAD_ENABLED") {
            self.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }
        self
    }

    /// Build the controller this config asks for.
    pub fn controller(&self) -> Result<Box<dyn VpnController>, VpnError> {
        if self.enabled {
            Ok(Box::new(MullvadVpn::new(Duration::from_secs(
                self.connect_timeout,
            ))?))
        } else {
            Ok(Box::new(NoVpn))
        }
    }
}

/// Controls the tunnel around a run.
#[async_trait]
pub trait VpnController: Send {
    /// Connect through a relay not used earlier in this process.
    async fn connect_fresh(&mut self) -> Result<(), VpnError>;

    async fn disconnect(&mut self) -> Result<(), VpnError>;

    /// Human-readable status line.
    async fn status(&mut self) -> Result<String, VpnError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// No tunnel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVpn;

#[async_trait]
impl VpnController for NoVpn {
    async fn connect_fresh(&mut self) -> Result<(), VpnError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), VpnError> {
        Ok(())
    }

    async fn status(&mut self) -> Result<String, VpnError> {
        Ok("VPN disabled".to_string())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Mullvad CLI driver.
#[derive(Debug)]
pub struct MullvadVpn {
    binary: PathBuf,
    connect_timeout: Duration,
    used: HashSet<&'static str>,
    current: Option<&'static str>,
}

impl MullvadVpn {
    pub fn new(connect_timeout: Duration) -> Result<Self, VpnError> {
        let binary = Self::find_binary().ok_or(VpnError::NotInstalled)?;
        debug!("Using mullvad at {}", binary.display());
        Ok(Self {
            binary,
            connect_timeout,
            used: HashSet::new(),
            current: None,
        })
    }

    /// Find the mullvad binary in PATH.
    pub fn find_binary() -> Option<PathBuf> {
        which::which("mullvad").ok()
    }

    pub fn current_relay(&self) -> Option<&'static str> {
        self.current
    }

    async fn run(&self, args: &[&str]) -> Result<String, VpnError> {
        let command = args.join(" ");
        let output = tokio::time::timeout(
            Duration::from_secs(15),
            Command::new(&self.binary).args(args).output(),
        )
        .await
        .map_err(|_| VpnError::Command {
            command: command.clone(),
            message: "timed out".to_string(),
        })?
        .map_err(|e| VpnError::Command {
            command: command.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(VpnError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn wait_connected(&self) -> Result<String, VpnError> {
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            let status = self.run(&["status"]).await?;
            if is_connected(&status) {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(VpnError::NotConnected(self.connect_timeout));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[async_trait]
impl VpnController for MullvadVpn {
    async fn connect_fresh(&mut self) -> Result<(), VpnError> {
        let relay = pick_relay(&mut self.used);
        info!("Connecting to Mullvad relay {}", relay);

        if let Err(e) = self.run(&["disconnect"]).await {
            debug!("Disconnect before rotation failed: {}", e);
        }
        self.run(&["relay", "set", "hostname", relay]).await?;
        self.run(&["connect"]).await?;

        let status = self.wait_connected().await?;
        info!("VPN status: {}", status);
        self.current = Some(relay);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), VpnError> {
        info!("Disconnecting VPN");
        self.current = None;
        self.run(&["disconnect"]).await.map(|_| ())
    }

    async fn status(&mut self) -> Result<String, VpnError> {
        self.run(&["status"]).await
    }
}

fn is_connected(status: &str) -> bool {
    status.lines().any(|l| l.trim_start().starts_with("Connected"))
}

/// Pick a random relay not in `used`, starting over once all have been tried.
fn pick_relay(used: &mut HashSet<&'static str>) -> &'static str {
    let mut available: Vec<&'static str> = US_RELAYS
        .iter()
        .copied()
        .filter(|r| !used.contains(r))
        .collect();
    if available.is_empty() {
        warn!("All relays used, starting over");
        used.clear();
        available = US_RELAYS.to_vec();
    }
    let relay = available
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(US_RELAYS[0]);
    used.insert(relay);
    relay
}
