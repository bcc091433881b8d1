//! Liveness probes run before a connection is opened.
//!
//! A probe answers one question: is the instrument on the network right now? A failed
//! probe aborts the transaction with `DeviceUnreachable` before any socket is opened.

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

/// Default probe timeout in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;

/// Reachability check for an instrument.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Succeeds when the device answered within `limit`.
    async fn probe(&self, endpoint: &Endpoint, limit: Duration) -> io::Result<()>;

    /// Short description for logs.
    fn describe(&self) -> &str;
}

/// Probe selection used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// [`IcmpProbe`]
    #[default]
    Icmp,
    /// [`TcpProbe`] on the endpoint's port
    Tcp,
    /// [`NoProbe`]
    None,
}

impl ProbeKind {
    /// Create the selected probe.
    pub fn build(self) -> Box<dyn LivenessProbe> {
        match self {
            ProbeKind::Icmp => Box::new(IcmpProbe),
            ProbeKind::Tcp => Box::new(TcpProbe::default()),
            ProbeKind::None => Box::new(NoProbe),
        }
    }
}

/// One ICMP echo request through the system `ping` utility.
///
/// Raw ICMP sockets need elevated privileges on most systems, whereas `ping` is
/// installed setuid or with the right capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpProbe;

impl IcmpProbe {
    fn command(endpoint: &Endpoint, limit: Duration) -> Command {
        let ip = endpoint.ip().to_string();
        let mut cmd = Command::new("ping");

        #[cfg(windows)]
        {
            let millis = limit.as_millis().max(1).to_string();
            cmd.args(["-n", "1", "-w", millis.as_str(), ip.as_str()]);
        }
        #[cfg(target_os = "macos")]
        {
            let secs = limit.as_secs().max(1).to_string();
            cmd.args(["-c", "1", "-t", secs.as_str(), ip.as_str()]);
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let secs = limit.as_secs().max(1).to_string();
            cmd.args(["-c", "1", "-W", secs.as_str(), ip.as_str()]);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LivenessProbe for IcmpProbe {
    async fn probe(&self, endpoint: &Endpoint, limit: Duration) -> io::Result<()> {
        let mut cmd = Self::command(endpoint, limit);
        let status = timeout(limit, cmd.status())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no echo reply within {limit:?}"),
                )
            })??;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("ping exited with {status}")))
        }
    }

    fn describe(&self) -> &str {
        "icmp"
    }
}

/// Opens and immediately drops a TCP connection.
///
/// Useful where ICMP is filtered. Probes the endpoint's own port unless another one
/// is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe {
    port: Option<u16>,
}

impl TcpProbe {
    /// Probe `port` instead of the endpoint's port.
    pub fn with_port(port: u16) -> Self {
        Self { port: Some(port) }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, endpoint: &Endpoint, limit: Duration) -> io::Result<()> {
        let mut addr = endpoint.socket_addr();
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no TCP answer from {addr} within {limit:?}"),
                )
            })??;
        drop(stream);
        Ok(())
    }

    fn describe(&self) -> &str {
        "tcp"
    }
}

/// Always reports the device as alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl LivenessProbe for NoProbe {
    async fn probe(&self, _endpoint: &Endpoint, _limit: Duration) -> io::Result<()> {
        Ok(())
    }

    fn describe(&self) -> &str {
        "none"
    }
}
