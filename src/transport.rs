//! Byte transports between the client and an instrument.
//!
//! The client only needs "open a bidirectional byte stream to this endpoint". Production
//! code uses [`TcpTransport`]; tests plug in in-memory streams.

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// A connected, bidirectional byte stream.
pub trait InstrumentStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> InstrumentStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens streams to instrument endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new stream to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn InstrumentStream>>;

    /// Short description for logs.
    fn describe(&self) -> &str {
        "transport"
    }
}

/// Plain TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
    }
}

impl TcpTransport {
    /// Transport giving up on connects after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Configured connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn InstrumentStream>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(endpoint.socket_addr()))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {endpoint} timed out after {:?}", self.connect_timeout),
                )
            })??;

        // Commands are tiny; don't let Nagle hold them back.
        stream.set_nodelay(true)?;

        tracing::debug!(%endpoint, "TCP connection established");
        Ok(Box::new(stream))
    }

    fn describe(&self) -> &str {
        "tcp"
    }
}
