//! Instrument network endpoint.
//!
//! An [`Endpoint`] is validated once, at construction, so the transaction path never
//! has to deal with malformed addresses.

use crate::error::{ExchangeError, ExchangeResult};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Immutable (IP address, port) pair of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    /// Create an endpoint from a textual IPv4/IPv6 address and a port.
    ///
    /// Fails with [`ExchangeError::InvalidEndpoint`] when the address is empty or does not
    /// parse, or when the port is 0.
    ///
    /// # Example
    /// ```
    /// use scpi_exchange::Endpoint;
    ///
    /// let endpoint = Endpoint::new("192.0.2.10", 5025).unwrap();
    /// assert_eq!(endpoint.port(), 5025);
    /// assert!(Endpoint::new("", 5025).is_err());
    /// ```
    pub fn new(host: &str, port: u16) -> ExchangeResult<Self> {
        let ip = validate_ip(host)?;
        validate_port(host, port)?;
        Ok(Self {
            addr: SocketAddr::new(ip, port),
        })
    }

    /// The instrument IP address.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// The instrument TCP port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Socket address used by the transport.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Parses `"192.0.2.10:5025"` or `"[2001:db8::1]:5025"`.
impl FromStr for Endpoint {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ExchangeError::invalid_endpoint(s, "address is empty"));
        }
        let addr: SocketAddr = s
            .parse()
            .map_err(|_| ExchangeError::invalid_endpoint(s, "expected <ip>:<port>"))?;
        validate_port(s, addr.port())?;
        Ok(Self { addr })
    }
}

fn validate_ip(host: &str) -> ExchangeResult<IpAddr> {
    if host.is_empty() {
        return Err(ExchangeError::invalid_endpoint(host, "address is empty"));
    }
    host.parse::<IpAddr>()
        .map_err(|_| ExchangeError::invalid_endpoint(host, "not a valid IPv4 or IPv6 address"))
}

// Port 0 is reserved; the u16 type already bounds the upper end.
fn validate_port(input: &str, port: u16) -> ExchangeResult<()> {
    if port == 0 {
        return Err(ExchangeError::invalid_endpoint(
            input,
            "port must be in 1..=65535",
        ));
    }
    Ok(())
}
