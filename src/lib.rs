//! # SCPI Exchange
//!
//! Serialized SCPI request/response exchange with LAN instruments such as power
//! supplies and signal generators.
//!
//! The crate is centred on [`ExchangeClient`], which owns the socket to one
//! instrument. Every call is one transaction: probe, connect, send, optionally receive,
//! then close. Concurrent callers queue on the client's lock, so their bytes never
//! interleave on the wire.
//!
//! ## Crate Structure
//!
//! - **`client`**: `ExchangeClient` and its builder.
//! - **`exchange`**: the `InstrumentExchange` trait that instrument command formatters
//!   are written against, plus `*IDN?` parsing.
//! - **`endpoint`**: validated (IP address, port) pairs.
//! - **`probe`**: liveness probes (ICMP via the system `ping`, TCP, none).
//! - **`transport`**: stream factories; `TcpTransport` in production.
//! - **`framing`**: command termination, query detection and reply reading.
//! - **`numeric`**: locale-independent reply parsing and value formatting.
//! - **`connection`**: connection policy, link state and transaction phases.
//! - **`config`**: Figment-based configuration (`config/scpi_exchange.toml` + env).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the `ExchangeError` enum.
//!
//! ## Example
//! ```no_run
//! use scpi_exchange::ExchangeClient;
//!
//! # tokio_test::block_on(async {
//! let client = ExchangeClient::new("192.0.2.10", 5025)?;
//! client.send_without_request("VOLT 5.0;").await?;
//! let volts = client.send_with_request_double("VOLT?;").await?;
//! assert_eq!(volts, 5.0);
//! # Ok::<(), scpi_exchange::ExchangeError>(())
//! # });
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod framing;
pub mod logging;
pub mod numeric;
pub mod probe;
pub mod transport;

pub use client::{ExchangeClient, ExchangeClientBuilder, ExchangeOptions};
pub use config::{ConfigError, ExchangeConfig};
pub use connection::{ConnectionPolicy, LinkState, TransactionPhase};
pub use endpoint::Endpoint;
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::{Identity, InstrumentExchange};
pub use framing::{ReplyFraming, ReplyOptions};
pub use probe::{IcmpProbe, LivenessProbe, NoProbe, ProbeKind, TcpProbe};
pub use transport::{InstrumentStream, TcpTransport, Transport};
