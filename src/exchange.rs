//! Instrument-facing exchange trait.
//!
//! Per-instrument command formatters are written against [`InstrumentExchange`] rather
//! than against [`ExchangeClient`] directly, so they can be driven by an in-memory fake
//! in tests.
//!
//! # Example
//!
//! ```
//! use scpi_exchange::{ExchangeResult, InstrumentExchange};
//!
//! /// Output stage of a DC power supply.
//! struct Output<'a, E: InstrumentExchange> {
//!     exchange: &'a E,
//! }
//!
//! impl<E: InstrumentExchange> Output<'_, E> {
//!     async fn enabled(&self) -> ExchangeResult<bool> {
//!         self.exchange.send_with_request_bool("OUTP:STAT?;").await
//!     }
//!
//!     async fn set_enabled(&self, on: bool) -> ExchangeResult<()> {
//!         let state = if on { "ON" } else { "OFF" };
//!         self.exchange.send_without_request(&format!("OUTP {state};")).await
//!     }
//! }
//! ```

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use crate::numeric;
use async_trait::async_trait;

/// Identification query defined by IEEE 488.2.
pub const IDENTIFY_COMMAND: &str = "*IDN?";

/// Parsed reply to `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// First field, e.g. `Keysight Technologies`.
    pub manufacturer: String,
    /// Second field, e.g. `N5746A`.
    pub model: String,
    /// Serial number, `0` on instruments that do not report one.
    pub serial: String,
    /// Firmware revision, possibly containing commas.
    pub firmware: String,
}

impl Identity {
    /// Split a `manufacturer,model,serial,firmware` reply.
    ///
    /// Firmware strings sometimes contain commas themselves, so everything after the
    /// third comma belongs to the firmware field.
    pub fn parse(reply: &str) -> Option<Self> {
        let mut fields = reply.splitn(4, ',').map(str::trim);
        let manufacturer = fields.next()?;
        let model = fields.next()?;
        let serial = fields.next()?;
        let firmware = fields.next()?;
        if manufacturer.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            serial: serial.to_string(),
            firmware: firmware.to_string(),
        })
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (s/n {}, fw {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// Request/response exchange with one SCPI instrument.
#[async_trait]
pub trait InstrumentExchange: Send + Sync {
    /// Send a command without returning a reply.
    async fn send_without_request(&self, command: &str) -> ExchangeResult<()>;

    /// Send a command and return the trimmed reply text.
    async fn send_with_request_string(&self, command: &str) -> ExchangeResult<String>;

    /// Send a command and parse the reply as a base-10 integer.
    async fn send_with_request_int(&self, command: &str) -> ExchangeResult<i32> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "integer", numeric::parse_int)
    }

    /// Send a command and parse the reply as a float with `.` or `,` separator.
    async fn send_with_request_double(&self, command: &str) -> ExchangeResult<f64> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "floating-point number", numeric::parse_double)
    }

    /// Send a command and parse an SCPI boolean reply.
    async fn send_with_request_bool(&self, command: &str) -> ExchangeResult<bool> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "boolean", numeric::parse_bool)
    }

    /// Query `*IDN?` and split the reply.
    async fn identify(&self) -> ExchangeResult<Identity> {
        let reply = self.send_with_request_string(IDENTIFY_COMMAND).await?;
        parse_reply(IDENTIFY_COMMAND, &reply, "identification string", Identity::parse)
    }
}

#[async_trait]
impl InstrumentExchange for ExchangeClient {
    async fn send_without_request(&self, command: &str) -> ExchangeResult<()> {
        ExchangeClient::send_without_request(self, command).await
    }

    async fn send_with_request_string(&self, command: &str) -> ExchangeResult<String> {
        ExchangeClient::send_with_request_string(self, command).await
    }

    async fn send_with_request_int(&self, command: &str) -> ExchangeResult<i32> {
        ExchangeClient::send_with_request_int(self, command).await
    }

    async fn send_with_request_double(&self, command: &str) -> ExchangeResult<f64> {
        ExchangeClient::send_with_request_double(self, command).await
    }

    async fn send_with_request_bool(&self, command: &str) -> ExchangeResult<bool> {
        ExchangeClient::send_with_request_bool(self, command).await
    }
}

pub(crate) fn parse_reply<T>(
    command: &str,
    reply: &str,
    expected: &'static str,
    parser: impl FnOnce(&str) -> Option<T>,
) -> ExchangeResult<T> {
    parser(reply).ok_or_else(|| {
        tracing::debug!(command, reply, expected, "reply did not parse");
        ExchangeError::parse(command, reply, expected)
    })
}
