//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/scpi_exchange.toml` (or any file passed to [`ExchangeConfig::load_from`])
//! 2. Environment variables prefixed with `SCPI_EXCHANGE_`, nested keys split on `__`
//!
//! Every section except `endpoint.host` has defaults, so the smallest valid file is:
//!
//! ```toml
//! [endpoint]
//! host = "192.0.2.10"
//! ```
//!
//! # Example
//! ```no_run
//! use scpi_exchange::config::ExchangeConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExchangeConfig::load()?;
//! let client = config.build_client()?;
//! let on = client.send_with_request_int("OUTP:STAT?;").await? == 1;
//! # Ok(())
//! # }
//! ```

use crate::client::{ExchangeClient, ExchangeOptions};
use crate::connection::ConnectionPolicy;
use crate::endpoint::Endpoint;
use crate::framing::{
    ReplyFraming, ReplyOptions, DEFAULT_BUFFER_SIZE, DEFAULT_LINE_TERMINATOR,
    DEFAULT_MAX_REPLY_LEN,
};
use crate::logging::VALID_LOG_LEVELS;
use crate::probe::{ProbeKind, DEFAULT_PROBE_TIMEOUT_MS};
use crate::transport::{TcpTransport, DEFAULT_CONNECT_TIMEOUT_MS};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scpi_exchange.toml";
/// Prefix of environment overrides, e.g. `SCPI_EXCHANGE_PROBE__KIND=tcp`.
pub const ENV_PREFIX: &str = "SCPI_EXCHANGE_";

/// Raw-socket SCPI port used by most LAN instruments.
const DEFAULT_SCPI_PORT: u16 = 5025;
const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = crate::client::DEFAULT_TRANSACTION_TIMEOUT_MS;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Figment(#[from] figment::Error),

    /// A value was loaded but is out of range.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level configuration of one exchange client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Instrument address
    pub endpoint: EndpointConfig,
    /// Socket and transaction settings
    #[serde(default)]
    pub transport: TransportConfig,
    /// Reply reading settings
    #[serde(default)]
    pub reply: ReplyConfig,
    /// Liveness probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// `[endpoint]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// IPv4 or IPv6 address literal
    pub host: String,
    /// TCP port, 5025 by default
    #[serde(default = "default_port")]
    pub port: u16,
}

/// `[transport]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Appended to every command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Deadline for one whole transaction
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,
    /// close_after_transaction or persistent
    #[serde(default)]
    pub policy: ConnectionPolicy,
}

/// `[reply]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// Size of each read in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// delimited or first_chunk
    #[serde(default)]
    pub framing: ReplyFraming,
    /// Single-byte delimiter used by `delimited` framing
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Upper bound for a delimited reply
    #[serde(default = "default_max_reply_len")]
    pub max_reply_len: usize,
}

/// `[probe]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// icmp, tcp or none
    #[serde(default)]
    pub kind: ProbeKind,
    /// Upper bound for one probe
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    DEFAULT_SCPI_PORT
}

fn default_line_terminator() -> String {
    DEFAULT_LINE_TERMINATOR.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_transaction_timeout() -> u64 {
    DEFAULT_TRANSACTION_TIMEOUT_MS
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_max_reply_len() -> usize {
    DEFAULT_MAX_REPLY_LEN
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            line_terminator: default_line_terminator(),
            connect_timeout_ms: default_connect_timeout(),
            transaction_timeout_ms: default_transaction_timeout(),
            policy: ConnectionPolicy::default(),
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            framing: ReplyFraming::default(),
            delimiter: default_delimiter(),
            max_reply_len: default_max_reply_len(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::default(),
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl ExchangeConfig {
    /// Configuration for `host:port` with every other setting at its default.
    pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            log_level: default_log_level(),
            endpoint: EndpointConfig {
                host: host.into(),
                port,
            },
            transport: TransportConfig::default(),
            reply: ReplyConfig::default(),
            probe: ProbeConfig::default(),
        }
    }

    /// Load configuration from `config/scpi_exchange.toml` and environment variables
    ///
    /// Example override: `SCPI_EXCHANGE_TRANSPORT__POLICY=persistent`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        tracing::debug!(path = %path.as_ref().display(), endpoint = %config.endpoint.host, "configuration loaded");
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.endpoint()?;

        if self.transport.line_terminator.is_empty() {
            return Err(invalid("transport.line_terminator must not be empty"));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(invalid("transport.connect_timeout_ms must be greater than 0"));
        }
        if self.transport.transaction_timeout_ms == 0 {
            return Err(invalid(
                "transport.transaction_timeout_ms must be greater than 0",
            ));
        }

        if self.reply.buffer_size == 0 {
            return Err(invalid("reply.buffer_size must be greater than 0"));
        }
        if self.reply.max_reply_len < self.reply.buffer_size {
            return Err(invalid(format!(
                "reply.max_reply_len ({}) must be at least reply.buffer_size ({})",
                self.reply.max_reply_len, self.reply.buffer_size
            )));
        }
        if self.reply.delimiter.len() != 1 {
            return Err(invalid(format!(
                "reply.delimiter must be exactly one byte, got {:?}",
                self.reply.delimiter
            )));
        }

        if self.probe.timeout_ms == 0 {
            return Err(invalid("probe.timeout_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Parsed instrument endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::new(&self.endpoint.host, self.endpoint.port)
            .map_err(|err| invalid(err.to_string()))
    }

    /// Client options described by this configuration.
    pub fn options(&self) -> ExchangeOptions {
        ExchangeOptions {
            line_terminator: self.transport.line_terminator.clone(),
            reply: ReplyOptions {
                buffer_size: self.reply.buffer_size,
                framing: self.reply.framing,
                delimiter: self.reply.delimiter.bytes().next().unwrap_or(b'\n'),
                max_reply_len: self.reply.max_reply_len,
            },
            probe_timeout: Duration::from_millis(self.probe.timeout_ms),
            transaction_timeout: Duration::from_millis(self.transport.transaction_timeout_ms),
            policy: self.transport.policy,
        }
    }

    /// Validate and build a ready client.
    pub fn build_client(&self) -> Result<ExchangeClient, ConfigError> {
        self.validate()?;
        let client = ExchangeClient::builder(self.endpoint()?)
            .with_transport(TcpTransport::new(Duration::from_millis(
                self.transport.connect_timeout_ms,
            )))
            .with_boxed_probe(self.probe.kind.build())
            .with_options(self.options())
            .build();
        Ok(client)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}
