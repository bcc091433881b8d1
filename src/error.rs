//! Error types for the exchange client.
//!
//! `ExchangeError` is the single error type surfaced by every transaction. Each variant
//! maps to one failure class so callers can branch on the kind of problem without
//! string matching:
//!
//! - **`InvalidEndpoint`**: the host or port was rejected at construction time.
//! - **`DeviceUnreachable`**: the liveness probe failed; no socket was opened and no byte sent.
//! - **`Communication`**: connect, write or read failed after the probe succeeded.
//! - **`Timeout`**: the transaction deadline expired. The phase that was running is recorded.
//! - **`Parse`**: a reply arrived but is not a valid value of the requested type.
//!
//! The first three connectivity classes point the operator at cabling and network setup,
//! while `Parse` points at instrument firmware or a wrong command.

use crate::connection::TransactionPhase;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results produced by the exchange client.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Failure of one exchange, classified by cause.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Host or port rejected at construction.
    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint {
        /// Text that was rejected.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Liveness probe failed; no socket was opened.
    #[error("Device {address} not responding to liveness probe (command '{command}'): {detail}")]
    DeviceUnreachable {
        /// Command that was not sent.
        command: String,
        /// Probed address.
        address: String,
        /// Probe failure description.
        detail: String,
    },

    /// Connect, write or read failed.
    #[error("Communication failure while {phase} (command '{command}'): {source}")]
    Communication {
        /// Command being exchanged.
        command: String,
        /// Step that failed.
        phase: TransactionPhase,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Transaction deadline expired.
    #[error("Timed out after {elapsed:?} while {phase} (command '{command}')")]
    Timeout {
        /// Command being exchanged.
        command: String,
        /// Step that was running.
        phase: TransactionPhase,
        /// Time since the transaction started.
        elapsed: Duration,
    },

    /// Reply is not a valid value of the requested type.
    #[error("Failed to parse reply '{reply}' as {expected} (command '{command}')")]
    Parse {
        /// Command that was queried.
        command: String,
        /// Trimmed reply text.
        reply: String,
        /// Name of the expected type.
        expected: &'static str,
    },
}

impl ExchangeError {
    pub(crate) fn invalid_endpoint(input: impl Into<String>, reason: &'static str) -> Self {
        ExchangeError::InvalidEndpoint {
            input: input.into(),
            reason,
        }
    }

    pub(crate) fn communication(
        command: &str,
        phase: TransactionPhase,
        source: std::io::Error,
    ) -> Self {
        ExchangeError::Communication {
            command: command.to_string(),
            phase,
            source,
        }
    }

    pub(crate) fn parse(command: &str, reply: &str, expected: &'static str) -> Self {
        ExchangeError::Parse {
            command: command.to_string(),
            reply: reply.to_string(),
            expected,
        }
    }

    /// True for failures caused by the network path or the device being offline.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ExchangeError::DeviceUnreachable { .. }
                | ExchangeError::Communication { .. }
                | ExchangeError::Timeout { .. }
        )
    }

    /// True when the device answered but the answer was not usable.
    pub fn is_data(&self) -> bool {
        matches!(self, ExchangeError::Parse { .. })
    }

    /// The command that was being exchanged, if the error came from a transaction.
    pub fn command(&self) -> Option<&str> {
        match self {
            ExchangeError::InvalidEndpoint { .. } => None,
            ExchangeError::DeviceUnreachable { command, .. }
            | ExchangeError::Communication { command, .. }
            | ExchangeError::Timeout { command, .. }
            | ExchangeError::Parse { command, .. } => Some(command),
        }
    }
}
