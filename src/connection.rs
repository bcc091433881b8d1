//! Connection lifecycle and transaction phases.

use crate::transport::InstrumentStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::AsyncWriteExt;

/// Step of a single transaction, used for tracing and error reporting.
///
/// `Idle -> Probing -> Connecting -> Sending -> [Receiving] -> Closing -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// No transaction running.
    Idle,
    /// Running the liveness probe.
    Probing,
    /// Opening the connection.
    Connecting,
    /// Writing the command.
    Sending,
    /// Reading the reply.
    Receiving,
    /// Shutting the connection down.
    Closing,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransactionPhase::Idle => "idle",
            TransactionPhase::Probing => "probing",
            TransactionPhase::Connecting => "connecting",
            TransactionPhase::Sending => "sending",
            TransactionPhase::Receiving => "receiving",
            TransactionPhase::Closing => "closing",
        };
        write!(f, "{label}")
    }
}

/// Whether the socket survives the end of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Open a fresh connection for every transaction and close it afterwards.
    #[default]
    CloseAfterTransaction,
    /// Keep the connection open between transactions. Any failure drops it and the
    /// next transaction probes and reconnects.
    Persistent,
}

/// Observable state of the client's link, without the stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transaction has run yet.
    NotConnected,
    /// A connection is parked for reuse.
    Connected,
    /// The last connection was closed.
    Closed,
}

/// Owned socket slot of an exchange client.
///
/// Exactly one variant is active at a time; the stream only exists inside `Connected`.
pub(crate) enum ConnectionState {
    NotConnected,
    Connected(Box<dyn InstrumentStream>),
    Closed,
}

impl ConnectionState {
    pub(crate) fn link_state(&self) -> LinkState {
        match self {
            ConnectionState::NotConnected => LinkState::NotConnected,
            ConnectionState::Connected(_) => LinkState::Connected,
            ConnectionState::Closed => LinkState::Closed,
        }
    }

    /// Move a live stream out of the slot, leaving it `Closed`.
    ///
    /// The transaction owns the stream while it runs, so a failed or abandoned
    /// transaction drops it instead of parking a half-used socket in the slot.
    pub(crate) fn take_stream(&mut self) -> Option<Box<dyn InstrumentStream>> {
        match std::mem::replace(self, ConnectionState::Closed) {
            ConnectionState::Connected(stream) => Some(stream),
            previous => {
                *self = previous;
                None
            }
        }
    }

    /// Park a healthy stream for reuse by the next transaction.
    pub(crate) fn park(&mut self, stream: Box<dyn InstrumentStream>) {
        *self = ConnectionState::Connected(stream);
    }

    pub(crate) fn mark_closed(&mut self) {
        *self = ConnectionState::Closed;
    }
}

/// Shut down the write half and drop the stream.
///
/// Shutdown errors are only logged: the peer may already be gone, and the socket is
/// released by the drop either way.
pub(crate) async fn close_stream(mut stream: Box<dyn InstrumentStream>) {
    if let Err(err) = stream.shutdown().await {
        tracing::trace!(error = %err, "socket shutdown failed, dropping stream");
    }
    drop(stream);
}
