//! SCPI exchange client for one LAN instrument.
//!
//! `ExchangeClient` owns the socket to a single instrument and runs every command as
//! a serialized transaction:
//!
//! 1. take the client lock (callers queue here),
//! 2. if no connection is open, run the liveness probe and connect,
//! 3. write the command and its line terminator,
//! 4. if the command contains `?`, read one reply,
//! 5. close the connection (or park it under [`ConnectionPolicy::Persistent`]) and
//!    release the lock.
//!
//! Every step runs against the transaction deadline. Whatever happens, the stream is
//! closed or dropped before the lock is released, so no caller ever inherits a
//! half-used socket.

use crate::connection::{close_stream, ConnectionPolicy, ConnectionState, LinkState, TransactionPhase};
use crate::endpoint::Endpoint;
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::parse_reply;
use crate::framing::{
    encode_command, is_query, read_reply, ReplyOptions, DEFAULT_BUFFER_SIZE,
    DEFAULT_LINE_TERMINATOR,
};
use crate::numeric;
use crate::probe::{IcmpProbe, LivenessProbe, DEFAULT_PROBE_TIMEOUT_MS};
use crate::transport::{InstrumentStream, TcpTransport, Transport};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

/// Default deadline for one complete transaction in milliseconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 10_000;

/// Tunables of an exchange client.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Appended to every command.
    pub line_terminator: String,
    /// How replies are read.
    pub reply: ReplyOptions,
    /// Upper bound for the liveness probe.
    pub probe_timeout: Duration,
    /// Deadline for probe + connect + send + receive.
    pub transaction_timeout: Duration,
    /// Connection reuse policy.
    pub policy: ConnectionPolicy,
}

impl ExchangeOptions {
    /// Replace values no transaction could work with by their defaults.
    fn sanitized(mut self) -> Self {
        if self.line_terminator.is_empty() {
            tracing::warn!("empty line terminator, using {:?}", DEFAULT_LINE_TERMINATOR);
            self.line_terminator = DEFAULT_LINE_TERMINATOR.to_string();
        }
        if self.reply.buffer_size == 0 {
            tracing::warn!("zero reply buffer size, using {DEFAULT_BUFFER_SIZE}");
            self.reply.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.reply.max_reply_len < self.reply.buffer_size {
            tracing::warn!(
                max_reply_len = self.reply.max_reply_len,
                buffer_size = self.reply.buffer_size,
                "max reply length below buffer size, raising it"
            );
            self.reply.max_reply_len = self.reply.buffer_size;
        }
        self
    }
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
            reply: ReplyOptions::default(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            transaction_timeout: Duration::from_millis(DEFAULT_TRANSACTION_TIMEOUT_MS),
            policy: ConnectionPolicy::default(),
        }
    }
}

/// Builder for [`ExchangeClient`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use scpi_exchange::{Endpoint, ExchangeClient, TcpProbe};
///
/// # tokio_test::block_on(async {
/// let endpoint = Endpoint::new("192.0.2.10", 5025)?;
/// let client = ExchangeClient::builder(endpoint)
///     .with_probe(TcpProbe::default())
///     .with_transaction_timeout(Duration::from_secs(2))
///     .build();
///
/// let volts = client.send_with_request_double("VOLT?;").await?;
/// println!("output set to {volts} V");
/// # Ok::<(), scpi_exchange::ExchangeError>(())
/// # });
/// ```
pub struct ExchangeClientBuilder {
    endpoint: Endpoint,
    transport: Option<Arc<dyn Transport>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    options: ExchangeOptions,
}

impl ExchangeClientBuilder {
    /// Builder with TCP transport, ICMP probe and default options.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            transport: None,
            probe: None,
            options: ExchangeOptions::default(),
        }
    }

    /// Replace the TCP transport, e.g. with an in-memory one for tests.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replace the ICMP liveness probe.
    pub fn with_probe(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Use an already boxed probe (as produced by [`crate::ProbeKind::build`]).
    pub fn with_boxed_probe(mut self, probe: Box<dyn LivenessProbe>) -> Self {
        self.probe = Some(Arc::from(probe));
        self
    }

    /// Replace all options at once.
    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the command terminator. An empty terminator falls back to `"\n"` in [`build`](Self::build).
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.options.line_terminator = terminator.into();
        self
    }

    /// Set reply reading options.
    ///
    /// [`build`](Self::build) replaces a zero buffer size with the default and raises
    /// `max_reply_len` to at least the buffer size.
    pub fn with_reply_options(mut self, reply: ReplyOptions) -> Self {
        self.options.reply = reply;
        self
    }

    /// Set the upper bound for the liveness probe.
    pub fn with_probe_timeout(mut self, limit: Duration) -> Self {
        self.options.probe_timeout = limit;
        self
    }

    /// Set the deadline used by every operation except `query_within`.
    pub fn with_transaction_timeout(mut self, limit: Duration) -> Self {
        self.options.transaction_timeout = limit;
        self
    }

    /// Set the connection reuse policy.
    pub fn with_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.options.policy = policy;
        self
    }

    /// Build the client. No connection is opened until the first transaction.
    pub fn build(self) -> ExchangeClient {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::default()));
        let probe = self.probe.unwrap_or_else(|| Arc::new(IcmpProbe));

        ExchangeClient {
            endpoint: self.endpoint,
            transport,
            probe,
            options: self.options.sanitized(),
            state: Mutex::new(ConnectionState::NotConnected),
            transactions: AtomicU64::new(0),
        }
    }
}

/// Serialized request/response exchange with one instrument.
///
/// Share it between tasks with `Arc`; concurrent calls queue on an internal lock.
pub struct ExchangeClient {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn LivenessProbe>,
    options: ExchangeOptions,
    state: Mutex<ConnectionState>,
    transactions: AtomicU64,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport.describe())
            .field("probe", &self.probe.describe())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ExchangeClient {
    /// Client for `host:port` with TCP transport, ICMP probe and default options.
    pub fn new(host: &str, port: u16) -> ExchangeResult<Self> {
        Ok(Self::builder(Endpoint::new(host, port)?).build())
    }

    /// Start configuring a client for `endpoint`.
    pub fn builder(endpoint: Endpoint) -> ExchangeClientBuilder {
        ExchangeClientBuilder::new(endpoint)
    }

    /// The instrument endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Effective options after [`ExchangeClientBuilder::build`].
    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    /// Number of transactions started so far.
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Current link state. Waits for any in-flight transaction to finish.
    pub async fn link_state(&self) -> LinkState {
        self.state.lock().await.link_state()
    }

    /// Close a parked connection, if any. Only meaningful with the persistent policy.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Some(stream) = state.take_stream() {
            close_stream(stream).await;
            tracing::debug!(endpoint = %self.endpoint, "parked connection closed");
        }
    }

    /// Send a command without returning a reply.
    ///
    /// A command containing `?` still has its reply read and discarded so the stream
    /// stays in step with the instrument.
    pub async fn send_without_request(&self, command: &str) -> ExchangeResult<()> {
        if let Some(reply) = self.query(command).await? {
            tracing::debug!(command, reply = %reply, "discarding reply to command sent without request");
        }
        Ok(())
    }

    /// Send a command and return the trimmed reply text.
    ///
    /// Returns an empty string for commands without `?`, which get no reply.
    pub async fn send_with_request_string(&self, command: &str) -> ExchangeResult<String> {
        Ok(self.query(command).await?.unwrap_or_default())
    }

    /// Send a command and parse the reply as a base-10 integer.
    pub async fn send_with_request_int(&self, command: &str) -> ExchangeResult<i32> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "integer", numeric::parse_int)
    }

    /// Send a command and parse the reply as a float, accepting `.` or `,` as separator.
    pub async fn send_with_request_double(&self, command: &str) -> ExchangeResult<f64> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "floating-point number", numeric::parse_double)
    }

    /// Send a command and parse an SCPI boolean reply (`1`/`0`/`ON`/`OFF`).
    pub async fn send_with_request_bool(&self, command: &str) -> ExchangeResult<bool> {
        let reply = self.send_with_request_string(command).await?;
        parse_reply(command, &reply, "boolean", numeric::parse_bool)
    }

    /// Run one transaction under the configured deadline.
    ///
    /// Returns `Some(reply)` for queries and `None` otherwise.
    pub async fn query(&self, command: &str) -> ExchangeResult<Option<String>> {
        self.query_within(command, self.options.transaction_timeout)
            .await
    }

    /// Run one transaction under a caller-supplied deadline.
    ///
    /// The deadline starts once the lock is held, so time spent queueing behind other
    /// callers does not count against it. Expiry always yields
    /// [`ExchangeError::Timeout`], also when the liveness probe gave up at the same moment.
    pub async fn query_within(
        &self,
        command: &str,
        limit: Duration,
    ) -> ExchangeResult<Option<String>> {
        let span = tracing::debug_span!(
            "scpi_transaction",
            endpoint = %self.endpoint,
            command
        );

        async move {
            let mut state = self.state.lock().await;
            let id = self.transactions.fetch_add(1, Ordering::Relaxed) + 1;
            let started = Instant::now();
            let ctx = TxContext {
                command,
                started,
                deadline: started + limit,
            };
            tracing::trace!(id, "lock acquired");

            let parked = state.take_stream();
            match self.run(&ctx, parked).await {
                Ok(done) => {
                    if self.options.policy == ConnectionPolicy::Persistent && done.reusable {
                        state.park(done.stream);
                    } else {
                        tracing::debug!(id, phase = %TransactionPhase::Closing, "closing connection");
                        close_stream(done.stream).await;
                        state.mark_closed();
                    }
                    tracing::debug!(id, elapsed = ?started.elapsed(), "transaction complete");
                    Ok(done.reply)
                }
                Err(err) => {
                    // The stream, if one was opened, was dropped inside `run`.
                    state.mark_closed();
                    tracing::debug!(id, error = %err, "transaction failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        ctx: &TxContext<'_>,
        parked: Option<Box<dyn InstrumentStream>>,
    ) -> ExchangeResult<Completed> {
        let mut stream = match parked {
            Some(stream) => {
                tracing::trace!("reusing parked connection");
                stream
            }
            None => self.open(ctx).await?,
        };

        let frame = encode_command(ctx.command, &self.options.line_terminator);
        ctx.within(TransactionPhase::Sending, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await?;
        tracing::debug!(bytes = frame.len(), "command sent");

        if !is_query(ctx.command) {
            return Ok(Completed {
                reply: None,
                stream,
                reusable: true,
            });
        }

        let frame = ctx
            .within(
                TransactionPhase::Receiving,
                read_reply(&mut stream, &self.options.reply),
            )
            .await?;
        tracing::debug!(reply = %frame.text, "reply received");

        Ok(Completed {
            reply: Some(frame.text),
            stream,
            reusable: frame.reusable,
        })
    }

    async fn open(&self, ctx: &TxContext<'_>) -> ExchangeResult<Box<dyn InstrumentStream>> {
        let probe_limit = self
            .options
            .probe_timeout
            .min(ctx.deadline.saturating_duration_since(Instant::now()));

        tracing::debug!(phase = %TransactionPhase::Probing, probe = self.probe.describe(), "probing device");
        match timeout_at(ctx.deadline, self.probe.probe(&self.endpoint, probe_limit)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) if Instant::now() >= ctx.deadline => {
                return Err(ctx.timeout(TransactionPhase::Probing));
            }
            Ok(Err(err)) => {
                tracing::warn!(endpoint = %self.endpoint, error = %err, "liveness probe failed");
                return Err(ExchangeError::DeviceUnreachable {
                    command: ctx.command.to_string(),
                    address: self.endpoint.ip().to_string(),
                    detail: err.to_string(),
                });
            }
            Err(_) => return Err(ctx.timeout(TransactionPhase::Probing)),
        }

        tracing::debug!(phase = %TransactionPhase::Connecting, transport = self.transport.describe(), "connecting");
        ctx.within(
            TransactionPhase::Connecting,
            self.transport.connect(&self.endpoint),
        )
        .await
    }
}

struct Completed {
    reply: Option<String>,
    stream: Box<dyn InstrumentStream>,
    reusable: bool,
}

struct TxContext<'a> {
    command: &'a str,
    started: Instant,
    deadline: Instant,
}

impl TxContext<'_> {
    /// Run one I/O step against the transaction deadline.
    async fn within<T, F>(&self, phase: TransactionPhase, step: F) -> ExchangeResult<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match timeout_at(self.deadline, step).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ExchangeError::communication(self.command, phase, err)),
            Err(_) => Err(self.timeout(phase)),
        }
    }

    fn timeout(&self, phase: TransactionPhase) -> ExchangeError {
        ExchangeError::Timeout {
            command: self.command.to_string(),
            phase,
            elapsed: self.started.elapsed(),
        }
    }
}
