//! Simulated instruments for integration tests.
//!
//! - `RecordingTransport`: in-memory duplex streams whose every read, write, shutdown and
//!   drop is appended to a shared `CallLog`, in the order the client performed them.
//! - `LoopbackInstrument`: a real TCP listener on 127.0.0.1 answering line-based commands.

use async_trait::async_trait;
use scpi_exchange::{Endpoint, InstrumentStream, LivenessProbe, Transport};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpListener;

/// Maps one received command line to an optional reply.
pub type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Responder answering a fixed table, silent for unknown commands.
pub fn table(entries: &[(&str, &str)]) -> Responder {
    let entries: Vec<(String, String)> = entries
        .iter()
        .map(|(c, r)| (c.to_string(), r.to_string()))
        .collect();
    Arc::new(move |command| {
        entries
            .iter()
            .find(|(c, _)| c == command)
            .map(|(_, r)| r.clone())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(usize),
    Write(usize, Vec<u8>),
    Read(usize, Vec<u8>),
    Shutdown(usize),
    Dropped(usize),
}

impl Event {
    pub fn connection(&self) -> usize {
        match self {
            Event::Connect(id)
            | Event::Write(id, _)
            | Event::Read(id, _)
            | Event::Shutdown(id)
            | Event::Dropped(id) => *id,
        }
    }
}

/// Shared, ordered record of client-side stream activity.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CallLog {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, connection: usize) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.connection() == connection)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Connect(_)))
            .count()
    }

    /// Bytes written on one connection, concatenated.
    pub fn written(&self, connection: usize) -> Vec<u8> {
        self.events_for(connection)
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(_, bytes) => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Non-empty reads on one connection.
    pub fn reads(&self, connection: usize) -> Vec<Vec<u8>> {
        self.events_for(connection)
            .into_iter()
            .filter_map(|e| match e {
                Event::Read(_, bytes) if !bytes.is_empty() => Some(bytes),
                _ => None,
            })
            .collect()
    }

    /// Panics if any connection's events are split by another connection's events.
    pub fn assert_no_interleaving(&self) {
        let mut finished = std::collections::HashSet::new();
        let mut current: Option<usize> = None;
        for event in self.events() {
            let id = event.connection();
            if current != Some(id) {
                if let Some(previous) = current {
                    finished.insert(previous);
                }
                assert!(
                    !finished.contains(&id),
                    "connection {id} resumed after another connection started: {:?}",
                    self.events()
                );
                current = Some(id);
            }
        }
    }
}

/// Client side of an in-memory connection that logs every operation.
pub struct RecordingStream {
    id: usize,
    inner: DuplexStream,
    log: CallLog,
}

impl AsyncRead for RecordingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.log
                .push(Event::Read(this.id, buf.filled()[before..].to_vec()));
        }
        poll
    }
}

impl AsyncWrite for RecordingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.log.push(Event::Write(this.id, buf[..n].to_vec()));
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        if poll.is_ready() {
            this.log.push(Event::Shutdown(this.id));
        }
        poll
    }
}

impl Drop for RecordingStream {
    fn drop(&mut self) {
        self.log.push(Event::Dropped(self.id));
    }
}

/// In-memory transport backed by a simulated line-based instrument.
pub struct RecordingTransport {
    responder: Responder,
    greeting: Option<Vec<u8>>,
    reply_delay: Duration,
    next_id: AtomicUsize,
    log: CallLog,
}

impl RecordingTransport {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            greeting: None,
            reply_delay: Duration::ZERO,
            next_id: AtomicUsize::new(0),
            log: CallLog::default(),
        }
    }

    /// Bytes the device sends unprompted right after accepting a connection.
    pub fn with_greeting(mut self, bytes: &[u8]) -> Self {
        self.greeting = Some(bytes.to_vec());
        self
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<Box<dyn InstrumentStream>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (host, device) = tokio::io::duplex(4096);
        self.log.push(Event::Connect(id));

        tokio::spawn(serve_device(
            device,
            self.responder.clone(),
            self.greeting.clone(),
            self.reply_delay,
        ));

        Ok(Box::new(RecordingStream {
            id,
            inner: host,
            log: self.log.clone(),
        }))
    }

    fn describe(&self) -> &str {
        "recording"
    }
}

/// Line-based device loop shared by the in-memory and TCP instruments.
async fn serve_device<S>(
    mut device: S,
    responder: Responder,
    greeting: Option<Vec<u8>>,
    reply_delay: Duration,
) -> Vec<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received = Vec::new();
    if let Some(greeting) = greeting {
        let _ = device.write_all(&greeting).await;
    }

    let mut pending = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match device.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&line).trim().to_string();
            let reply = responder(&command);
            received.push(command);

            if let Some(reply) = reply {
                if !reply_delay.is_zero() {
                    tokio::time::sleep(reply_delay).await;
                }
                if device.write_all(reply.as_bytes()).await.is_err() {
                    return received;
                }
            }
        }
    }
    received
}

/// Probe that always fails and counts its invocations.
#[derive(Default, Clone)]
pub struct FailingProbe {
    attempts: Arc<AtomicUsize>,
}

impl FailingProbe {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for FailingProbe {
    async fn probe(&self, endpoint: &Endpoint, _limit: Duration) -> io::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no echo reply from {}", endpoint.ip()),
        ))
    }

    fn describe(&self) -> &str {
        "failing"
    }
}

/// Real TCP instrument on an ephemeral loopback port.
pub struct LoopbackInstrument {
    pub endpoint: Endpoint,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
}

impl LoopbackInstrument {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let counter = accepted.clone();
        let sink = received.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let responder = responder.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let commands = serve_device(socket, responder, None, Duration::ZERO).await;
                    sink.lock().unwrap().extend(commands);
                });
            }
        });

        Self {
            endpoint: Endpoint::new("127.0.0.1", port).unwrap(),
            accepted,
            received,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Commands from connections that have already been closed by the client.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

/// Poll `condition` until it holds or one second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
