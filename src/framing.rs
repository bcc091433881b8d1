//! Command framing and reply reading.
//!
//! Outgoing frames are the command text plus a line terminator. Incoming replies are
//! read in one of two ways:
//!
//! - [`ReplyFraming::Delimited`] (default): keep reading until the delimiter byte
//!   arrives, up to `max_reply_len`. A reply split over several TCP segments is
//!   reassembled.
//! - [`ReplyFraming::FirstChunk`]: wait for the first non-empty read and return it. A
//!   reply longer than the buffer is truncated and reported with a warning. A chunk
//!   that does not end with the delimiter may be the head of a split reply, so the
//!   connection is not reused after it.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default reply buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Default upper bound for delimited replies.
pub const DEFAULT_MAX_REPLY_LEN: usize = 64 * 1024;
/// Default command terminator.
pub const DEFAULT_LINE_TERMINATOR: &str = "\n";

/// SCPI query marker.
const QUERY_MARKER: char = '?';

/// True when the command expects a reply.
///
/// This is a substring test, not a suffix test: `TRIG:SOUR?;` is a query.
pub fn is_query(command: &str) -> bool {
    command.contains(QUERY_MARKER)
}

/// Build the bytes written for one command.
pub fn encode_command(command: &str, terminator: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.len() + terminator.len());
    frame.extend_from_slice(command.as_bytes());
    frame.extend_from_slice(terminator.as_bytes());
    frame
}

/// How the end of a reply is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFraming {
    /// Read until the delimiter byte.
    #[default]
    Delimited,
    /// Return the first non-empty read as is.
    FirstChunk,
}

/// Reply reading parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Size of each read.
    pub buffer_size: usize,
    /// How the end of a reply is found.
    pub framing: ReplyFraming,
    /// End-of-reply byte.
    pub delimiter: u8,
    /// Upper bound for a delimited reply.
    pub max_reply_len: usize,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            framing: ReplyFraming::Delimited,
            delimiter: b'\n',
            max_reply_len: DEFAULT_MAX_REPLY_LEN,
        }
    }
}

/// One decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    /// Reply text with surrounding whitespace and line endings removed.
    pub text: String,
    /// False when unread or discarded bytes may remain on the stream, in which case
    /// the connection must not carry another transaction.
    pub reusable: bool,
}

/// Read one reply frame from `reader`.
///
/// End of stream before the first byte is reported as `UnexpectedEof`.
pub async fn read_reply<R>(reader: &mut R, options: &ReplyOptions) -> io::Result<ReplyFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match options.framing {
        ReplyFraming::FirstChunk => read_first_chunk(reader, options).await,
        ReplyFraming::Delimited => read_delimited(reader, options).await,
    }
}

async fn read_first_chunk<R>(reader: &mut R, options: &ReplyOptions) -> io::Result<ReplyFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let buffer_size = options.buffer_size;
    let mut buffer = vec![0u8; buffer_size];
    let read = reader.read(&mut buffer).await?;
    if read == 0 {
        return Err(closed_before_reply());
    }

    tracing::trace!(
        bytes = read,
        raw = %String::from_utf8_lossy(&buffer[..read]).escape_default(),
        "reply chunk"
    );

    let truncated = read == buffer_size;
    if truncated {
        tracing::warn!(
            buffer_size,
            "reply filled the whole buffer and may be truncated"
        );
    }

    let complete = buffer[read - 1] == options.delimiter;
    if !truncated && !complete {
        tracing::debug!("reply chunk lacks delimiter, connection will not be reused");
    }

    Ok(ReplyFrame {
        text: decode(&buffer[..read]),
        reusable: !truncated && complete,
    })
}

async fn read_delimited<R>(reader: &mut R, options: &ReplyOptions) -> io::Result<ReplyFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; options.buffer_size];
    let mut reply: Vec<u8> = Vec::with_capacity(options.buffer_size);

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            if reply.is_empty() {
                return Err(closed_before_reply());
            }
            // Peer closed after sending an undelimited reply.
            return Ok(ReplyFrame {
                text: decode(&reply),
                reusable: false,
            });
        }

        if let Some(pos) = chunk[..read].iter().position(|&b| b == options.delimiter) {
            reply.extend_from_slice(&chunk[..pos]);
            let trailing = read - pos - 1;
            if trailing > 0 {
                tracing::warn!(trailing, "discarding bytes received after reply delimiter");
            }
            check_reply_len(reply.len(), options.max_reply_len)?;
            return Ok(ReplyFrame {
                text: decode(&reply),
                reusable: trailing == 0,
            });
        }

        reply.extend_from_slice(&chunk[..read]);
        check_reply_len(reply.len(), options.max_reply_len)?;
    }
}

fn check_reply_len(len: usize, max: usize) -> io::Result<()> {
    if len > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reply exceeds {max} bytes without delimiter"),
        ));
    }
    Ok(())
}

fn closed_before_reply() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before any reply byte",
    )
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
