//! Chunking of stdin into messages and of messages back into stdout bytes.
//!
//! Buffered framing treats the stream as lines: each `\n` (with an optional
//! preceding `\r`) ends one message, and a final unterminated line still
//! counts. Raw framing does no boundary detection at all: the whole input is
//! one message, and each received payload is written back verbatim.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Framing policy shared by the publish and listen directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Buffered,
    Raw,
}

impl Framing {
    pub fn from_buffered(buffered: bool) -> Self {
        if buffered { Framing::Buffered } else { Framing::Raw }
    }

    /// Write one received payload to `writer` and flush it.
    pub async fn write_payload<W>(self, writer: &mut W, payload: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(payload).await?;
        if self == Framing::Buffered {
            writer.write_all(b"\n").await?;
        }
        writer.flush().await
    }
}

/// Read the next line from `reader`, without its terminator.
///
/// Returns `Ok(None)` at end of stream. Empty lines come back as empty
/// vectors so callers can publish them.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes = reader.read_until(b'\n', &mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    }
    // One trailing `\r` goes too, including on a final line cut off by EOF.
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Read `reader` to end of stream as a single payload.
pub async fn read_all<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    reader.read_to_end(&mut payload).await?;
    Ok(payload)
}
