//! Newline-delimited framing for the worker's stdio streams.
//!
//! Inbound, [`LineFramer`] turns an arbitrary chunking of the worker's output
//! back into complete lines. Outbound, [`write_line`] writes one JSON document
//! followed by a single `\n`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read buffer size for the stdout/stderr pump.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reassembles complete lines from raw byte chunks.
///
/// The buffer holds bytes, not text, so a multi-byte UTF-8 sequence split
/// across two chunks is decoded only once it is whole.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Lines are trimmed (so `\r\n` terminators work) and blank lines are
    /// dropped. The trailing unterminated segment stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(line) = decode_line(&self.buf[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Flush whatever unterminated text remains, e.g. when the stream hits EOF.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pump `reader` through a [`LineFramer`], calling `on_line` for each line.
///
/// Returns once the stream reaches EOF; any unterminated tail is delivered
/// last.
///
/// # Errors
///
/// Returns the underlying I/O error if a read fails.
pub async fn read_lines<R, F>(mut reader: R, mut on_line: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in framer.push(&chunk[..n]) {
            on_line(line);
        }
    }
    if let Some(tail) = framer.finish() {
        on_line(tail);
    }
    Ok(())
}

/// Write a JSON message in newline-delimited format to the given writer.
///
/// Appends `\n` and flushes. The `json` string must not contain embedded
/// newlines.
///
/// # Errors
///
/// Returns an I/O error if writing or flushing fails.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> io::Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
