//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`FrameDecoder`] is the sans-IO core: bytes go in as they arrive, whole
//! frames come out. [`FrameReader`] and [`FrameWriter`] wrap it for async IO.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Header blocks are tiny; anything larger is garbage on the pipe.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Incremental frame parser.
///
/// Bytes may be pushed at arbitrary split points; the sequence of decoded
/// frames is independent of how the input was chunked.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

struct FrameHeader {
    body_start: usize,
    content_length: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes of an incomplete frame are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `Ok(None)` when more input is needed.
    /// Returns `Err` on malformed headers, oversized frames, or invalid JSON.
    pub fn next_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(header) = self.parse_header()? else {
            return Ok(None);
        };

        if header.content_length > MAX_FRAME_BYTES {
            bail!(
                "Content-Length {} exceeds maximum {MAX_FRAME_BYTES}",
                header.content_length
            );
        }

        let body_end = header.body_start + header.content_length;
        if self.buf.len() < body_end {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..body_end).collect();
        let value = serde_json::from_slice(&frame[header.body_start..])
            .context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    /// Parse headers up to the empty line separator.
    ///
    /// Returns `None` while the header block is still incomplete.
    fn parse_header(&self) -> Result<Option<FrameHeader>> {
        let mut content_length: Option<usize> = None;
        let mut pos = 0;

        loop {
            let Some(newline) = self.buf[pos..].iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    bail!("header block exceeds {MAX_HEADER_BYTES} bytes");
                }
                return Ok(None);
            };
            let line = &self.buf[pos..pos + newline];
            pos += newline + 1;

            let line = std::str::from_utf8(line).context("header is not valid UTF-8")?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Empty line = end of headers
                break;
            }

            // LSP spec uses "Content-Length" but parse case-insensitively for robustness.
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
            // Ignore other headers (e.g. Content-Type)
        }

        match content_length {
            Some(content_length) => Ok(Some(FrameHeader {
                body_start: pos,
                content_length,
            })),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Frames already buffered are returned before the reader is touched
    /// again. Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` on malformed input or EOF in the middle of a frame.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .context("reading from language server")?;
            if n == 0 {
                if self.decoder.is_empty() {
                    return Ok(None);
                }
                bail!("unexpected EOF inside a frame");
            }
            self.decoder.push(&self.chunk[..n]);
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Serializes JSON and prepends the `Content-Length` header.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(body.as_bytes())
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.context("closing writer")
    }
}
