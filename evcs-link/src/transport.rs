//! Line transport over a byte stream
//!
//! Owns both halves of the link's byte stream. Incoming bytes are framed into
//! lines by [`LineBuffer`] and pushed to the inbound queue; commands popped
//! from the outbound queue are written with the link's line terminator.
//! The transport knows nothing about the controller grammar.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::TransportEnds;
use crate::config::LinkConfig;

/// Longest line kept while waiting for a terminator
const MAX_LINE_LEN: usize = 4096;

/// Sans-I/O line framer.
///
/// Accepts `\r\n` and bare `\n` terminators. Blank lines are dropped and
/// non-ASCII bytes are decoded lossily. A partial line longer than
/// `MAX_LINE_LEN` is dropped up to and including its terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, mut bytes: &[u8]) {
        if self.discarding {
            match bytes.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    bytes = &bytes[pos + 1..];
                    self.discarding = false;
                }
                None => return,
            }
        }

        self.buf.extend_from_slice(bytes);

        let partial_start = self
            .buf
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if self.buf.len() - partial_start > MAX_LINE_LEN {
            warn!(
                "Discarding {} bytes without line terminator",
                self.buf.len() - partial_start
            );
            self.buf.truncate(partial_start);
            self.discarding = true;
        }
    }

    /// Next complete line, if one is buffered
    pub fn read_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if !line.trim().is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }

    /// Bytes of an unterminated partial line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Reader/writer loop for the link's byte stream
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    buffer: LineBuffer,
    terminator: String,
    chunk_size: usize,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, config: &LinkConfig) -> Self {
        Self {
            reader,
            writer,
            buffer: LineBuffer::new(),
            terminator: config.line_terminator.clone(),
            chunk_size: config.read_chunk_size.max(1),
        }
    }

    /// Next buffered line; never waits for the stream
    pub fn read_line(&mut self) -> Option<String> {
        self.buffer.read_line()
    }

    /// Write one line followed by the link terminator
    pub async fn write_line(&mut self, text: &str) -> io::Result<()> {
        debug!("OUTGOING>{}", text);
        let mut data = String::with_capacity(text.len() + self.terminator.len());
        data.push_str(text);
        data.push_str(&self.terminator);

        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Run until cancelled or until the engine drops its ends.
    ///
    /// Reads and writes are polled in the same `select!`, so a busy inbound
    /// stream cannot starve outbound commands. End of input stops reading
    /// but keeps draining commands.
    pub async fn run(mut self, mut ends: TransportEnds, cancel: CancellationToken) -> io::Result<()> {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut reading = true;

        'poll: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Transport shutdown requested");
                    break 'poll;
                }

                read = self.reader.read(&mut chunk), if reading => {
                    match read {
                        Ok(0) => {
                            info!("Input stream closed");
                            reading = false;
                        }
                        Ok(n) => {
                            self.buffer.push(&chunk[..n]);
                            while let Some(line) = self.read_line() {
                                debug!("INCOMING>{}", line);
                                if ends.lines.send(line).is_err() {
                                    debug!("Engine gone, stopping transport");
                                    break 'poll;
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!("Read error on link: {}", e);
                            self.close().await;
                            return Err(e);
                        }
                    }
                }

                command = ends.commands.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(e) = self.write_line(&command.to_string()).await {
                                warn!("Write error on link: {}", e);
                                self.close().await;
                                return Err(e);
                            }
                        }
                        None => {
                            debug!("Command queue closed, stopping transport");
                            break 'poll;
                        }
                    }
                }
            }
        }

        if self.buffer.pending() > 0 {
            debug!("Dropping {} bytes of partial line", self.buffer.pending());
        }
        self.close().await;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error closing link writer: {}", e);
        }
        info!("Link transport closed");
    }
}
