//! `MakeWriter` that copies every formatted log line into the stream hub.
//!
//! Output is echoed unchanged to the wrapped writer (stdout by default);
//! complete lines, with any trailing `\r` removed, are published to the hub.
//! A fragment without a newline is published when the writer is dropped,
//! i.e. at the end of the event.

use std::io::{self, Write};

use tracing_subscriber::fmt::MakeWriter;

use super::LogLine;
use super::hub::StreamHub;

/// Log writer feeding both an echo writer and a [`StreamHub`].
#[derive(Debug, Clone)]
pub struct LogTee<M = fn() -> io::Stdout> {
    hub: StreamHub,
    echo: M,
}

impl LogTee {
    /// Tee echoing to stdout.
    pub fn new(hub: StreamHub) -> Self {
        Self {
            hub,
            echo: io::stdout,
        }
    }
}

impl<M> LogTee<M> {
    pub fn with_echo(hub: StreamHub, echo: M) -> Self {
        Self { hub, echo }
    }
}

impl<'a, M> MakeWriter<'a> for LogTee<M>
where
    M: MakeWriter<'a>,
{
    type Writer = TeeWriter<'a, M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            hub: &self.hub,
            echo: self.echo.make_writer(),
            pending: Vec::new(),
        }
    }
}

/// Per-event writer returned by [`LogTee`].
pub struct TeeWriter<'a, W: Write> {
    hub: &'a StreamHub,
    echo: W,
    pending: Vec<u8>,
}

impl<W: Write> TeeWriter<'_, W> {
    fn publish(&self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(raw);
        self.hub.publish(LogLine::from(text.as_ref()));
    }

    fn publish_complete_lines(&mut self) {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        for line in complete.split(|&b| b == b'\n') {
            self.publish(line);
        }
    }
}

impl<W: Write> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Echo failures must not keep lines away from stream clients.
        let _ = self.echo.write_all(buf);
        self.pending.extend_from_slice(buf);
        self.publish_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.echo.flush();
        Ok(())
    }
}

impl<W: Write> Drop for TeeWriter<'_, W> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.publish(&tail);
        }
        let _ = self.echo.flush();
    }
}
