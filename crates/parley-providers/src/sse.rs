//! Server-sent events reader over a byte stream.
//!
//! Collects `data:` lines into one payload per event (events end at a blank
//! line). `event:`, `id:`, `retry:` and comment lines are skipped.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use parley_core::error::{GatewayError, Result};

pub(crate) struct SseReader<S> {
    stream: S,
    buffer: Vec<u8>,
    data: Vec<String>,
    finished: bool,
}

impl<S, E> SseReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            data: Vec::new(),
            finished: false,
        }
    }

    /// Reads the next event payload. `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Result<Option<String>> {
        loop {
            while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if let Some(event) = self.take_line(&line) {
                    return Ok(Some(event));
                }
            }

            if self.finished {
                let rest = std::mem::take(&mut self.buffer);
                if let Some(event) = self.take_line(&rest) {
                    return Ok(Some(event));
                }
                return Ok(self.flush());
            }

            match self.stream.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(GatewayError::Upstream(format!("stream error: {e}"))),
                None => self.finished = true,
            }
        }
    }

    /// Feed one line; returns a payload when the line closes an event.
    fn take_line(&mut self, raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        if line.is_empty() {
            return self.flush();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        None
    }

    fn flush(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}
