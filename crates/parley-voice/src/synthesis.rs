//! Synthesis relay — sentence-triggered text-to-speech over a speak socket.
//!
//! Three tasks per relay:
//! - **send**: accumulates fragments into sentence units and sends
//!   `{"type":"Speak"}` / `{"type":"Flush"}` to the backend
//! - **receive**: pushes binary audio into the playback queue, logs JSON status
//! - **playback**: drains the queue into the audio output
//!
//! Synthesis is optional. Backend failures stop speech for the connection
//! and are logged, but never end the connection.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::error::{GatewayError, Result};
use parley_core::protocol::ClientEvent;

use crate::accumulator::SentenceAccumulator;
use crate::playback::{AudioOutput, PlaybackSink};
use crate::socket::{Connector, Frame, FrameSink, FrameSource, SocketPair};
use crate::tasks::{join_all, send_event, NamedTask, CLOSE_GRACE};

/// Capacity of the fragment queue feeding the send loop.
const COMMAND_QUEUE: usize = 128;

enum Command {
    Fragment(String),
    End,
}

/// Feeds text into a running synthesis relay.
///
/// Sends give up as soon as the relay is stopping, even when the queue is
/// full.
#[derive(Clone)]
pub struct SynthesisHandle {
    tx: mpsc::Sender<Command>,
    stop: CancellationToken,
}

impl SynthesisHandle {
    /// Append one reply fragment.
    pub async fn push(&self, fragment: impl Into<String>) -> Result<()> {
        self.send(Command::Fragment(fragment.into())).await
    }

    /// End of the current utterance: flush the remainder.
    pub async fn end(&self) -> Result<()> {
        self.send(Command::End).await
    }

    /// Speak a complete text.
    pub async fn speak(&self, text: &str) -> Result<()> {
        self.push(text).await?;
        self.end().await
    }

    async fn send(&self, command: Command) -> Result<()> {
        let stopped = || GatewayError::Resource("synthesis relay stopped".into());
        if self.stop.is_cancelled() {
            return Err(stopped());
        }
        tokio::select! {
            _ = self.stop.cancelled() => Err(stopped()),
            result = self.tx.send(command) => result.map_err(|_| stopped()),
        }
    }
}

/// A running synthesis relay.
pub struct SynthesisRelay {
    handle: SynthesisHandle,
    stop: CancellationToken,
    tasks: Vec<NamedTask>,
}

impl SynthesisRelay {
    /// Open the speak socket and start the relay tasks.
    ///
    /// Nothing is spawned unless the socket opens.
    pub async fn start(
        connector: &dyn Connector,
        output: Box<dyn AudioOutput>,
        playback_queue: usize,
        client: mpsc::Sender<ClientEvent>,
        session: &CancellationToken,
    ) -> Result<Self> {
        let SocketPair { sink, source } = connector.connect().await?;
        let stop = session.child_token();

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (playback, playback_task) = PlaybackSink::spawn(output, playback_queue, stop.clone());
        let send_task = NamedTask::spawn(
            "synthesis-send",
            send_loop(sink, rx, client, stop.clone()),
        );
        let receive_task = NamedTask::spawn(
            "synthesis-receive",
            receive_loop(source, playback, stop.clone()),
        );

        info!(backend = connector.name(), "Synthesis relay started");
        Ok(Self {
            handle: SynthesisHandle {
                tx,
                stop: stop.clone(),
            },
            stop,
            tasks: vec![send_task, receive_task, playback_task],
        })
    }

    pub fn handle(&self) -> SynthesisHandle {
        self.handle.clone()
    }

    /// Stop every task, close the socket and release the audio output.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop.cancel();
        drop(self.handle);
        join_all(self.tasks, timeout).await;
        debug!("Synthesis relay stopped");
    }
}

// ─────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────

async fn send_loop(
    mut sink: Box<dyn FrameSink>,
    mut commands: mpsc::Receiver<Command>,
    client: mpsc::Sender<ClientEvent>,
    stop: CancellationToken,
) {
    let mut accumulator = SentenceAccumulator::new();

    loop {
        let command = tokio::select! {
            _ = stop.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Fragment(fragment) => {
                if let Some(unit) = accumulator.push(&fragment) {
                    speak_unit(sink.as_mut(), &client, &unit, &stop).await;
                }
            }
            Command::End => {
                if let Some(unit) = accumulator.finish() {
                    speak_unit(sink.as_mut(), &client, &unit, &stop).await;
                }
                send_json(sink.as_mut(), json!({ "type": "Flush" }), &stop).await;
                send_event(&client, ClientEvent::SpeechComplete, &stop).await;
            }
        }
    }

    commands.close();
    let goodbye = async {
        let close = json!({ "type": "Close" }).to_string();
        if let Err(e) = sink.send(Frame::Text(close)).await {
            debug!(error = %e, "Close not delivered");
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Synthesis socket close failed");
        }
    };
    if tokio::time::timeout(CLOSE_GRACE, goodbye).await.is_err() {
        debug!("Synthesis socket stuck, closing without Close");
    }
}

/// Send one unit for synthesis. Whitespace-only units are not spoken.
async fn speak_unit(
    sink: &mut dyn FrameSink,
    client: &mpsc::Sender<ClientEvent>,
    unit: &str,
    stop: &CancellationToken,
) {
    let text = unit.trim();
    if text.is_empty() {
        debug!("Skipping whitespace-only unit");
        return;
    }
    if send_json(sink, json!({ "type": "Speak", "text": text }), stop).await {
        send_event(client, ClientEvent::SpeechProcessing(text.to_string()), stop).await;
    }
}

/// Send one JSON frame unless the relay stops first.
async fn send_json(sink: &mut dyn FrameSink, value: Value, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        result = sink.send(Frame::Text(value.to_string())) => match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Synthesis send failed");
                false
            }
        },
    }
}

async fn receive_loop(
    mut source: Box<dyn FrameSource>,
    playback: PlaybackSink,
    stop: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = source.recv() => frame,
        };

        match frame {
            Some(Ok(Frame::Binary(audio))) => {
                if !queue_audio(&playback, audio, &stop).await {
                    break;
                }
            }
            Some(Ok(Frame::Text(text))) => match serde_json::from_str::<Value>(&text) {
                Ok(status) => debug!(status = %status, "Synthesis status"),
                Err(e) => warn!(error = %e, "Invalid JSON from synthesis backend"),
            },
            Some(Err(e)) => {
                warn!(error = %e, "Synthesis socket failed, speech disabled");
                break;
            }
            None => {
                if !stop.is_cancelled() {
                    warn!("Synthesis socket closed by backend, speech disabled");
                }
                break;
            }
        }
    }
}

async fn queue_audio(playback: &PlaybackSink, audio: Bytes, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        result = playback.push(audio) => match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Dropping synthesized audio");
                false
            }
        },
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
