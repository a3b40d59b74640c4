//! Transcription relay — client audio in, live transcripts out.
//!
//! The audio task forwards binary frames to the listen socket; the receive
//! task republishes non-empty transcripts to the client. Losing the listen
//! socket while the relay is running is fatal for the whole connection: the
//! client is told and the session token is cancelled.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_core::error::{GatewayError, Result};
use parley_core::protocol::ClientEvent;

use crate::socket::{Connector, Frame, FrameSink, FrameSource, SocketPair};
use crate::tasks::{join_all, send_event, NamedTask, CLOSE_GRACE};

/// Audio frames buffered between the client loop and the listen socket.
const AUDIO_QUEUE: usize = 256;

/// Client-facing text of a transcription fault.
pub const CONNECTION_LOST: &str = "transcription connection lost";

/// Feeds client audio into a running transcription relay.
#[derive(Clone)]
pub struct TranscriptionHandle {
    tx: mpsc::Sender<Bytes>,
    stop: CancellationToken,
}

impl TranscriptionHandle {
    /// Forward one audio frame. Frames arriving during shutdown are dropped.
    pub async fn send_audio(&self, audio: Bytes) -> Result<()> {
        if self.stop.is_cancelled() {
            debug!(bytes = audio.len(), "Dropping audio during shutdown");
            return Ok(());
        }
        tokio::select! {
            _ = self.stop.cancelled() => Ok(()),
            result = self.tx.send(audio) => result
                .map_err(|_| GatewayError::Resource("transcription relay stopped".into())),
        }
    }
}

/// A running transcription relay.
pub struct TranscriptionRelay {
    handle: TranscriptionHandle,
    stop: CancellationToken,
    tasks: Vec<NamedTask>,
}

impl TranscriptionRelay {
    /// Open the listen socket and start the relay tasks.
    pub async fn start(
        connector: &dyn Connector,
        client: mpsc::Sender<ClientEvent>,
        session: &CancellationToken,
    ) -> Result<Self> {
        let SocketPair { sink, source } = connector.connect().await?;
        let stop = session.child_token();

        let (tx, rx) = mpsc::channel(AUDIO_QUEUE);
        let audio_task = NamedTask::spawn("transcription-audio", audio_loop(sink, rx, stop.clone()));
        let receive_task = NamedTask::spawn(
            "transcription-receive",
            receive_loop(source, client, stop.clone(), session.clone()),
        );

        info!(backend = connector.name(), "Transcription relay started");
        Ok(Self {
            handle: TranscriptionHandle {
                tx,
                stop: stop.clone(),
            },
            stop,
            tasks: vec![audio_task, receive_task],
        })
    }

    pub fn handle(&self) -> TranscriptionHandle {
        self.handle.clone()
    }

    /// Stop both tasks; the listen socket gets `CloseStream` and is closed.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop.cancel();
        drop(self.handle);
        join_all(self.tasks, timeout).await;
        debug!("Transcription relay stopped");
    }
}

// ─────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────

async fn audio_loop(
    mut sink: Box<dyn FrameSink>,
    mut audio: mpsc::Receiver<Bytes>,
    stop: CancellationToken,
) {
    let mut failed = false;

    loop {
        let chunk = tokio::select! {
            _ = stop.cancelled() => break,
            chunk = audio.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        if failed {
            continue;
        }
        let sent = tokio::select! {
            _ = stop.cancelled() => break,
            sent = sink.send(Frame::Binary(chunk)) => sent,
        };
        if let Err(e) = sent {
            warn!(error = %e, "Transcription send failed, dropping further audio");
            failed = true;
        }
    }

    audio.close();
    let goodbye = async {
        let close_stream = json!({ "type": "CloseStream" }).to_string();
        if let Err(e) = sink.send(Frame::Text(close_stream)).await {
            debug!(error = %e, "CloseStream not delivered");
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Transcription socket close failed");
        }
    };
    if tokio::time::timeout(CLOSE_GRACE, goodbye).await.is_err() {
        debug!("Transcription socket stuck, closing without CloseStream");
    }
}

async fn receive_loop(
    mut source: Box<dyn FrameSource>,
    client: mpsc::Sender<ClientEvent>,
    stop: CancellationToken,
    session: CancellationToken,
) {
    let reason = loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => return,
            frame = source.recv() => frame,
        };

        match frame {
            Some(Ok(Frame::Text(text))) => {
                if let Some(transcript) = transcript_text(&text) {
                    debug!(chars = transcript.len(), "Transcript received");
                    send_event(&client, ClientEvent::Transcript(transcript), &stop).await;
                }
            }
            Some(Ok(Frame::Binary(_))) => continue,
            Some(Err(e)) => break e.to_string(),
            None => break "socket closed by backend".to_string(),
        }
    };

    if stop.is_cancelled() {
        return;
    }
    error!(reason = %reason, "Transcription connection lost");
    send_event(&client, ClientEvent::Error(CONNECTION_LOST.into()), &session).await;
    session.cancel();
}

/// The trimmed transcript of a listen-socket result, if it has one.
fn transcript_text(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let transcript = value
        .pointer("/channel/alternatives/0/transcript")
        .and_then(Value::as_str)?
        .trim();
    if transcript.is_empty() {
        None
    } else {
        Some(transcript.to_string())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{MemoryConnector, MemoryPeer};

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn start() -> (TranscriptionRelay, MemoryPeer, mpsc::Receiver<ClientEvent>, CancellationToken) {
        let connector = MemoryConnector::new();
        let peer = connector.push_socket(16).await;
        let (client_tx, client_rx) = mpsc::channel(16);
        let session = CancellationToken::new();
        let relay = TranscriptionRelay::start(&connector, client_tx, &session)
            .await
            .unwrap();
        (relay, peer, client_rx, session)
    }

    fn result(transcript: &str) -> Result<Frame> {
        Ok(Frame::Text(
            json!({"channel": {"alternatives": [{"transcript": transcript}]}}).to_string(),
        ))
    }

    #[test]
    fn test_transcript_text() {
        assert_eq!(
            transcript_text(r#"{"channel":{"alternatives":[{"transcript":" hello "}]}}"#),
            Some("hello".to_string())
        );
        assert_eq!(transcript_text(r#"{"channel":{"alternatives":[{"transcript":"  "}]}}"#), None);
        assert_eq!(transcript_text(r#"{"type":"Metadata"}"#), None);
        assert_eq!(transcript_text("garbage"), None);
    }

    #[tokio::test]
    async fn test_transcripts_forwarded() {
        let (relay, peer, mut client, _session) = start().await;

        peer.incoming.send(result("")).await.unwrap();
        peer.incoming
            .send(Ok(Frame::Text(r#"{"type":"SpeechStarted"}"#.into())))
            .await
            .unwrap();
        peer.incoming.send(result("turn on the lights")).await.unwrap();

        assert_eq!(
            client.recv().await,
            Some(ClientEvent::Transcript("turn on the lights".into()))
        );
        relay.shutdown(TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_audio_forwarded_to_backend() {
        let (relay, mut peer, _client, _session) = start().await;
        let handle = relay.handle();

        handle.send_audio(Bytes::from_static(b"pcm-1")).await.unwrap();
        handle.send_audio(Bytes::from_static(b"pcm-2")).await.unwrap();

        assert_eq!(peer.sent.recv().await, Some(Frame::Binary(Bytes::from_static(b"pcm-1"))));
        assert_eq!(peer.sent.recv().await, Some(Frame::Binary(Bytes::from_static(b"pcm-2"))));
        relay.shutdown(TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_backend_loss_is_fatal() {
        let (relay, peer, mut client, session) = start().await;
        drop(peer);

        assert_eq!(client.recv().await, Some(ClientEvent::Error(CONNECTION_LOST.into())));
        session.cancelled().await;
        relay.shutdown(TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_stream() {
        let (relay, mut peer, mut client, session) = start().await;
        let handle = relay.handle();
        relay.shutdown(TIMEOUT).await;

        assert_eq!(
            peer.sent.recv().await,
            Some(Frame::Text(r#"{"type":"CloseStream"}"#.into()))
        );
        assert!(peer.is_closed());
        assert!(!session.is_cancelled());
        assert!(client.try_recv().is_err());

        handle.send_audio(Bytes::from_static(b"late")).await.unwrap();
        assert!(peer.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_with_stuck_listen_socket() {
        let connector = MemoryConnector::new();
        let _peer = connector.push_socket(1).await;
        let (client_tx, _client_rx) = mpsc::channel(4);
        let relay = TranscriptionRelay::start(&connector, client_tx, &CancellationToken::new())
            .await
            .unwrap();
        let handle = relay.handle();
        for _ in 0..4 {
            let _ = tokio::time::timeout(
                Duration::from_millis(20),
                handle.send_audio(Bytes::from_static(b"pcm")),
            )
            .await;
        }

        let started = std::time::Instant::now();
        relay.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
