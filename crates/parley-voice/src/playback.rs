//! Playback sink — a single-consumer bounded queue feeding an audio output.
//!
//! The synthesis receive loop pushes audio frames in arrival order; one
//! drain task writes them to the output. When every producer has gone the
//! drain task finishes the queue and then releases the output, so an output
//! is never closed while frames are still queued for it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::config::schema::{AudioOutputKind, SynthesisConfig};
use parley_core::error::{GatewayError, Result};
use parley_core::protocol::ClientEvent;
use parley_core::utils::expand_home;

use crate::tasks::NamedTask;

// ─────────────────────────────────────────────
// Audio outputs
// ─────────────────────────────────────────────

/// Where synthesized audio ends up.
#[async_trait]
pub trait AudioOutput: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Release the output. Called once, after the last write.
    async fn close(&mut self) -> Result<()>;
}

/// Forwards audio to the connected client as binary frames.
pub struct ClientOutput {
    client: mpsc::Sender<ClientEvent>,
}

impl ClientOutput {
    pub fn new(client: mpsc::Sender<ClientEvent>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AudioOutput for ClientOutput {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.client
            .send(ClientEvent::Audio(chunk))
            .await
            .map_err(|_| GatewayError::Resource("client connection closed".into()))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends raw PCM to a file.
pub struct FileOutput {
    path: PathBuf,
    file: File,
}

impl FileOutput {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

#[async_trait]
impl AudioOutput for FileOutput {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.file.flush().await?;
        debug!(path = %self.path.display(), "Audio file closed");
        Ok(())
    }
}

/// Discards audio.
pub struct NullOutput;

#[async_trait]
impl AudioOutput for NullOutput {
    async fn write(&mut self, _chunk: Bytes) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build the output selected by the synthesis config.
pub async fn open_output(
    config: &SynthesisConfig,
    client: mpsc::Sender<ClientEvent>,
) -> Result<Box<dyn AudioOutput>> {
    match config.output {
        AudioOutputKind::Client => Ok(Box::new(ClientOutput::new(client))),
        AudioOutputKind::None => Ok(Box::new(NullOutput)),
        AudioOutputKind::File => {
            if config.output_path.is_empty() {
                return Err(GatewayError::Configuration(
                    "synthesis output 'file' requires outputPath".into(),
                ));
            }
            let path = expand_home(&config.output_path);
            Ok(Box::new(FileOutput::open(&path).await?))
        }
    }
}

// ─────────────────────────────────────────────
// Playback queue
// ─────────────────────────────────────────────

/// Producer side of the playback queue.
#[derive(Clone)]
pub struct PlaybackSink {
    tx: mpsc::Sender<Bytes>,
}

impl PlaybackSink {
    /// Start the drain task. It stops when every sink clone is dropped (after
    /// writing what is queued) or when `cancel` fires.
    pub fn spawn(
        mut output: Box<dyn AudioOutput>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, NamedTask) {
        let (tx, mut rx) = mpsc::channel::<Bytes>(capacity.max(1));

        let task = NamedTask::spawn("playback", async move {
            let mut written = 0usize;
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => chunk,
                        None => break,
                    },
                };
                if let Err(e) = output.write(chunk).await {
                    warn!(error = %e, "Audio output write failed, stopping playback");
                    break;
                }
                written += 1;
            }
            rx.close();
            if let Err(e) = output.close().await {
                warn!(error = %e, "Failed to release audio output");
            }
            debug!(frames = written, "Playback stopped");
        });

        (Self { tx }, task)
    }

    /// Queue one audio frame, waiting for a free slot.
    pub async fn push(&self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| GatewayError::Resource("playback stopped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_client_output_drains_in_order() {
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let (sink, task) = PlaybackSink::spawn(
            Box::new(ClientOutput::new(client_tx)),
            4,
            CancellationToken::new(),
        );

        sink.push(Bytes::from_static(b"one")).await.unwrap();
        sink.push(Bytes::from_static(b"two")).await.unwrap();
        drop(sink);
        assert!(task.join(Duration::from_secs(1)).await);

        assert_eq!(client_rx.recv().await, Some(ClientEvent::Audio(Bytes::from_static(b"one"))));
        assert_eq!(client_rx.recv().await, Some(ClientEvent::Audio(Bytes::from_static(b"two"))));
        assert_eq!(client_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_file_output_appends_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio/out.pcm");
        let config = SynthesisConfig {
            output: AudioOutputKind::File,
            output_path: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let (client_tx, _client_rx) = mpsc::channel(1);
        let output = open_output(&config, client_tx).await.unwrap();
        let (sink, task) = PlaybackSink::spawn(output, 4, CancellationToken::new());

        sink.push(Bytes::from_static(&[1, 2])).await.unwrap();
        sink.push(Bytes::from_static(&[3])).await.unwrap();
        drop(sink);
        task.join(Duration::from_secs(1)).await;

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_output_requires_path() {
        let config = SynthesisConfig {
            output: AudioOutputKind::File,
            ..Default::default()
        };
        let (client_tx, _client_rx) = mpsc::channel(1);
        assert!(open_output(&config, client_tx).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_playback() {
        let cancel = CancellationToken::new();
        let (sink, task) = PlaybackSink::spawn(Box::new(NullOutput), 1, cancel.clone());
        cancel.cancel();
        assert!(task.join(Duration::from_secs(1)).await);
        assert!(sink.push(Bytes::from_static(b"late")).await.is_err());
    }
}
