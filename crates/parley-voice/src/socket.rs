//! Socket abstraction for the speech backends.
//!
//! A relay only ever sees a [`SocketPair`]: a sink for outgoing frames and a
//! source for incoming ones, each owned by exactly one relay task. The
//! Deepgram connectors produce pairs backed by a WebSocket. With the
//! `test-util` feature, `memory_socket` produces a channel-backed pair whose
//! far end is a `MemoryPeer`.

use async_trait::async_trait;
use bytes::Bytes;

use parley_core::error::Result;

/// One message on a speech socket.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// Outgoing half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the socket. Further sends fail.
    async fn close(&mut self) -> Result<()>;
}

/// Incoming half of a socket.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next frame; `None` once the peer has closed the socket.
    async fn recv(&mut self) -> Option<Result<Frame>>;
}

/// Both halves of an open socket.
pub struct SocketPair {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens sockets to one speech backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<SocketPair>;

    /// Backend name, for logging.
    fn name(&self) -> &str;
}

// ─────────────────────────────────────────────
// In-memory sockets
// ─────────────────────────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub use memory::{memory_socket, MemoryConnector, MemoryPeer};

/// Channel-backed sockets for tests; compiled only with `test-util`.
#[cfg(any(test, feature = "test-util"))]
mod memory {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    use parley_core::error::{GatewayError, Result};

    use super::{Connector, Frame, FrameSink, FrameSource, SocketPair};

    /// The far end of an in-memory socket.
    pub struct MemoryPeer {
        /// Frames the local side sent, in order.
        pub sent: mpsc::Receiver<Frame>,
        /// Frames (or errors) delivered to the local side. Dropping it closes
        /// the local source.
        pub incoming: mpsc::Sender<Result<Frame>>,
        closed: Arc<AtomicBool>,
    }

    impl MemoryPeer {
        /// Whether the local side has closed its sink.
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// Drain every frame the local side has sent so far.
        pub fn take_sent(&mut self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.sent.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    struct MemorySink {
        tx: Option<mpsc::Sender<Frame>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, frame: Frame) -> Result<()> {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| GatewayError::Resource("socket closed".into()))?;
            tx.send(frame)
                .await
                .map_err(|_| GatewayError::Resource("socket closed by peer".into()))
        }

        async fn close(&mut self) -> Result<()> {
            self.tx = None;
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MemorySource {
        rx: mpsc::Receiver<Result<Frame>>,
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn recv(&mut self) -> Option<Result<Frame>> {
            self.rx.recv().await
        }
    }

    /// A connected in-memory socket with bounded queues in both directions.
    pub fn memory_socket(capacity: usize) -> (SocketPair, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let closed = Arc::new(AtomicBool::new(false));

        let pair = SocketPair {
            sink: Box::new(MemorySink {
                tx: Some(out_tx),
                closed: closed.clone(),
            }),
            source: Box::new(MemorySource { rx: in_rx }),
        };
        let peer = MemoryPeer {
            sent: out_rx,
            incoming: in_tx,
            closed,
        };
        (pair, peer)
    }

    /// Connector handing out prepared in-memory sockets (or failures) in order.
    #[derive(Default)]
    pub struct MemoryConnector {
        queue: Mutex<VecDeque<Result<SocketPair>>>,
    }

    impl MemoryConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a socket and return its far end.
        pub async fn push_socket(&self, capacity: usize) -> MemoryPeer {
            let (pair, peer) = memory_socket(capacity);
            self.queue.lock().await.push_back(Ok(pair));
            peer
        }

        /// Queue a connection failure.
        pub async fn push_failure(&self, message: &str) {
            self.queue
                .lock()
                .await
                .push_back(Err(GatewayError::Resource(message.to_string())));
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<SocketPair> {
            self.queue
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Resource("no socket available".into())))
        }

        fn name(&self) -> &str {
            "memory"
        }
    }
}
