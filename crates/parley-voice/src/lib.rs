//! Parley voice — speech relays between a client connection and
//! Deepgram-compatible listen/speak sockets.
//!
//! # Architecture
//!
//! - [`socket`] — frame sink/source traits, connectors, in-memory sockets
//!   (`test-util`)
//! - [`deepgram`] — WebSocket connectors with token auth
//! - [`ws`] — frame adapters over any `tokio-tungstenite` socket
//! - [`transcription::TranscriptionRelay`] — client audio → transcripts
//! - [`synthesis::SynthesisRelay`] — reply fragments → sentence units → audio
//! - [`playback`] — bounded playback queue and audio outputs
//!
//! Every relay task observes a child of the connection's cancellation token
//! and owns its socket half outright.

pub mod accumulator;
pub mod backends;
pub mod deepgram;
pub mod playback;
pub mod socket;
pub mod synthesis;
pub mod tasks;
pub mod transcription;
pub mod ws;

pub use accumulator::SentenceAccumulator;
pub use backends::VoiceBackends;
pub use playback::{open_output, AudioOutput, PlaybackSink};
pub use socket::{Connector, Frame, SocketPair};
#[cfg(any(test, feature = "test-util"))]
pub use socket::{memory_socket, MemoryConnector, MemoryPeer};
pub use synthesis::{SynthesisHandle, SynthesisRelay};
pub use tasks::NamedTask;
pub use transcription::{TranscriptionHandle, TranscriptionRelay};
pub use ws::ws_socket;
