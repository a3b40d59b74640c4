//! Session connection — the per-client lifecycle state machine.
//!
//! ```text
//! Connecting ──ok──▶ Ready ──disconnect / stop / fault──▶ Closing ──▶ Closed
//!     │                                                               ▲
//!     └──────────────────────── setup failure ───────────────────────┘
//! ```
//!
//! The connection owns the client socket's read half, the relays and the
//! exchange tasks. Every task watches one cancellation token; teardown
//! cancels it and joins each task with a timeout, aborting stragglers.
//! Whatever triggered the teardown, the same resources are released in the
//! same order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_chat::{ChatSession, ExchangeOptions, SessionPhase};
use parley_core::error::{GatewayError, Result};
use parley_core::protocol::{ChatRequest, ClientControl, ClientEvent};
use parley_voice::playback::open_output;
use parley_voice::socket::{Frame, FrameSink, FrameSource, SocketPair};
use parley_voice::tasks::{join_all, send_event, NamedTask};
use parley_voice::{SynthesisHandle, SynthesisRelay, TranscriptionRelay};

use crate::context::GatewayContext;

/// Lifecycle state of a [`SessionConnection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────
// SessionConnection
// ─────────────────────────────────────────────

pub struct SessionConnection {
    id: u64,
    ctx: Arc<GatewayContext>,
    state: ConnectionState,
    cancel: CancellationToken,
    source: Option<Box<dyn FrameSource>>,
    client: Option<mpsc::Sender<ClientEvent>>,
    writer: Option<NamedTask>,
    chat: Option<Arc<ChatSession>>,
    transcription: Option<TranscriptionRelay>,
    synthesis: Option<SynthesisRelay>,
    exchanges: Vec<NamedTask>,
}

impl SessionConnection {
    /// Wrap an accepted client socket. The outbound writer starts at once so
    /// setup errors can still reach the client.
    pub fn new(
        id: u64,
        ctx: Arc<GatewayContext>,
        socket: SocketPair,
        cancel: CancellationToken,
    ) -> Self {
        let SocketPair { sink, source } = socket;
        let (client_tx, client_rx) = mpsc::channel(ctx.client_queue);
        let writer = NamedTask::spawn("client-writer", writer_loop(sink, client_rx, cancel.clone()));

        Self {
            id,
            ctx,
            state: ConnectionState::Connecting,
            cancel,
            source: Some(source),
            client: Some(client_tx),
            writer: Some(writer),
            chat: None,
            transcription: None,
            synthesis: None,
            exchanges: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Token that stops this connection when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&mut self, next: ConnectionState) {
        debug!(connection = self.id, from = %self.state, to = %next, "Connection state");
        self.state = next;
    }

    // ────────────── Connecting ──────────────

    /// Open the configured speech sockets and report ready.
    ///
    /// On failure everything already opened is released, the client gets an
    /// error frame and the connection ends up Closed.
    pub async fn open(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connecting {
            return Err(GatewayError::Protocol(format!(
                "connection is {}, not connecting",
                self.state
            )));
        }

        match self.acquire().await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                self.emit(ClientEvent::Ready).await;
                info!(
                    connection = self.id,
                    transcription = self.transcription.is_some(),
                    synthesis = self.synthesis.is_some(),
                    "Connection ready"
                );
                Ok(())
            }
            Err(e) => {
                error!(connection = self.id, error = %e, "Connection setup failed");
                self.emit(ClientEvent::from_error(&e)).await;
                self.close().await;
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<()> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| GatewayError::Resource("client connection closed".into()))?;
        let voice = self.ctx.voice.clone();

        if let Some(connector) = voice.transcription {
            let relay = TranscriptionRelay::start(connector.as_ref(), client.clone(), &self.cancel).await?;
            self.transcription = Some(relay);
        }

        if let Some(connector) = voice.synthesis {
            let output = open_output(&voice.synthesis_config, client.clone()).await?;
            let relay = SynthesisRelay::start(
                connector.as_ref(),
                output,
                voice.synthesis_config.playback_queue,
                client,
                &self.cancel,
            )
            .await?;
            self.synthesis = Some(relay);
        }

        Ok(())
    }

    // ────────────── Ready ──────────────

    /// Serve the client until it disconnects, stops, or a fatal error
    /// cancels the connection; then tear down.
    pub async fn run(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let cancel = self.cancel.clone();

        if self.state == ConnectionState::Ready {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(connection = self.id, "Connection cancelled");
                        break;
                    }
                    frame = source.recv() => frame,
                };

                match frame {
                    Some(Ok(Frame::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Frame::Binary(audio))) => self.handle_audio(audio).await,
                    Some(Err(e)) => {
                        warn!(connection = self.id, error = %e, "Client read failed");
                        break;
                    }
                    None => {
                        info!(connection = self.id, "Client disconnected");
                        break;
                    }
                }
            }
        }

        drop(source);
        self.close().await;
    }

    async fn handle_text(&mut self, text: &str) {
        let control = match ClientControl::parse(text) {
            Ok(control) => control,
            Err(e) => {
                debug!(connection = self.id, error = %e, "Rejected client frame");
                self.emit(ClientEvent::from_error(&e)).await;
                return;
            }
        };

        match control {
            ClientControl::Heartbeat => self.emit(ClientEvent::Heartbeat).await,
            ClientControl::Stop => {
                info!(connection = self.id, "Stop requested by client");
                self.cancel.cancel();
            }
            ClientControl::Speak { text } => self.handle_speak(&text).await,
            ClientControl::Chat(request) => self.start_exchange(request).await,
        }
    }

    async fn handle_audio(&mut self, audio: Bytes) {
        let Some(handle) = self.transcription.as_ref().map(TranscriptionRelay::handle) else {
            warn!(
                connection = self.id,
                bytes = audio.len(),
                "Audio received but transcription is disabled"
            );
            return;
        };
        if let Err(e) = handle.send_audio(audio).await {
            warn!(connection = self.id, error = %e, "Audio not forwarded");
        }
    }

    async fn handle_speak(&mut self, text: &str) {
        let Some(handle) = self.synthesis.as_ref().map(SynthesisRelay::handle) else {
            self.emit(ClientEvent::Error("Speech synthesis is not enabled".into()))
                .await;
            return;
        };
        if let Err(e) = handle.speak(text).await {
            warn!(connection = self.id, error = %e, "Speak request dropped");
            self.emit(ClientEvent::from_error(&e)).await;
        }
    }

    async fn start_exchange(&mut self, request: ChatRequest) {
        self.exchanges.retain(|task| !task.handle.is_finished());

        let chat = match self.chat_session().await {
            Ok(chat) => chat,
            Err(e) => {
                self.emit(ClientEvent::from_error(&e)).await;
                return;
            }
        };
        if chat.phase() == SessionPhase::Streaming {
            let e = GatewayError::Protocol("A chat exchange is already in progress".into());
            self.emit(ClientEvent::from_error(&e)).await;
            return;
        }

        let Some(client) = self.client.clone() else {
            return;
        };
        let speech = if request.enable_tts {
            let handle = self.synthesis.as_ref().map(SynthesisRelay::handle);
            if handle.is_none() {
                warn!(connection = self.id, "TTS requested but synthesis is disabled");
            }
            handle
        } else {
            None
        };

        let task = NamedTask::spawn(
            "chat-exchange",
            run_exchange(chat, request, client, speech, self.cancel.clone()),
        );
        self.exchanges.push(task);
    }

    /// The connection's chat session, created on first use.
    async fn chat_session(&mut self) -> Result<Arc<ChatSession>> {
        if let Some(chat) = &self.chat {
            return Ok(chat.clone());
        }
        let chat = Arc::new(ChatSession::new(
            self.ctx.registry.clone(),
            self.ctx.store.clone(),
            &self.ctx.chat,
        )?);
        self.chat = Some(chat.clone());
        Ok(chat)
    }

    /// Queue an event for the client. The returned future owns what it
    /// needs, so the connection is not borrowed while it waits.
    fn emit(&self, event: ClientEvent) -> impl Future<Output = ()> + Send + 'static {
        let client = self.client.clone();
        let cancel = self.cancel.clone();
        let id = self.id;
        async move {
            if let Some(client) = client {
                if !send_event(&client, event, &cancel).await {
                    debug!(connection = id, "Client event dropped");
                }
            }
        }
    }

    // ────────────── Closing ──────────────

    /// Tear the connection down. A no-op once Closed.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state != ConnectionState::Connecting {
            self.set_state(ConnectionState::Closing);
        }

        let timeout = self.ctx.teardown_timeout;
        self.cancel.cancel();

        join_all(std::mem::take(&mut self.exchanges), timeout).await;
        if let Some(relay) = self.transcription.take() {
            relay.shutdown(timeout).await;
        }
        if let Some(relay) = self.synthesis.take() {
            relay.shutdown(timeout).await;
        }
        self.source = None;
        self.chat = None;

        // Last sender gone: the writer drains what is queued and closes the socket.
        self.client = None;
        if let Some(writer) = self.writer.take() {
            writer.join(timeout).await;
        }

        self.set_state(ConnectionState::Closed);
        info!(connection = self.id, "Connection closed");
    }
}

// ─────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────

/// Serialize client events onto the socket until every sender is gone.
///
/// A failed send is fatal for the connection.
async fn writer_loop(
    mut sink: Box<dyn FrameSink>,
    mut events: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        let frame = match event {
            ClientEvent::Audio(audio) => Frame::Binary(audio),
            other => match other.to_json() {
                Some(value) => Frame::Text(value.to_string()),
                None => continue,
            },
        };
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "Client send failed");
            cancel.cancel();
            break;
        }
    }
    events.close();
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Client socket close failed");
    }
}

/// Run one chat exchange and stream its events to the client.
///
/// The provider is bound inside the exchange, so the echoed provider is the
/// one that produced the reply. Cancellation at any point abandons the
/// reply: no completion event, no speech flush and no logged turn.
async fn run_exchange(
    chat: Arc<ChatSession>,
    request: ChatRequest,
    client: mpsc::Sender<ClientEvent>,
    speech: Option<SynthesisHandle>,
    cancel: CancellationToken,
) {
    let options = ExchangeOptions {
        conversation_id: request.conversation_id,
        system_prompt: request.system_prompt.as_deref(),
        provider_id: request.provider_id.as_deref(),
        use_tools: request.use_tools,
    };

    if !request.stream {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = chat.send_message(&request.message, options) => result,
        };
        match result {
            Ok(reply) => {
                if let Some(speech) = &speech {
                    if let Err(e) = speech.speak(&reply.reply).await {
                        warn!(error = %e, "Reply not spoken");
                    }
                }
                let event = ClientEvent::ChatReply {
                    provider: reply.provider,
                    conversation_id: reply.conversation_id,
                    reply: reply.reply,
                    usage: reply.usage,
                };
                send_event(&client, event, &cancel).await;
            }
            Err(e) => {
                send_event(&client, ClientEvent::from_error(&e), &cancel).await;
            }
        }
        return;
    }

    let started = tokio::select! {
        _ = cancel.cancelled() => return,
        started = chat.stream_message(&request.message, options) => started,
    };
    let mut reply = match started {
        Ok(reply) => reply,
        Err(e) => {
            send_event(&client, ClientEvent::from_error(&e), &cancel).await;
            return;
        }
    };
    debug!(
        conversation_id = reply.conversation_id,
        provider = %reply.provider.id,
        "Streaming reply"
    );

    loop {
        let fragment = tokio::select! {
            _ = cancel.cancelled() => return,
            fragment = reply.fragments.next() => fragment,
        };
        let Some(fragment) = fragment else {
            break;
        };
        if let Some(speech) = &speech {
            if let Err(e) = speech.push(fragment.as_str()).await {
                warn!(error = %e, "Fragment not spoken");
            }
        }
        if !send_event(&client, ClientEvent::ChatChunk(fragment), &cancel).await {
            return;
        }
    }

    send_event(&client, ClientEvent::ChatComplete, &cancel).await;
    if let Some(speech) = &speech {
        if let Err(e) = speech.end().await {
            warn!(error = %e, "Speech flush dropped");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_core::config::schema::{ChatConfig, ProviderConfig, ProviderKind, SynthesisConfig};
    use parley_core::store::{ConversationStore, MemoryStore};
    use parley_providers::ProviderRegistry;
    use parley_voice::socket::{memory_socket, Connector, MemoryConnector, MemoryPeer};
    use parley_voice::VoiceBackends;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn context(providers: Vec<ProviderConfig>, voice: VoiceBackends) -> Arc<GatewayContext> {
        Arc::new(GatewayContext {
            registry: Arc::new(ProviderRegistry::new(providers).unwrap()),
            store: Arc::new(MemoryStore::new()),
            chat: ChatConfig::default(),
            voice,
            teardown_timeout: TIMEOUT,
            client_queue: 32,
        })
    }

    fn openai(api_base: &str) -> ProviderConfig {
        named_openai("main", "Main", api_base)
    }

    fn named_openai(id: &str, name: &str, api_base: &str) -> ProviderConfig {
        let mut config = ProviderConfig {
            id: id.into(),
            name: name.into(),
            kind: ProviderKind::OpenAi,
            model_name: "gpt-4o-mini".into(),
            api_key: "sk-test".into(),
            ..Default::default()
        };
        config
            .extra_settings
            .insert("api_base".into(), json!(api_base));
        config
    }

    fn connection(ctx: Arc<GatewayContext>) -> (SessionConnection, MemoryPeer) {
        let (socket, peer) = memory_socket(32);
        (SessionConnection::new(1, ctx, socket, CancellationToken::new()), peer)
    }

    async fn next_json(peer: &mut MemoryPeer) -> Value {
        match tokio::time::timeout(TIMEOUT, peer.sent.recv()).await {
            Ok(Some(Frame::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn send_text(peer: &MemoryPeer, value: Value) {
        peer.incoming
            .send(Ok(Frame::Text(value.to_string())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_without_voice_reports_ready() {
        let (mut conn, mut client) = connection(context(vec![], VoiceBackends::disabled()));
        conn.open().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(next_json(&mut client).await, json!({"status": "ready"}));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_partial_setup_failure_releases_first_socket() {
        let listen = Arc::new(MemoryConnector::new());
        let mut listen_peer = listen.push_socket(8).await;
        let speak = Arc::new(MemoryConnector::new());
        speak.push_failure("synthesis connection failed: refused").await;

        let voice = VoiceBackends {
            transcription: Some(listen as Arc<dyn Connector>),
            synthesis: Some(speak as Arc<dyn Connector>),
            synthesis_config: SynthesisConfig::default(),
        };
        let (mut conn, mut client) = connection(context(vec![], voice));

        assert!(conn.open().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(listen_peer.is_closed());
        assert!(listen_peer
            .take_sent()
            .contains(&Frame::Text(r#"{"type":"CloseStream"}"#.into())));
        assert_eq!(
            next_json(&mut client).await,
            json!({"error": "synthesis connection failed: refused"})
        );
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_connection_futures_are_send() {
        fn assert_send<T: Send>(_: T) {}
        let (mut conn, _client) = connection(context(vec![], VoiceBackends::disabled()));
        assert_send(conn.open());
        assert_send(conn.handle_text(r#"{"type":"heartbeat"}"#));
        assert_send(conn.run());
        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let (mut conn, client) = connection(context(vec![], VoiceBackends::disabled()));
        conn.open().await.unwrap();
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(client.is_closed());

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.open().await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_errors_and_stop() {
        let (mut conn, mut client) = connection(context(vec![], VoiceBackends::disabled()));
        conn.open().await.unwrap();
        next_json(&mut client).await;

        send_text(&client, json!({"type": "heartbeat"})).await;
        client
            .incoming
            .send(Ok(Frame::Text("{not json".into())))
            .await
            .unwrap();
        send_text(&client, json!({"message": ""})).await;
        send_text(&client, json!({"message": "hi"})).await;
        send_text(&client, json!({"type": "stop"})).await;

        conn.run().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert_eq!(next_json(&mut client).await, json!({"type": "heartbeat"}));
        assert_eq!(next_json(&mut client).await, json!({"error": "Invalid JSON format"}));
        assert_eq!(next_json(&mut client).await, json!({"error": "Message is required"}));
        assert_eq!(
            next_json(&mut client).await,
            json!({"error": "No active provider configured"})
        );
    }

    #[tokio::test]
    async fn test_client_disconnect_closes_connection() {
        let (mut conn, client) = connection(context(vec![], VoiceBackends::disabled()));
        conn.open().await.unwrap();
        drop(client);

        tokio::time::timeout(TIMEOUT, conn.run()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_transcription_fault_closes_connection() {
        let listen = Arc::new(MemoryConnector::new());
        let listen_peer = listen.push_socket(8).await;
        let voice = VoiceBackends {
            transcription: Some(listen as Arc<dyn Connector>),
            ..Default::default()
        };
        let (mut conn, mut client) = connection(context(vec![], voice));
        conn.open().await.unwrap();
        next_json(&mut client).await;

        drop(listen_peer);
        tokio::time::timeout(TIMEOUT, conn.run()).await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            next_json(&mut client).await,
            json!({"error": "transcription connection lost"})
        );
    }

    #[tokio::test]
    async fn test_audio_forwarded_to_transcription() {
        let listen = Arc::new(MemoryConnector::new());
        let mut listen_peer = listen.push_socket(8).await;
        let voice = VoiceBackends {
            transcription: Some(listen as Arc<dyn Connector>),
            ..Default::default()
        };
        let (mut conn, client) = connection(context(vec![], voice));
        conn.open().await.unwrap();

        conn.handle_audio(Bytes::from_static(b"pcm")).await;
        assert_eq!(
            listen_peer.sent.recv().await,
            Some(Frame::Binary(Bytes::from_static(b"pcm")))
        );
        drop(client);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_non_streaming_chat_reply() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            })))
            .mount(&mock_server)
            .await;

        let ctx = context(vec![openai(&mock_server.uri())], VoiceBackends::disabled());
        let (mut conn, mut client) = connection(ctx.clone());
        conn.open().await.unwrap();
        next_json(&mut client).await;

        conn.handle_text(&json!({"message": "Hi", "stream": false}).to_string())
            .await;
        let reply = next_json(&mut client).await;
        assert_eq!(reply["type"], "chat.message");
        assert_eq!(reply["reply"], "Hello!");
        assert_eq!(reply["conversation_id"], 1);
        assert_eq!(reply["provider"], json!({"id": "main", "name": "Main", "model": "gpt-4o-mini"}));
        assert_eq!(reply["usage"]["total_tokens"], 7);

        conn.close().await;
        let turns = ctx.store.list_turns(1).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].ai_response, "Hello!");
    }

    async fn reply_server(content: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_back_to_back_requests_report_their_own_provider() {
        let main = reply_server("from main").await;
        let backup = reply_server("from backup").await;
        let mut backup_config = named_openai("backup", "Backup", &backup.uri());
        backup_config.priority = -1;
        let ctx = context(
            vec![openai(&main.uri()), backup_config],
            VoiceBackends::disabled(),
        );
        let (mut conn, mut client) = connection(ctx);
        conn.open().await.unwrap();
        next_json(&mut client).await;

        conn.handle_text(&json!({"message": "one", "stream": false, "provider_id": "main"}).to_string())
            .await;
        conn.handle_text(&json!({"message": "two", "stream": false, "provider_id": "backup"}).to_string())
            .await;

        let mut replies = 0;
        let mut events = 0;
        while events < 2 {
            let event = next_json(&mut client).await;
            events += 1;
            if event["type"] == "chat.message" {
                let expected = format!("from {}", event["provider"]["id"].as_str().unwrap());
                assert_eq!(event["reply"], expected.as_str());
                replies += 1;
            } else {
                assert_eq!(event, json!({"error": "A chat exchange is already in progress"}));
            }
        }
        assert!(replies >= 1);

        conn.handle_text(&json!({"message": "three", "stream": false, "provider_id": "backup"}).to_string())
            .await;
        let event = next_json(&mut client).await;
        assert_eq!(event["provider"]["id"], "backup");
        assert_eq!(event["reply"], "from backup");
        conn.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_stream_logs_no_turn() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&mock_server)
            .await;

        let ctx = context(vec![openai(&mock_server.uri())], VoiceBackends::disabled());
        let (mut conn, mut client) = connection(ctx.clone());
        conn.open().await.unwrap();
        next_json(&mut client).await;

        conn.handle_text(&json!({"message": "Hi"}).to_string()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        conn.close().await;
        assert!(started.elapsed() < TIMEOUT);

        while let Some(frame) = client.sent.recv().await {
            if let Frame::Text(text) = frame {
                let event: Value = serde_json::from_str(&text).unwrap();
                assert_ne!(event["type"], "chat.complete");
                assert_ne!(event["type"], "chat.message");
            }
        }
        assert!(ctx.store.list_turns(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streaming_chat_with_speech() {
        let mock_server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" Bye\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let speak = Arc::new(MemoryConnector::new());
        let mut speak_peer = speak.push_socket(16).await;
        let voice = VoiceBackends {
            synthesis: Some(speak as Arc<dyn Connector>),
            ..Default::default()
        };
        let (mut conn, mut client) = connection(context(vec![openai(&mock_server.uri())], voice));
        conn.open().await.unwrap();
        next_json(&mut client).await;

        conn.handle_text(&json!({"message": "Hi", "enable_tts": true}).to_string())
            .await;

        let mut chunks = Vec::new();
        loop {
            let event = next_json(&mut client).await;
            if event["type"] == "chat.complete" {
                break;
            }
            if event["type"] == "chat.message" {
                chunks.push(event["chunk"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(chunks, vec!["Hi", " there.", " Bye"]);

        let mut spoken = Vec::new();
        loop {
            let frame = match tokio::time::timeout(TIMEOUT, speak_peer.sent.recv()).await {
                Ok(Some(Frame::Text(text))) => serde_json::from_str::<Value>(&text).unwrap(),
                other => panic!("unexpected synthesis frame {other:?}"),
            };
            if frame["type"] == "Flush" {
                break;
            }
            spoken.push(frame["text"].as_str().unwrap().to_string());
        }
        assert_eq!(spoken, vec!["Hi there.", "Bye"]);

        conn.close().await;
        assert!(speak_peer.is_closed());
    }
}
