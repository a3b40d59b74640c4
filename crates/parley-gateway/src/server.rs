//! WebSocket accept loop.
//!
//! Each accepted client becomes a [`SessionConnection`] on its own task, with
//! a child of the server's shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_voice::ws_socket;

use crate::connection::SessionConnection;
use crate::context::GatewayContext;

/// Accept clients on `listener` until `shutdown` is cancelled, then wait for
/// open connections to finish their teardown.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<GatewayContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "Gateway listening");

    let mut connections = JoinSet::new();
    let mut next_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        // Reap finished connection tasks.
        while connections.try_join_next().is_some() {}

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        next_id += 1;
        connections.spawn(handle_client(
            next_id,
            stream,
            peer,
            ctx.clone(),
            shutdown.child_token(),
        ));
    }

    info!(open = connections.len(), "Gateway shutting down");
    while connections.join_next().await.is_some() {}
    info!("Gateway stopped");
    Ok(())
}

async fn handle_client(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<GatewayContext>,
    cancel: CancellationToken,
) {
    let handshake = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(connection = id, peer = %peer, "Shutdown before WebSocket handshake");
            return;
        }
        handshake = tokio_tungstenite::accept_async(stream) => handshake,
    };
    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!(connection = id, peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    info!(connection = id, peer = %peer, "Client connected");

    let mut connection = SessionConnection::new(id, ctx, ws_socket(ws), cancel);
    if let Err(e) = connection.open().await {
        debug!(connection = id, error = %e, "Connection not opened");
        return;
    }
    connection.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use parley_core::config::schema::ChatConfig;
    use parley_core::store::MemoryStore;
    use parley_providers::ProviderRegistry;
    use parley_voice::VoiceBackends;
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message;

    fn context() -> Arc<GatewayContext> {
        Arc::new(GatewayContext {
            registry: Arc::new(ProviderRegistry::default()),
            store: Arc::new(MemoryStore::new()),
            chat: ChatConfig::default(),
            voice: VoiceBackends::disabled(),
            teardown_timeout: Duration::from_secs(1),
            client_queue: 16,
        })
    }

    async fn next_json<S>(ws: &mut S) -> Value
    where
        S: futures_util::Stream<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_serve_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, context(), shutdown.clone()));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await, json!({"status": "ready"}));

        ws.send(Message::text(r#"{"type":"heartbeat"}"#)).await.unwrap();
        assert_eq!(next_json(&mut ws).await, json!({"type": "heartbeat"}));

        ws.send(Message::text(r#"{"message":"hello"}"#)).await.unwrap();
        assert_eq!(
            next_json(&mut ws).await,
            json!({"error": "No active provider configured"})
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_pending_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, context(), shutdown.clone()));

        // Connected at the TCP level but never sends the upgrade request.
        let _silent = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
