//! Shared gateway state handed to every connection.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use parley_core::config::schema::{ChatConfig, Config};
use parley_core::error::Result;
use parley_core::store::{open_store, ConversationStore};
use parley_providers::ProviderRegistry;
use parley_voice::VoiceBackends;

/// Everything a [`SessionConnection`](crate::SessionConnection) needs from
/// the process: providers, storage, speech backends and limits.
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<dyn ConversationStore>,
    pub chat: ChatConfig,
    pub voice: VoiceBackends,
    /// Per-task join timeout during teardown.
    pub teardown_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub client_queue: usize,
}

impl GatewayContext {
    /// Build the context from a loaded config.
    ///
    /// Provider entries are validated here, so a missing vendor setting
    /// fails at startup.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::new(config.providers.clone())?;
        let store = open_store(&config.storage).await?;
        let voice = VoiceBackends::from_config(&config.voice)?;

        match registry.active() {
            Some(active) => info!(provider = %active.id, model = %active.model_name, "Active provider"),
            None => info!("No active provider configured"),
        }

        Ok(Self {
            registry: Arc::new(registry),
            store,
            chat: config.chat.clone(),
            voice,
            teardown_timeout: Duration::from_millis(config.gateway.teardown_timeout_ms),
            client_queue: config.gateway.client_queue.max(1),
        })
    }
}
