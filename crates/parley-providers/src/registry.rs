//! Provider registry — the strategy table and active-provider selection.
//!
//! The registry is built once from the configured provider entries and
//! passed explicitly to whoever needs a model. Every entry is validated on
//! construction, so missing vendor settings fail at load time rather than
//! on the first request.

use std::sync::Arc;

use tracing::debug;

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::{GatewayError, Result};

use crate::anthropic::AnthropicStrategy;
use crate::azure::AzureOpenAiStrategy;
use crate::cohere::CohereStrategy;
use crate::google::GoogleStrategy;
use crate::huggingface::HuggingFaceStrategy;
use crate::openai::OpenAiStrategy;
use crate::traits::ProviderStrategy;

// ─────────────────────────────────────────────
// Strategy table
// ─────────────────────────────────────────────

/// The strategy implementing a vendor kind.
pub fn strategy_for(kind: ProviderKind) -> Arc<dyn ProviderStrategy> {
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiStrategy),
        ProviderKind::Anthropic => Arc::new(AnthropicStrategy),
        ProviderKind::Cohere => Arc::new(CohereStrategy),
        ProviderKind::HuggingFace => Arc::new(HuggingFaceStrategy),
        ProviderKind::AzureOpenAi => Arc::new(AzureOpenAiStrategy),
        ProviderKind::Google => Arc::new(GoogleStrategy),
    }
}

// ─────────────────────────────────────────────
// Bound provider
// ─────────────────────────────────────────────

/// A provider entry together with the strategy that serves it.
#[derive(Clone)]
pub struct BoundProvider {
    pub config: ProviderConfig,
    pub strategy: Arc<dyn ProviderStrategy>,
}

impl std::fmt::Debug for BoundProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundProvider")
            .field("id", &self.config.id)
            .field("kind", &self.strategy.kind())
            .finish()
    }
}

// ─────────────────────────────────────────────
// ProviderRegistry
// ─────────────────────────────────────────────

/// Validated provider entries plus active-provider lookup.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    /// Validate and register provider entries.
    ///
    /// Fails on the first invalid entry or on a duplicate id.
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self> {
        for (i, provider) in providers.iter().enumerate() {
            provider.validate()?;
            if providers[..i].iter().any(|p| p.id == provider.id) {
                return Err(GatewayError::Configuration(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }
        debug!(count = providers.len(), "Provider registry loaded");
        Ok(ProviderRegistry { providers })
    }

    /// All registered entries, in config order.
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Look up an entry by id, active or not.
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// The effective active provider: highest priority among active entries,
    /// ties broken by id order.
    pub fn active(&self) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| p.is_active)
            .min_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)))
    }

    /// Strategy for a requested provider, which must be the active one.
    ///
    /// `requested` may be the active entry's id or its vendor kind.
    pub fn resolve(&self, requested: &str) -> Result<Arc<dyn ProviderStrategy>> {
        let active = self
            .active()
            .ok_or_else(|| GatewayError::Configuration("No active provider configured".into()))?;

        if active.id != requested && active.kind.as_str() != requested {
            return Err(GatewayError::Mismatch {
                requested: requested.to_string(),
                active: active.kind.to_string(),
            });
        }
        Ok(strategy_for(active.kind))
    }

    /// Bind the provider for a session.
    ///
    /// - `None` → the active provider.
    /// - the id of an active entry → that entry (explicit override).
    /// - a vendor kind → the active provider, if it is of that kind.
    pub fn bind(&self, provider_id: Option<&str>) -> Result<BoundProvider> {
        let Some(requested) = provider_id else {
            let active = self
                .active()
                .ok_or_else(|| GatewayError::Configuration("No active provider configured".into()))?;
            return Ok(BoundProvider {
                config: active.clone(),
                strategy: self.resolve(&active.id)?,
            });
        };

        if let Some(entry) = self.get(requested) {
            if !entry.is_active {
                return Err(GatewayError::Configuration(
                    "Invalid or inactive provider_id".into(),
                ));
            }
            return Ok(BoundProvider {
                config: entry.clone(),
                strategy: strategy_for(entry.kind),
            });
        }

        if ProviderKind::parse(requested).is_some() {
            let strategy = self.resolve(requested)?;
            let config = self
                .active()
                .cloned()
                .ok_or_else(|| GatewayError::Configuration("No active provider configured".into()))?;
            return Ok(BoundProvider { config, strategy });
        }

        Err(GatewayError::Configuration(
            "Invalid or inactive provider_id".into(),
        ))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
