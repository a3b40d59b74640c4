//! Speech backends configured for the gateway.

use std::sync::Arc;

use tracing::{info, warn};

use parley_core::config::schema::{SynthesisConfig, VoiceConfig};
use parley_core::error::Result;

use crate::deepgram::DeepgramConnector;
use crate::socket::Connector;

/// Connectors for the relays a connection should open. `None` = disabled.
#[derive(Clone, Default)]
pub struct VoiceBackends {
    pub transcription: Option<Arc<dyn Connector>>,
    pub synthesis: Option<Arc<dyn Connector>>,
    /// Output and queue settings for synthesized audio.
    pub synthesis_config: SynthesisConfig,
}

impl VoiceBackends {
    /// Build Deepgram connectors from the voice config.
    ///
    /// Both relays are disabled when no API key is configured.
    pub fn from_config(config: &VoiceConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            if config.transcription.enabled || config.synthesis.enabled {
                warn!("No voice API key configured, speech relays disabled");
            }
            return Ok(Self {
                synthesis_config: config.synthesis.clone(),
                ..Default::default()
            });
        }

        let transcription: Option<Arc<dyn Connector>> = if config.transcription.enabled {
            Some(Arc::new(DeepgramConnector::listen(
                &config.transcription,
                &config.api_key,
            )?))
        } else {
            None
        };
        let synthesis: Option<Arc<dyn Connector>> = if config.synthesis.enabled {
            Some(Arc::new(DeepgramConnector::speak(
                &config.synthesis,
                &config.api_key,
            )?))
        } else {
            None
        };

        info!(
            transcription = transcription.is_some(),
            synthesis = synthesis.is_some(),
            "Speech backends configured"
        );
        Ok(Self {
            transcription,
            synthesis,
            synthesis_config: config.synthesis.clone(),
        })
    }

    /// No speech at all.
    pub fn disabled() -> Self {
        Self::default()
    }
}
