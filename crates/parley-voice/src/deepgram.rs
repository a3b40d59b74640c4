//! Deepgram-compatible listen/speak sockets over `tokio-tungstenite`.

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info};
use url::Url;

use parley_core::config::schema::{SynthesisConfig, TranscriptionConfig};
use parley_core::error::{GatewayError, Result};

use crate::socket::{Connector, SocketPair};
use crate::ws::ws_socket;

/// Opens authenticated WebSocket connections to one Deepgram endpoint.
pub struct DeepgramConnector {
    name: &'static str,
    url: Url,
    api_key: String,
}

impl std::fmt::Debug for DeepgramConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramConnector")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl DeepgramConnector {
    /// Connector for the live transcription (`listen`) socket.
    pub fn listen(config: &TranscriptionConfig, api_key: &str) -> Result<Self> {
        let sample_rate = config.sample_rate.to_string();
        let mut params = vec![
            ("encoding", config.encoding.as_str()),
            ("sample_rate", sample_rate.as_str()),
        ];
        if !config.model.is_empty() {
            params.push(("model", config.model.as_str()));
        }
        if !config.language.is_empty() {
            params.push(("language", config.language.as_str()));
        }
        Ok(Self {
            name: "transcription",
            url: endpoint(&config.url, &params)?,
            api_key: api_key.to_string(),
        })
    }

    /// Connector for the text-to-speech (`speak`) socket.
    pub fn speak(config: &SynthesisConfig, api_key: &str) -> Result<Self> {
        let sample_rate = config.sample_rate.to_string();
        let mut params = vec![
            ("encoding", config.encoding.as_str()),
            ("sample_rate", sample_rate.as_str()),
        ];
        if !config.model.is_empty() {
            params.push(("model", config.model.as_str()));
        }
        Ok(Self {
            name: "synthesis",
            url: endpoint(&config.url, &params)?,
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn endpoint(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    Url::parse_with_params(base, params)
        .map_err(|e| GatewayError::Configuration(format!("invalid speech URL '{base}': {e}")))
}

#[async_trait]
impl Connector for DeepgramConnector {
    async fn connect(&self) -> Result<SocketPair> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::Configuration(format!("build ws request: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| GatewayError::Configuration(format!("invalid speech API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        debug!(backend = self.name, url = %self.url, "Connecting to speech backend");
        let (ws, _) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            GatewayError::Resource(format!("{} connection failed: {e}", self.name))
        })?;
        info!(backend = self.name, "Connected to speech backend");
        Ok(ws_socket(ws))
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_url_params() {
        let config = TranscriptionConfig {
            model: "nova-2".into(),
            ..Default::default()
        };
        let connector = DeepgramConnector::listen(&config, "dg-key").unwrap();
        assert_eq!(
            connector.url().as_str(),
            "wss://api.deepgram.com/v1/listen?encoding=linear16&sample_rate=16000&model=nova-2"
        );
        assert_eq!(connector.name(), "transcription");
    }

    #[test]
    fn test_speak_url_params() {
        let connector = DeepgramConnector::speak(&SynthesisConfig::default(), "dg-key").unwrap();
        assert_eq!(
            connector.url().as_str(),
            "wss://api.deepgram.com/v1/speak?encoding=linear16&sample_rate=48000&model=aura-2-thalia-en"
        );
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let config = TranscriptionConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        let err = DeepgramConnector::listen(&config, "k").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
