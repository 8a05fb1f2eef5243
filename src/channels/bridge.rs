//! HTTP bridge channel.
//!
//! Talks to the Node session bridge that owns the actual messaging-client
//! automation. The bridge exposes a small camelCase REST surface: a status
//! probe, JSON text sends, multipart voice sends, and a history read.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::channels::{HistorySource, MessageChannel, SendReceipt, VoiceSender};
use crate::error::ChannelError;
use crate::store::ExternalMessage;

pub struct BridgeChannel {
    base_url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

impl BridgeChannel {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl MessageChannel for BridgeChannel {
    fn name(&self) -> &str {
        "bridge"
    }

    /// Probe the bridge status endpoint. Any transport or decode failure
    /// reads as not-ready; the caller skips the cycle rather than erroring.
    async fn is_ready(&self) -> bool {
        let response = self
            .authorized(self.client.get(self.api_url("status")))
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => response
                .json::<StatusResponse>()
                .await
                .map(|status| status.ready)
                .unwrap_or(false),
            Ok(response) => {
                debug!(status = %response.status(), "bridge status probe failed");
                false
            }
            Err(error) => {
                debug!(%error, "bridge unreachable");
                false
            }
        }
    }

    async fn send_text(&self, contact: &str, text: &str) -> Result<SendReceipt, ChannelError> {
        let body = serde_json::json!({
            "contact": contact,
            "text": text,
        });

        let response = self
            .authorized(self.client.post(self.api_url("send-text")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "bridge".into(),
                reason: format!("send-text returned {status}: {detail}"),
            });
        }

        let receipt: SendResponse =
            response
                .json()
                .await
                .map_err(|e| ChannelError::InvalidResponse {
                    name: "bridge".into(),
                    reason: e.to_string(),
                })?;
        Ok(SendReceipt {
            external_id: receipt.id,
        })
    }

    fn voice(&self) -> Option<&dyn VoiceSender> {
        Some(self)
    }

    fn history(&self) -> Option<&dyn HistorySource> {
        Some(self)
    }
}

#[async_trait]
impl VoiceSender for BridgeChannel {
    async fn send_voice(
        &self,
        contact: &str,
        audio_path: &Path,
    ) -> Result<SendReceipt, ChannelError> {
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("voice.mp3");

        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "bridge".into(),
                reason: format!("cannot read audio artifact {}: {e}", audio_path.display()),
            })?;
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new()
            .text("contact", contact.to_string())
            .part("audio", part);

        let response = self
            .authorized(self.client.post(self.api_url("send-voice")))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "bridge".into(),
                reason: format!("send-voice returned {status}: {detail}"),
            });
        }

        let receipt: SendResponse =
            response
                .json()
                .await
                .map_err(|e| ChannelError::InvalidResponse {
                    name: "bridge".into(),
                    reason: e.to_string(),
                })?;
        Ok(SendReceipt {
            external_id: receipt.id,
        })
    }
}

#[async_trait]
impl HistorySource for BridgeChannel {
    async fn fetch_recent(
        &self,
        contact: &str,
        limit: usize,
    ) -> Result<Vec<ExternalMessage>, ChannelError> {
        let response = self
            .authorized(self.client.get(self.api_url("messages")))
            .query(&[("contact", contact), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::FetchFailed {
                name: "bridge".into(),
                reason: format!("messages returned {status}: {detail}"),
            });
        }

        response
            .json::<Vec<ExternalMessage>>()
            .await
            .map_err(|e| ChannelError::InvalidResponse {
                name: "bridge".into(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let channel = BridgeChannel::new("http://localhost:3000///", None);
        assert_eq!(channel.api_url("status"), "http://localhost:3000/status");
    }

    #[test]
    fn history_payload_decodes_bridge_shape() {
        let raw = r#"[
            { "id": "w-1", "body": "hola", "fromMe": false, "timestamp": 1700000000, "kind": "chat" },
            { "id": "w-2", "body": "", "fromMe": true, "timestamp": 1700000060, "kind": "ptt" }
        ]"#;
        let messages: Vec<ExternalMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].from_me);
        assert!(messages[1].is_voice_kind());
    }

    #[test]
    fn send_response_tolerates_missing_id() {
        let receipt: SendResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(receipt.id, None);
    }
}
