//! WhatsApp Business Cloud API transport.
//!
//! Uses the official WhatsApp Business Platform (Cloud API).
//! Requires: Access Token + Phone Number ID from Meta Business Suite.
//!
//! The Cloud API has no session socket and no group enumeration: the
//! recipient roster is operator-configured, connect() verifies the token
//! against the Graph API, and an HTTP 401 anywhere is treated as a
//! logout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use herald_core::config::TransportConfig;
use herald_core::error::{HeraldError, Result};
use herald_core::traits::Transport;
use herald_core::types::{CloseReason, MessagePayload, Recipient, TransportEvent};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudApiTransport {
    config: TransportConfig,
    client: reqwest::Client,
    events: broadcast::Sender<TransportEvent>,
    /// Configured broadcast targets. The Cloud API cannot list them.
    roster: Vec<Recipient>,
}

impl CloudApiTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config: config.clone(),
            client,
            events,
            roster: Vec::new(),
        }
    }

    pub fn with_recipients(mut self, roster: Vec<Recipient>) -> Self {
        self.roster = roster;
        self
    }

    fn messages_url(&self) -> String {
        format!("{GRAPH_API_BASE}/{}/messages", self.config.phone_number_id)
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.config.access_token)
    }

    /// One Cloud API messages request body. Payloads with media go out
    /// as an image with the text as caption, text-only as plain text.
    fn message_body(to: &str, payload: &MessagePayload) -> serde_json::Value {
        match &payload.media_url {
            Some(media_url) => serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "image",
                "image": {
                    "link": media_url,
                    "caption": payload.text,
                }
            }),
            None => serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": {
                    "preview_url": true,
                    "body": payload.text,
                }
            }),
        }
    }
}

#[async_trait]
impl Transport for CloudApiTransport {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn connect(&self) -> Result<()> {
        if self.config.access_token.is_empty() {
            return Err(HeraldError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(HeraldError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }

        // Verify the token by reading the phone number resource.
        let url = format!("{GRAPH_API_BASE}/{}", self.config.phone_number_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| HeraldError::Transport(format!("WhatsApp verification failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            let _ = self.events.send(TransportEvent::Closed {
                reason: CloseReason::LoggedOut,
            });
            return Err(HeraldError::LoggedOut(format!(
                "access token rejected: {text}"
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HeraldError::Transport(format!(
                "WhatsApp verification error {status}: {text}"
            )));
        }

        tracing::info!(
            "✅ WhatsApp Cloud API: token verified (phone_id={})",
            self.config.phone_number_id
        );
        let _ = self.events.send(TransportEvent::Opened);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _ = self.events.send(TransportEvent::Closed {
            reason: CloseReason::Recoverable("disconnected by operator".into()),
        });
        tracing::info!("🔌 WhatsApp Cloud API: disconnected");
        Ok(())
    }

    async fn send_message(&self, recipient_id: &str, payload: &MessagePayload) -> Result<()> {
        let body = Self::message_body(recipient_id, payload);
        let response = self
            .client
            .post(self.messages_url())
            .header("Authorization", self.authorization())
            .json(&body)
            .send()
            .await
            .map_err(|e| HeraldError::Send {
                recipient: recipient_id.to_string(),
                reason: format!("request failed: {e}"),
                connection_lost: true,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let _ = self.events.send(TransportEvent::Closed {
                reason: CloseReason::LoggedOut,
            });
            return Err(HeraldError::Send {
                recipient: recipient_id.to_string(),
                reason: "access token rejected".into(),
                connection_lost: true,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HeraldError::Send {
                recipient: recipient_id.to_string(),
                reason: format!("API error {status}: {text}"),
                connection_lost: false,
            });
        }

        let result: serde_json::Value = response.json().await.map_err(|e| HeraldError::Send {
            recipient: recipient_id.to_string(),
            reason: format!("invalid response: {e}"),
            connection_lost: false,
        })?;
        let msg_id = result["messages"][0]["id"].as_str().unwrap_or("unknown");
        tracing::debug!("WhatsApp message {msg_id} → {recipient_id}");
        Ok(())
    }

    async fn fetch_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self.roster.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
