//! Message sink seam and the webhook implementation.
//!
//! A sink's `send` returning `Ok(false)` and returning `Err` are treated
//! identically by the fan-out: the recipient failed. The distinction only
//! matters for logging.

use crate::Result;
use crate::types::{OutboundMessage, Recipient};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Delivers rendered messages to recipients
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send a message to a single recipient
    ///
    /// Returns `Ok(true)` when the recipient accepted the message.
    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<bool>;
}

/// JSON payload posted by [`WebhookSink`]
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    kind: &'a str,
    platform: &'a str,
    address: &'a str,
    text: &'a str,
    images: &'a [String],
    timestamp: i64,
}

/// Sink that POSTs each message as JSON to the recipient's address
pub struct WebhookSink {
    client: reqwest::Client,
    timeout: Duration,
    auth_header: Option<String>,
}

impl WebhookSink {
    /// Create a webhook sink
    ///
    /// # Arguments
    /// * `timeout` - Per-request timeout
    /// * `auth_header` - Optional Authorization header value sent with every request
    pub fn new(timeout: Duration, auth_header: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            auth_header,
        })
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<bool> {
        let kind = match recipient.kind {
            crate::types::ChannelKind::Direct => "direct",
            crate::types::ChannelKind::Group => "group",
        };

        let payload = WebhookPayload {
            kind,
            platform: &recipient.platform,
            address: &recipient.address,
            text: &message.text,
            images: &message.images,
            timestamp: chrono::Utc::now().timestamp(),
        };

        let mut request = self
            .client
            .post(&recipient.address)
            .json(&payload)
            .timeout(self.timeout);

        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(address = %recipient.address, "webhook sent successfully");
                    Ok(true)
                } else {
                    tracing::warn!(
                        address = %recipient.address,
                        status = status.as_u16(),
                        "webhook rejected message"
                    );
                    Ok(false)
                }
            }
            Err(e) => {
                tracing::warn!(address = %recipient.address, error = %e, "webhook send failed");
                Err(crate::Error::Network(e))
            }
        }
    }
}
