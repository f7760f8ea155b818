/// Outbound notifications
///
/// Announces new access requests to an external webhook. Delivery is
/// best-effort: failures are logged and never retried or surfaced.
use crate::{
    config::NotificationConfig,
    db::AccessRequest,
    error::{GateError, GateResult},
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Embed accent color for access request announcements
const EMBED_COLOR: u32 = 0x5865F2;

/// Notification sink for access control events
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A new pending access request was created
    async fn access_requested(&self, request: &AccessRequest) -> GateResult<()>;
}

/// Notifier used when no webhook is configured
#[derive(Debug, Default, Clone)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn access_requested(&self, request: &AccessRequest) -> GateResult<()> {
        tracing::debug!(
            "Webhook not configured, skipping notification for {}",
            request.identity.external_id
        );
        Ok(())
    }
}

/// Posts an embed message to a webhook URL
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    avatar_base_url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, avatar_base_url: String, timeout: Duration) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            avatar_base_url: avatar_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn avatar_url(&self, request: &AccessRequest) -> String {
        match &request.identity.avatar {
            Some(avatar) => format!(
                "{}/avatars/{}/{}.png",
                self.avatar_base_url, request.identity.external_id, avatar
            ),
            None => format!("{}/embed/avatars/0.png", self.avatar_base_url),
        }
    }

    /// Build the webhook payload for a new access request
    pub fn payload(&self, request: &AccessRequest) -> Value {
        let email = if request.identity.email.is_empty() {
            "Not provided"
        } else {
            request.identity.email.as_str()
        };

        json!({
            "embeds": [{
                "title": "New Access Request",
                "description": format!(
                    "**{}** requested access to the platform",
                    request.identity.username
                ),
                "color": EMBED_COLOR,
                "thumbnail": { "url": self.avatar_url(request) },
                "fields": [
                    { "name": "Email", "value": email },
                    { "name": "External ID", "value": request.identity.external_id },
                ],
                "timestamp": request.created_at.to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn access_requested(&self, request: &AccessRequest) -> GateResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| GateError::Internal(format!("Webhook delivery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GateError::Internal(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Pick a notifier from configuration
pub fn from_config(config: &NotificationConfig) -> GateResult<Box<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!("Access request webhook enabled");
            Ok(Box::new(WebhookNotifier::new(
                url.clone(),
                config.avatar_base_url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => Ok(Box::new(DisabledNotifier)),
    }
}
