//! LINE Messaging API push notifications

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{Alert, Notifier};
use crate::config::NotifyConfig;
use crate::error::{Result, SyncError};

const PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct LineNotifier {
    client: Client,
    endpoint: String,
    channel_token: String,
    recipient: String,
}

#[derive(Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl LineNotifier {
    pub fn new(channel_token: &str, recipient: &str) -> Result<Self> {
        // Placeholder ids are handed out before a user links their LINE account
        if recipient.is_empty() || recipient.starts_with("temp_") {
            return Err(SyncError::Validation(format!(
                "invalid LINE recipient: {:?}",
                recipient
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: PUSH_URL.to_string(),
            channel_token: channel_token.to_string(),
            recipient: recipient.to_string(),
        })
    }

    /// Build from config; `None` when LINE is not configured
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        match (&config.line_channel_token, &config.line_recipient) {
            (Some(token), Some(recipient)) => {
                info!("LINE notifications enabled");
                Self::new(token, recipient).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Point at a different push endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub async fn send_message(&self, text: &str) -> std::result::Result<(), String> {
        let body = PushMessage {
            to: &self.recipient,
            messages: [TextMessage { kind: "text", text }],
        };

        match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.channel_token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("LINE notification sent");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("LINE notification failed: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("LINE request failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn send(&self, alert: &Alert) -> std::result::Result<(), String> {
        self.send_message(&alert.format_text()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;
    use crate::notify::AlertLevel;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::sync::mpsc;

    #[test]
    fn test_rejects_placeholder_recipient() {
        assert!(LineNotifier::new("token", "temp_42").is_err());
        assert!(LineNotifier::new("token", "").is_err());
        assert!(LineNotifier::new("token", "U4af4980629").is_ok());
    }

    #[test]
    fn test_from_config_requires_both_settings() {
        let mut config = NotifyConfig::default();
        assert!(LineNotifier::from_config(&config).unwrap().is_none());
        config.line_channel_token = Some("token".to_string());
        config.line_recipient = Some("U4af4980629".to_string());
        assert!(LineNotifier::from_config(&config).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_push_payload() {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Option<String>, Value)>();
        let app = Router::new().route(
            "/push",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = tx.send((auth, body));
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = LineNotifier::new("chan-token", "U4af4980629")
            .unwrap()
            .with_endpoint(&format!("http://{}/push", addr));
        let alert = Alert::new(
            AlertLevel::Warning,
            &AccountId::new("1001"),
            "Trading paused",
            "SUBSCRIPTION_INACTIVE (EXPIRED)",
        );
        notifier.send(&alert).await.unwrap();

        let (auth, body) = rx.recv().await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer chan-token"));
        assert_eq!(body["to"], "U4af4980629");
        assert_eq!(body["messages"][0]["type"], "text");
        assert!(body["messages"][0]["text"]
            .as_str()
            .unwrap()
            .contains("SUBSCRIPTION_INACTIVE (EXPIRED)"));
    }
}
