//! HTTP client for the authoritative config API
//!
//! Endpoints (bearer-authenticated with the bot API key):
//! - `GET /api/bot/account/{id}/config/`
//! - `GET /api/bot/account/{id}/strategy/{strategy}/config/`
//! - `GET /api/bot/accounts/`
//!
//! Responses use a `{ "status": "success", "data": ... }` envelope.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{AccountDirectory, ConfigAuthority};
use crate::config::AuthorityConfig;
use crate::domain::{AccountId, StrategyConfig, StrategyId, TradeConfig};
use crate::error::{FetchError, Result, SyncError};

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Clone)]
pub struct HttpConfigAuthority {
    http: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl HttpConfigAuthority {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Validation(format!("invalid authority URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Validation(format!(
                "authority URL cannot be a base: {}",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent("botsync/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &AuthorityConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            &config.api_key,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(["api", "bot"]);
            path.extend(segments);
            // Trailing slash
            path.push("");
        }
        url
    }

    async fn get_data<T: DeserializeOwned>(&self, url: Url) -> std::result::Result<T, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        match status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(url.path().to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Unauthorized(format!("HTTP {}", status)))
            }
            _ => {
                warn!("Authority returned HTTP {} for {}", status, url.path());
                return Err(FetchError::Transport(format!("HTTP {}: {}", status, body)));
            }
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| FetchError::Malformed(format!("{}: {}", url.path(), e)))?;

        if envelope.status != "success" {
            return Err(FetchError::Malformed(
                envelope
                    .message
                    .unwrap_or_else(|| format!("status {}", envelope.status)),
            ));
        }

        envelope
            .data
            .ok_or_else(|| FetchError::Malformed(format!("{}: missing data", url.path())))
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ConfigAuthority for HttpConfigAuthority {
    async fn trade_config(&self, account: &AccountId) -> std::result::Result<TradeConfig, FetchError> {
        let url = self.endpoint(&["account", account.as_str(), "config"]);
        self.get_data(url).await
    }

    async fn strategy_config(
        &self,
        account: &AccountId,
        strategy: StrategyId,
    ) -> std::result::Result<StrategyConfig, FetchError> {
        let strategy = strategy.to_string();
        let url = self.endpoint(&["account", account.as_str(), "strategy", &strategy, "config"]);
        self.get_data(url).await
    }
}

#[async_trait]
impl AccountDirectory for HttpConfigAuthority {
    async fn accounts(&self) -> std::result::Result<Vec<TradeConfig>, FetchError> {
        let url = self.endpoint(&["accounts"]);
        self.get_data(url).await
    }
}
