//! Health check HTTP server
//!
//! Reports each managed account's agent state for process supervision.
//! Any agent in DEGRADED (store unreachable) makes the process unhealthy.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::agent::{AgentSnapshot, BotSyncAgent};
use crate::domain::AgentState;
use crate::error::{Result, SyncError};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn of(state: AgentState) -> Self {
        match state {
            AgentState::Running => HealthStatus::Healthy,
            AgentState::Starting | AgentState::Syncing | AgentState::Paused => {
                HealthStatus::Degraded
            }
            AgentState::Degraded => HealthStatus::Unhealthy,
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub agents: Vec<AgentSnapshot>,
}

/// Shared state for the health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    agents: Vec<Arc<BotSyncAgent>>,
}

impl HealthState {
    pub fn new(agents: Vec<Arc<BotSyncAgent>>) -> Self {
        Self {
            started_at: Utc::now(),
            agents,
        }
    }

    pub async fn get_health(&self) -> HealthResponse {
        let mut agents = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            agents.push(agent.snapshot().await);
        }

        // Worst agent wins; a paused bot is expected, an unreachable store is not
        let status = agents
            .iter()
            .map(|snapshot| HealthStatus::of(snapshot.state))
            .fold(HealthStatus::Healthy, |worst, status| match (worst, status) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
                _ => HealthStatus::Healthy,
            });

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            agents,
        }
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| SyncError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe: is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::InMemoryAuthority;
    use crate::config::{AgentConfig, TtlConfig};
    use crate::domain::config::fixtures;
    use crate::domain::AccountId;
    use crate::notify::AlertDispatcher;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn agent(store: Arc<MemoryStore>, account: &str) -> Arc<BotSyncAgent> {
        let authority = Arc::new(InMemoryAuthority::new());
        authority.set_trade_config(fixtures::trade_config(account));
        authority.set_strategy_config(fixtures::strategy_config(7));
        Arc::new(BotSyncAgent::new(
            AccountId::new(account),
            store,
            authority,
            Arc::new(AlertDispatcher::log_only(Duration::from_secs(300))),
            &AgentConfig::default(),
            &TtlConfig::default(),
        ))
    }

    async fn get_health(state: Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_paused_agent_is_degraded_but_ok() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store, "1001");
        let _ = agent.cold_start().await;

        let (status, body) = get_health(Arc::new(HealthState::new(vec![agent]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["agents"][0]["account_id"], "1001");
        assert_eq!(body["agents"][0]["state"], "PAUSED");
    }

    #[tokio::test]
    async fn test_degraded_agent_returns_503() {
        let store = Arc::new(MemoryStore::new());
        let healthy = agent(store.clone(), "1001");
        let _ = healthy.cold_start().await;

        let degraded = agent(store.clone(), "1002");
        let _ = degraded.cold_start().await;
        store.set_available(false);
        for _ in 0..3 {
            let _ = degraded.heartbeat_cycle().await;
        }
        assert_eq!(degraded.state().await, AgentState::Degraded);

        let (status, body) =
            get_health(Arc::new(HealthState::new(vec![healthy, degraded]))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["agents"][1]["state"], "DEGRADED");
    }
}
