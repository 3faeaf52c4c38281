//! Authoritative config store (external collaborator)
//!
//! The durable source of truth for account and strategy configuration. The sync
//! core only reads from it; mutations happen elsewhere and are announced
//! through the version publisher.

pub mod http;
pub mod memory;

pub use self::http::HttpConfigAuthority;
pub use self::memory::InMemoryAuthority;

use crate::domain::{AccountId, StrategyConfig, StrategyId, TradeConfig};
use crate::error::FetchError;
use async_trait::async_trait;

/// Read access used by the bot sync agent
#[async_trait]
pub trait ConfigAuthority: Send + Sync {
    async fn trade_config(&self, account: &AccountId) -> Result<TradeConfig, FetchError>;

    async fn strategy_config(
        &self,
        account: &AccountId,
        strategy: StrategyId,
    ) -> Result<StrategyConfig, FetchError>;
}

/// Account listing used by the server-side liveness sweep
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Every account the server publishes status for
    async fn accounts(&self) -> Result<Vec<TradeConfig>, FetchError>;
}
