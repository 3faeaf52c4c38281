//! Version Publisher
//!
//! Called from the authoritative store's save hooks. Every qualifying mutation
//! yields a strictly greater version token for the affected
//! (account, config kind). Bumps are a single atomic increment in the store,
//! so concurrent saves can over-increment but never lose an update.

use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::LivenessMonitor;
use crate::config::TtlConfig;
use crate::domain::{AccountId, ConfigKind, Fields, StrategyId, TradeConfig};
use crate::error::Result;
use crate::store::{keys, EphemeralStore};

/// Trade-account fields a save may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeField {
    TradeConfig,
    BotStatus,
    SubscriptionStatus,
    DdBlocked,
    ActiveStrategy,
    AccountStatus,
    SubscriptionExpiry,
    Balances,
    RiskConfig,
}

impl TradeField {
    /// Fields the bot must learn about through a version bump
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            TradeField::TradeConfig
                | TradeField::BotStatus
                | TradeField::SubscriptionStatus
                | TradeField::DdBlocked
                | TradeField::ActiveStrategy
        )
    }
}

/// Strategy fields a save may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyField {
    Parameters,
    Status,
    AllowedSymbols,
    OptimizationConfig,
    LastOptimizationDate,
}

impl StrategyField {
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            StrategyField::Parameters | StrategyField::Status | StrategyField::AllowedSymbols
        )
    }
}

/// An unknown change set (`None`) always bumps
fn should_bump<T, F>(changed: Option<&[T]>, is_trigger: F) -> bool
where
    F: Fn(&T) -> bool,
{
    changed.map_or(true, |fields| fields.iter().any(is_trigger))
}

pub struct VersionPublisher {
    store: Arc<dyn EphemeralStore>,
    monitor: Arc<LivenessMonitor>,
    ttl: TtlConfig,
}

impl VersionPublisher {
    pub fn new(store: Arc<dyn EphemeralStore>, monitor: Arc<LivenessMonitor>, ttl: TtlConfig) -> Self {
        Self { store, monitor, ttl }
    }

    /// Increment the version token and refresh its 24h TTL
    pub async fn bump(&self, account: &AccountId, kind: ConfigKind) -> Result<u64> {
        let key = keys::version(account, kind);
        let version = self
            .store
            .incr_field(&key, keys::VERSION_FIELD, self.ttl.version())
            .await?;

        let mut stamp = Fields::new();
        stamp.insert(
            keys::UPDATED_AT_FIELD.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        self.store.put(&key, &stamp, self.ttl.version()).await?;

        info!(account = %account, kind = %kind, version, "Published config version");
        Ok(version)
    }

    /// Trade account saved.
    ///
    /// A new account gets its first version and an initial server status.
    /// An update always refreshes the server status and bumps the version when
    /// a trigger field changed (or the change set is unknown).
    pub async fn trade_account_saved(
        &self,
        account: &TradeConfig,
        changed: Option<&[TradeField]>,
        created: bool,
    ) -> Result<Option<u64>> {
        let version = if created || should_bump(changed, TradeField::is_trigger) {
            Some(self.bump(&account.account_id, ConfigKind::Trade).await?)
        } else {
            debug!(account = %account.account_id, "No trigger field changed, version kept");
            None
        };

        self.monitor.refresh(account).await?;
        Ok(version)
    }

    /// Strategy saved; bumps every account the strategy is assigned to.
    ///
    /// Creation publishes nothing: no account can be running a strategy that
    /// did not exist yet. Every account is attempted; the first failure is
    /// returned afterwards.
    pub async fn strategy_saved(
        &self,
        strategy: StrategyId,
        accounts: &[AccountId],
        changed: Option<&[StrategyField]>,
        created: bool,
    ) -> Result<Vec<(AccountId, u64)>> {
        if created || !should_bump(changed, StrategyField::is_trigger) {
            return Ok(Vec::new());
        }

        let mut bumped = Vec::with_capacity(accounts.len());
        let mut first_error = None;

        for account in accounts {
            match self.bump(account, ConfigKind::Strategy(strategy)).await {
                Ok(version) => bumped.push((account.clone(), version)),
                Err(e) => {
                    warn!(account = %account, strategy, "Version bump failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(bumped),
        }
    }
}
