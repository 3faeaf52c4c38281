//! Liveness Monitor
//!
//! Derives each account's run decision from the bot heartbeat and the
//! authoritative account state and publishes it as the server status record.
//! The server's desired state always wins over the bot's self-report.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::authority::AccountDirectory;
use crate::config::TtlConfig;
use crate::domain::drawdown::{self, DD_REASON_CODE};
use crate::domain::{AccountLivenessRecord, BotStatus, Liveness, ServerStatusRecord, TradeConfig};
use crate::error::{Result, SyncError};
use crate::store::{keys, EphemeralStore};

/// Outcome of one sweep over the account directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct LivenessMonitor {
    store: Arc<dyn EphemeralStore>,
    ttl: TtlConfig,
    /// Server-side drawdown policy; `None` disables it
    max_drawdown_pct: Option<Decimal>,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        ttl: TtlConfig,
        max_drawdown_pct: Option<Decimal>,
    ) -> Self {
        Self {
            store,
            ttl,
            max_drawdown_pct,
        }
    }

    /// Pure status derivation; no I/O
    pub fn compute(
        &self,
        account: &TradeConfig,
        heartbeat: Option<&AccountLivenessRecord>,
        now: DateTime<Utc>,
    ) -> ServerStatusRecord {
        // A heartbeat older than its TTL is as good as absent
        let heartbeat = heartbeat.filter(|hb| {
            let age = now.signed_duration_since(hb.last_seen);
            age.to_std().map_or(true, |age| age <= self.ttl.heartbeat())
        });

        let subscription_status = account.effective_subscription_status(now);

        let (balance, peak) = match heartbeat {
            Some(hb) => (hb.balance, hb.peak_balance.max(account.balances.peak_balance)),
            None => (
                account.balances.current_balance,
                account.balances.peak_balance,
            ),
        };
        let policy_block = drawdown::evaluate(balance, peak, self.max_drawdown_pct);

        let dd_blocked = account.dd_block.blocked
            || heartbeat.map_or(false, |hb| hb.dd_blocked)
            || policy_block.is_some();

        let dd_reason = if dd_blocked {
            account
                .dd_block
                .reason
                .clone()
                .or_else(|| heartbeat.and_then(|hb| hb.dd_block_reason.clone()))
                .or(policy_block)
                .or_else(|| Some(DD_REASON_CODE.to_string()))
        } else {
            None
        };

        let (bot_status, reason) = if !account.account_status.is_active() {
            (BotStatus::Paused, Some("ACCOUNT_INACTIVE".to_string()))
        } else if !subscription_status.is_active() {
            (
                BotStatus::Paused,
                Some(format!("SUBSCRIPTION_{}", subscription_status)),
            )
        } else if dd_blocked {
            (BotStatus::Paused, dd_reason)
        } else {
            (account.bot_status, None)
        };

        let liveness = match heartbeat {
            None => Liveness::Down,
            Some(_) if dd_blocked => Liveness::Blocked,
            Some(_) if bot_status != BotStatus::Active => Liveness::Paused,
            Some(hb) => match hb.bot_status {
                BotStatus::Active => Liveness::Up,
                BotStatus::Paused => Liveness::Paused,
                BotStatus::Down => Liveness::Down,
            },
        };

        ServerStatusRecord {
            bot_status,
            account_status: account.account_status,
            subscription_status,
            dd_blocked,
            reason,
            liveness,
            updated_at: now,
        }
    }

    /// Read the heartbeat, recompute, and publish the server status
    pub async fn refresh(&self, account: &TradeConfig) -> Result<ServerStatusRecord> {
        let heartbeat_key = keys::heartbeat(&account.account_id);
        let heartbeat = match self.store.get(&heartbeat_key).await? {
            Some(fields) => match AccountLivenessRecord::from_fields(&fields) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Ignoring unreadable heartbeat {}: {}", heartbeat_key, e);
                    None
                }
            },
            None => None,
        };

        let status = self.compute(account, heartbeat.as_ref(), Utc::now());
        self.store
            .put(
                &keys::server_status(&account.account_id),
                &status.to_fields(),
                self.ttl.server_status(),
            )
            .await?;

        debug!(
            account = %account.account_id,
            bot_status = %status.bot_status,
            liveness = %status.liveness,
            "Published server status"
        );
        Ok(status)
    }

    /// Refresh every account in the directory; per-account failures are logged
    pub async fn sweep(&self, directory: &dyn AccountDirectory) -> Result<SweepSummary> {
        let accounts = directory.accounts().await.map_err(|e| {
            SyncError::AuthoritativeFetchFailed {
                what: "account directory".to_string(),
                attempts: 1,
                reason: e.to_string(),
            }
        })?;

        let mut summary = SweepSummary::default();
        for account in &accounts {
            match self.refresh(account).await {
                Ok(_) => summary.refreshed += 1,
                Err(e) => {
                    warn!(account = %account.account_id, "Status refresh failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Liveness sweep: {} refreshed, {} failed",
            summary.refreshed, summary.failed
        );
        Ok(summary)
    }

    /// Sweep on a fixed cadence until shutdown
    pub async fn run(
        &self,
        directory: Arc<dyn AccountDirectory>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Liveness monitor started (every {}s)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep(directory.as_ref()).await {
                error!("Liveness sweep failed: {}", e);
            }
        }

        info!("Liveness monitor stopped");
    }
}
