//! Authoritative configuration model
//!
//! These are the payloads the bot pulls from the authoritative config store on a
//! version mismatch. They are always applied whole; a payload that fails
//! validation is rejected and the last-known-good copy stays in force.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::state::PauseReason;
use super::status::{AccountStatus, BotStatus, StrategyStatus, SubscriptionStatus};

/// Trade account identifier (the broker account number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strategy identifier
pub type StrategyId = u64;

/// The kind of configuration a version token guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigKind {
    Trade,
    Strategy(StrategyId),
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKind::Trade => write!(f, "trade_config"),
            ConfigKind::Strategy(id) => write!(f, "strategy_config:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub current_balance: Decimal,
    pub peak_balance: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownBlock {
    pub blocked: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Per-account trading configuration and run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    pub account_id: AccountId,
    #[serde(default)]
    pub version: u64,
    pub bot_status: BotStatus,
    pub account_status: AccountStatus,
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub subscription_expiry: Option<DateTime<Utc>>,
    pub balances: Balances,
    #[serde(default)]
    pub dd_block: DrawdownBlock,
    #[serde(default)]
    pub risk_config: Value,
    #[serde(default)]
    pub trade_config: Value,
    #[serde(default)]
    pub active_strategy_id: Option<StrategyId>,
}

impl TradeConfig {
    /// Subscription is usable only while ACTIVE and not past its expiry
    pub fn subscription_active(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status.is_active()
            && self.subscription_expiry.map_or(true, |expiry| expiry > now)
    }

    /// Subscription status with the expiry date taken into account
    pub fn effective_subscription_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        if self.subscription_status.is_active() && !self.subscription_active(now) {
            SubscriptionStatus::Expired
        } else {
            self.subscription_status
        }
    }

    /// Mandatory pause carried by the config itself, in priority order
    pub fn pause_reason(&self, now: DateTime<Utc>) -> Option<PauseReason> {
        if !self.account_status.is_active() {
            return Some(PauseReason::AccountInactive);
        }
        let subscription = self.effective_subscription_status(now);
        if !subscription.is_active() {
            return Some(PauseReason::SubscriptionInactive(subscription));
        }
        if self.dd_block.blocked {
            return Some(PauseReason::DrawdownBlocked(self.dd_block.reason.clone()));
        }
        if self.bot_status != BotStatus::Active {
            return Some(PauseReason::ServerPaused);
        }
        None
    }

    /// Strategies whose configs must be loaded alongside this trade config
    pub fn assigned_strategies(&self) -> Vec<StrategyId> {
        self.active_strategy_id.into_iter().collect()
    }

    /// Drawdown limit in percent from `risk_config.max_drawdown_pct`
    pub fn max_drawdown_pct(&self) -> Option<Decimal> {
        match self.risk_config.get("max_drawdown_pct")? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        }
    }

    /// Check the payload is safe to apply for `expected` account
    pub fn validate_for(&self, expected: &AccountId) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if &self.account_id != expected {
            errors.push(format!(
                "payload is for account {}, expected {}",
                self.account_id, expected
            ));
        }

        if !matches!(self.trade_config, Value::Object(_) | Value::Null) {
            errors.push("trade_config must be a JSON object".to_string());
        }

        if !matches!(self.risk_config, Value::Object(_) | Value::Null) {
            errors.push("risk_config must be a JSON object".to_string());
        }

        if self.balances.current_balance.is_sign_negative() {
            errors.push("current_balance must not be negative".to_string());
        }

        if self.balances.peak_balance.is_sign_negative() {
            errors.push("peak_balance must not be negative".to_string());
        }

        if let Some(limit) = self.max_drawdown_pct() {
            if limit <= Decimal::ZERO || limit > Decimal::ONE_HUNDRED {
                errors.push(format!("max_drawdown_pct out of range: {}", limit));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Per-strategy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: StrategyId,
    #[serde(default)]
    pub version: u64,
    pub status: StrategyStatus,
    #[serde(default)]
    pub is_pair_trading: bool,
    #[serde(default)]
    pub allowed_symbols: Vec<String>,
    #[serde(default)]
    pub parameters_by_symbol: BTreeMap<String, Value>,
    #[serde(default)]
    pub optimization_config: Value,
    #[serde(default)]
    pub last_optimization_date: Option<DateTime<Utc>>,
}

impl StrategyConfig {
    pub fn validate_for(&self, expected: StrategyId) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.strategy_id != expected {
            errors.push(format!(
                "payload is for strategy {}, expected {}",
                self.strategy_id, expected
            ));
        }

        if self.status.is_tradable() && self.allowed_symbols.is_empty() {
            errors.push("tradable strategy has no allowed symbols".to_string());
        }

        // Pair symbols look like "EURUSD/GBPUSD"
        if self.is_pair_trading {
            for symbol in &self.allowed_symbols {
                let legs: Vec<&str> = symbol.split('/').collect();
                if legs.len() != 2 || legs.iter().any(|leg| leg.trim().is_empty()) {
                    errors.push(format!("invalid pair symbol: {}", symbol));
                }
            }
        }

        for (symbol, params) in &self.parameters_by_symbol {
            if !self.allowed_symbols.contains(symbol) {
                errors.push(format!("parameters for disallowed symbol: {}", symbol));
            }
            if !params.is_object() {
                errors.push(format!("parameters for {} must be a JSON object", symbol));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    pub fn trade_config(account: &str) -> TradeConfig {
        TradeConfig {
            account_id: AccountId::new(account),
            version: 1,
            bot_status: BotStatus::Active,
            account_status: AccountStatus::Active,
            subscription_status: SubscriptionStatus::Active,
            subscription_expiry: None,
            balances: Balances {
                current_balance: dec!(10000),
                peak_balance: dec!(10000),
            },
            dd_block: DrawdownBlock::default(),
            risk_config: json!({ "max_drawdown_pct": 20 }),
            trade_config: json!({ "lot_size": "0.10", "symbols": ["XAUUSD"] }),
            active_strategy_id: Some(7),
        }
    }

    pub fn strategy_config(id: StrategyId) -> StrategyConfig {
        StrategyConfig {
            strategy_id: id,
            version: 1,
            status: StrategyStatus::Active,
            is_pair_trading: false,
            allowed_symbols: vec!["XAUUSD".to_string()],
            parameters_by_symbol: BTreeMap::from([(
                "XAUUSD".to_string(),
                json!({ "tp_points": 300, "sl_points": 150 }),
            )]),
            optimization_config: json!({ "lookback_days": 90 }),
            last_optimization_date: None,
        }
    }
}
