//! In-process authority for local runs and tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::{AccountDirectory, ConfigAuthority};
use crate::domain::{AccountId, StrategyConfig, StrategyId, TradeConfig};
use crate::error::FetchError;

#[derive(Default)]
pub struct InMemoryAuthority {
    trade: RwLock<HashMap<AccountId, TradeConfig>>,
    strategy: RwLock<HashMap<StrategyId, StrategyConfig>>,
    /// Failures returned (in order) by the next fetches, before any lookup
    injected: RwLock<VecDeque<FetchError>>,
    fetches: AtomicU64,
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trade_config(&self, config: TradeConfig) {
        if let Ok(mut trade) = self.trade.write() {
            trade.insert(config.account_id.clone(), config);
        }
    }

    pub fn set_strategy_config(&self, config: StrategyConfig) {
        if let Ok(mut strategy) = self.strategy.write() {
            strategy.insert(config.strategy_id, config);
        }
    }

    /// Mutate a stored trade config in place; returns the updated copy
    pub fn update_trade_config<F>(&self, account: &AccountId, f: F) -> Option<TradeConfig>
    where
        F: FnOnce(&mut TradeConfig),
    {
        let mut trade = self.trade.write().ok()?;
        let config = trade.get_mut(account)?;
        f(config);
        Some(config.clone())
    }

    pub fn update_strategy_config<F>(&self, strategy: StrategyId, f: F) -> Option<StrategyConfig>
    where
        F: FnOnce(&mut StrategyConfig),
    {
        let mut configs = self.strategy.write().ok()?;
        let config = configs.get_mut(&strategy)?;
        f(config);
        Some(config.clone())
    }

    pub fn remove_trade_config(&self, account: &AccountId) {
        if let Ok(mut trade) = self.trade.write() {
            trade.remove(account);
        }
    }

    /// Fail the next `count` fetches with `error`
    pub fn fail_next(&self, count: usize, error: FetchError) {
        if let Ok(mut injected) = self.injected.write() {
            injected.extend(std::iter::repeat(error).take(count));
        }
    }

    /// Total fetch calls served (including injected failures)
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn begin_fetch(&self) -> Result<(), FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.injected.write() {
            Ok(mut injected) => match injected.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Err(_) => Err(FetchError::Transport("authority lock poisoned".to_string())),
        }
    }
}

#[async_trait]
impl ConfigAuthority for InMemoryAuthority {
    async fn trade_config(&self, account: &AccountId) -> Result<TradeConfig, FetchError> {
        self.begin_fetch()?;
        let trade = self
            .trade
            .read()
            .map_err(|_| FetchError::Transport("authority lock poisoned".to_string()))?;
        trade
            .get(account)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("trade config for {}", account)))
    }

    async fn strategy_config(
        &self,
        account: &AccountId,
        strategy: StrategyId,
    ) -> Result<StrategyConfig, FetchError> {
        self.begin_fetch()?;
        let configs = self
            .strategy
            .read()
            .map_err(|_| FetchError::Transport("authority lock poisoned".to_string()))?;
        configs.get(&strategy).cloned().ok_or_else(|| {
            FetchError::NotFound(format!("strategy {} for account {}", strategy, account))
        })
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAuthority {
    async fn accounts(&self) -> Result<Vec<TradeConfig>, FetchError> {
        self.begin_fetch()?;
        let trade = self
            .trade
            .read()
            .map_err(|_| FetchError::Transport("authority lock poisoned".to_string()))?;
        let mut accounts: Vec<TradeConfig> = trade.values().cloned().collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(accounts)
    }
}
