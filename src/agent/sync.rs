//! Bot Sync Agent
//!
//! Per-account state machine that keeps a bot's configuration coherent with
//! the authoritative store and decides whether the bot may trade.
//!
//! Two cycles drive it:
//! - heartbeat: read the server status, write the liveness record
//! - version check: compare version tokens with the last-applied versions and
//!   pull full configs on mismatch
//!
//! Config is always replaced whole. A cycle either applies every changed
//! payload or none of them, and versions are recorded only after the swap.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::retry::{fetch_with_retry, RetryPolicy};
use super::versions::AppliedVersions;
use crate::authority::ConfigAuthority;
use crate::config::{AgentConfig, TtlConfig};
use crate::domain::drawdown;
use crate::domain::{
    AccountId, AccountLivenessRecord, AgentState, BotStatus, ConfigKind, PauseReason,
    ServerStatusRecord, StateTransition, StrategyConfig, StrategyId, TradeConfig,
};
use crate::error::{FetchError, FetchFailure, Result, SyncError};
use crate::notify::{Alert, AlertDispatcher, AlertLevel};
use crate::store::{keys, EphemeralStore};

const MAX_TRANSITIONS: usize = 32;

/// Last-known-good configuration for one account
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub trade: TradeConfig,
    pub strategies: BTreeMap<StrategyId, StrategyConfig>,
}

impl LoadedConfig {
    pub fn strategy(&self, id: StrategyId) -> Option<&StrategyConfig> {
        self.strategies.get(&id)
    }
}

/// Answer to "may the bot act on this tick?"
#[derive(Debug, Clone)]
pub enum TradingGate {
    Proceed(Arc<LoadedConfig>),
    Hold(PauseReason),
}

impl TradingGate {
    pub fn is_proceed(&self) -> bool {
        matches!(self, TradingGate::Proceed(_))
    }
}

/// Result of one version check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every token matched, or the refetched payloads were identical
    Unchanged,
    Applied {
        trade: bool,
        strategies: Vec<StrategyId>,
    },
}

/// Point-in-time view for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub account_id: AccountId,
    pub state: AgentState,
    pub pause_reason: Option<String>,
    pub trade_version: Option<u64>,
    pub strategy_versions: BTreeMap<StrategyId, Option<u64>>,
    pub store_failures: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_applied: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct BalanceState {
    balance: Decimal,
    peak: Decimal,
    /// Bot-side drawdown evaluation, reported in the heartbeat
    dd_block_reason: Option<String>,
}

#[derive(Debug, Default)]
struct VersionTokens {
    trade: Option<u64>,
    strategies: BTreeMap<StrategyId, Option<u64>>,
    /// False when the store could not be read this cycle
    reachable: bool,
}

struct Inner {
    state: AgentState,
    pause: Option<PauseReason>,
    config: Option<Arc<LoadedConfig>>,
    versions: AppliedVersions,
    server_status: Option<ServerStatusRecord>,
    store_failures: u32,
    balance: Option<BalanceState>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_applied: Option<DateTime<Utc>>,
    transitions: Vec<StateTransition>,
}

pub struct BotSyncAgent {
    account: AccountId,
    store: Arc<dyn EphemeralStore>,
    authority: Arc<dyn ConfigAuthority>,
    alerts: Arc<AlertDispatcher>,
    retry: RetryPolicy,
    store_retry_budget: u32,
    ttl: TtlConfig,
    inner: RwLock<Inner>,
    /// Serializes version checks (scheduled and opportunistic)
    sync_lock: Mutex<()>,
}

impl BotSyncAgent {
    pub fn new(
        account: AccountId,
        store: Arc<dyn EphemeralStore>,
        authority: Arc<dyn ConfigAuthority>,
        alerts: Arc<AlertDispatcher>,
        config: &AgentConfig,
        ttl: &TtlConfig,
    ) -> Self {
        Self {
            account,
            store,
            authority,
            alerts,
            retry: RetryPolicy::from(config),
            store_retry_budget: config.store_retry_budget.max(1),
            ttl: ttl.clone(),
            inner: RwLock::new(Inner {
                state: AgentState::Starting,
                pause: Some(PauseReason::ConfigNotLoaded),
                config: None,
                versions: AppliedVersions::new(),
                server_status: None,
                store_failures: 0,
                balance: None,
                last_heartbeat: None,
                last_applied: None,
                transitions: Vec::new(),
            }),
            sync_lock: Mutex::new(()),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub async fn state(&self) -> AgentState {
        self.inner.read().await.state
    }

    /// Last-known-good config, if any was ever applied
    pub async fn config(&self) -> Option<Arc<LoadedConfig>> {
        self.inner.read().await.config.clone()
    }

    pub async fn transitions(&self) -> Vec<StateTransition> {
        self.inner.read().await.transitions.clone()
    }

    /// Full pull that ignores version tokens, then the first heartbeat
    pub async fn cold_start(&self) -> Result<()> {
        info!(account = %self.account, "Cold start: pulling full configuration");

        let synced = {
            let _guard = self.sync_lock.lock().await;
            let result = self.sync(true).await;
            let mut inner = self.inner.write().await;
            self.apply_decision(&mut inner, Utc::now());
            result
        };
        if let Err(e) = &synced {
            warn!(account = %self.account, "Initial config pull failed: {}", e);
        }

        let heartbeat = self.heartbeat_cycle().await;
        synced.map(|_| ()).and(heartbeat)
    }

    /// Read the server status and write the heartbeat
    pub async fn heartbeat_cycle(&self) -> Result<()> {
        self.status_cycle(true).await
    }

    /// Compare version tokens and pull whatever changed
    pub async fn version_check_cycle(&self) -> Result<SyncOutcome> {
        let _guard = self.sync_lock.lock().await;
        let result = self.sync(false).await;

        let mut inner = self.inner.write().await;
        self.apply_decision(&mut inner, Utc::now());
        match &result {
            Ok(SyncOutcome::Applied { trade, strategies }) => info!(
                account = %self.account,
                trade = *trade,
                strategies = ?strategies,
                "Applied new configuration"
            ),
            Ok(SyncOutcome::Unchanged) => debug!(account = %self.account, "Config up to date"),
            Err(e) => warn!(account = %self.account, "Version check failed: {}", e),
        }
        result
    }

    /// Opportunistic pre-tick check: refresh server status and versions, then
    /// decide. Never fails; errors leave the previous decision in force.
    pub async fn gate(&self) -> TradingGate {
        if let Err(e) = self.status_cycle(false).await {
            debug!(account = %self.account, "Pre-tick status read failed: {}", e);
        }
        if let Err(e) = self.version_check_cycle().await {
            debug!(account = %self.account, "Pre-tick version check failed: {}", e);
        }
        self.decision().await
    }

    /// Current decision without touching the store
    pub async fn decision(&self) -> TradingGate {
        let inner = self.inner.read().await;
        match (&inner.pause, &inner.config) {
            (Some(reason), _) => TradingGate::Hold(reason.clone()),
            (None, Some(config)) => TradingGate::Proceed(config.clone()),
            (None, None) => TradingGate::Hold(PauseReason::ConfigNotLoaded),
        }
    }

    /// Track the live balance and its peak; evaluates the bot-side drawdown
    /// limit from `risk_config.max_drawdown_pct`
    pub async fn record_balance(&self, balance: Decimal) {
        let mut inner = self.inner.write().await;
        let limit = inner
            .config
            .as_ref()
            .and_then(|config| config.trade.max_drawdown_pct());

        let state = inner.balance.get_or_insert(BalanceState {
            balance,
            peak: balance,
            dd_block_reason: None,
        });
        state.balance = balance;
        state.peak = state.peak.max(balance);

        let reason = drawdown::evaluate(balance, state.peak, limit);
        if let (Some(reason), None) = (&reason, &state.dd_block_reason) {
            warn!(account = %self.account, "Drawdown limit reached: {}", reason);
        }
        state.dd_block_reason = reason;

        self.apply_decision(&mut inner, Utc::now());
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        let inner = self.inner.read().await;
        let strategy_versions = inner
            .config
            .as_ref()
            .map(|config| {
                config
                    .strategies
                    .keys()
                    .map(|id| {
                        let version = inner
                            .versions
                            .get(&self.account, ConfigKind::Strategy(*id))
                            .flatten();
                        (*id, version)
                    })
                    .collect()
            })
            .unwrap_or_default();

        AgentSnapshot {
            account_id: self.account.clone(),
            state: inner.state,
            pause_reason: inner.pause.as_ref().map(ToString::to_string),
            trade_version: inner.versions.get(&self.account, ConfigKind::Trade).flatten(),
            strategy_versions,
            store_failures: inner.store_failures,
            last_heartbeat: inner.last_heartbeat,
            last_applied: inner.last_applied,
        }
    }

    /// Read the server status, re-decide, then report the decision in the
    /// heartbeat
    async fn status_cycle(&self, write_heartbeat: bool) -> Result<()> {
        let now = Utc::now();

        let status = match self.read_server_status(now).await {
            Ok(status) => status,
            Err(e) => {
                let mut inner = self.inner.write().await;
                self.store_failed(&mut inner, &e);
                self.apply_decision(&mut inner, now);
                return Err(e);
            }
        };

        let record = {
            let mut inner = self.inner.write().await;
            self.store_ok(&mut inner);
            inner.server_status = status;
            self.apply_decision(&mut inner, now);
            if !write_heartbeat {
                return Ok(());
            }
            self.liveness_record(&inner, now)
        };

        let written = self
            .store
            .put(
                &keys::heartbeat(&self.account),
                &record.to_fields(),
                self.ttl.heartbeat(),
            )
            .await;

        let mut inner = self.inner.write().await;
        match written {
            Ok(()) => {
                inner.last_heartbeat = Some(now);
                Ok(())
            }
            Err(e) => {
                self.store_failed(&mut inner, &e);
                self.apply_decision(&mut inner, now);
                Err(e)
            }
        }
    }

    async fn read_server_status(&self, now: DateTime<Utc>) -> Result<Option<ServerStatusRecord>> {
        let key = keys::server_status(&self.account);
        let Some(fields) = self.store.get(&key).await? else {
            debug!(account = %self.account, "Server status absent");
            return Ok(None);
        };

        let record = match ServerStatusRecord::from_fields(&fields) {
            Ok(record) => record,
            Err(e) => {
                warn!(account = %self.account, "Unreadable server status: {}", e);
                return Ok(None);
            }
        };

        let age = now.signed_duration_since(record.updated_at);
        if age.to_std().map_or(false, |age| age > self.ttl.server_status()) {
            warn!(account = %self.account, "{}", SyncError::StaleRecord { key });
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn read_version(&self, kind: ConfigKind) -> Result<Option<u64>> {
        let key = keys::version(&self.account, kind);
        let Some(raw) = self.store.get_field(&key, keys::VERSION_FIELD).await? else {
            return Ok(None);
        };
        match raw.parse::<u64>() {
            Ok(version) => Ok(Some(version)),
            Err(_) => {
                // Unparseable token: same as absent, refetch
                warn!(account = %self.account, "Ignoring malformed version {:?} at {}", raw, key);
                Ok(None)
            }
        }
    }

    async fn read_tokens(&self, strategies: &[StrategyId]) -> Result<VersionTokens> {
        let mut tokens = VersionTokens {
            trade: self.read_version(ConfigKind::Trade).await?,
            strategies: BTreeMap::new(),
            reachable: true,
        };
        for id in strategies {
            let token = self.read_version(ConfigKind::Strategy(*id)).await?;
            tokens.strategies.insert(*id, token);
        }
        Ok(tokens)
    }

    async fn sync(&self, force: bool) -> Result<SyncOutcome> {
        let (current, versions) = {
            let mut inner = self.inner.write().await;
            if inner.state == AgentState::Starting {
                self.transition(&mut inner, AgentState::Syncing, "initial config pull");
            }
            (inner.config.clone(), inner.versions.clone())
        };
        // Nothing to fall back on: pull even if the store cannot be read
        let force = force || current.is_none();

        let assigned: Vec<StrategyId> = current
            .as_ref()
            .map(|config| config.strategies.keys().copied().collect())
            .unwrap_or_default();

        let tokens = match self.read_tokens(&assigned).await {
            Ok(tokens) => {
                let mut inner = self.inner.write().await;
                self.store_ok(&mut inner);
                tokens
            }
            Err(e) => {
                let mut inner = self.inner.write().await;
                self.store_failed(&mut inner, &e);
                if !force {
                    // Version comparisons are not trusted without the store
                    return Err(e);
                }
                VersionTokens::default()
            }
        };

        self.pull(force, current, &versions, tokens).await
    }

    async fn pull(
        &self,
        force: bool,
        current: Option<Arc<LoadedConfig>>,
        versions: &AppliedVersions,
        mut tokens: VersionTokens,
    ) -> Result<SyncOutcome> {
        let trade_changed =
            force || versions.needs_refetch(&self.account, ConfigKind::Trade, tokens.trade);

        let fetched_trade = if trade_changed {
            let what = format!("trade config for {}", self.account);
            let trade = fetch_with_retry(&self.retry, &what, || {
                self.authority.trade_config(&self.account)
            })
            .await
            .map_err(|failure| self.fetch_failed(failure))?;

            if let Err(errors) = trade.validate_for(&self.account) {
                return Err(self.reject(&what, errors));
            }
            self.note_race(ConfigKind::Trade, tokens.trade, trade.version);
            Some(trade)
        } else {
            None
        };

        let trade = match (fetched_trade, current.as_ref()) {
            (Some(trade), _) => trade,
            (None, Some(config)) => config.trade.clone(),
            (None, None) => {
                return Err(SyncError::Internal(
                    "no trade config to compare against".to_string(),
                ))
            }
        };

        let assigned = trade.assigned_strategies();
        let mut strategies = BTreeMap::new();
        let mut pulled = Vec::new();

        for id in &assigned {
            let kind = ConfigKind::Strategy(*id);
            // Newly assigned strategies were not covered by the token read
            if !tokens.strategies.contains_key(id) {
                let token = if tokens.reachable {
                    self.read_version(kind).await.unwrap_or_else(|e| {
                        debug!(account = %self.account, "Reading {} version failed: {}", kind, e);
                        None
                    })
                } else {
                    None
                };
                tokens.strategies.insert(*id, token);
            }
            let token = tokens.strategies.get(id).copied().flatten();

            let loaded = current.as_ref().and_then(|config| config.strategy(*id));
            let needs_fetch =
                force || loaded.is_none() || versions.needs_refetch(&self.account, kind, token);

            let config = match loaded {
                Some(config) if !needs_fetch => config.clone(),
                _ => {
                    let what = format!("strategy {} for {}", id, self.account);
                    let config = fetch_with_retry(&self.retry, &what, || {
                        self.authority.strategy_config(&self.account, *id)
                    })
                    .await
                    .map_err(|failure| self.fetch_failed(failure))?;

                    if let Err(errors) = config.validate_for(*id) {
                        return Err(self.reject(&what, errors));
                    }
                    self.note_race(kind, token, config.version);
                    pulled.push(*id);
                    config
                }
            };
            strategies.insert(*id, config);
        }

        let candidate = LoadedConfig { trade, strategies };
        let unchanged = current.as_deref() == Some(&candidate);

        // Swap and record under one lock so readers never see a mix
        let mut inner = self.inner.write().await;
        if !unchanged {
            let trade = &candidate.trade;
            match inner.balance.as_mut() {
                Some(state) => state.peak = state.peak.max(trade.balances.peak_balance),
                None => {
                    inner.balance = Some(BalanceState {
                        balance: trade.balances.current_balance,
                        peak: trade.balances.peak_balance,
                        dd_block_reason: None,
                    })
                }
            }
            inner.config = Some(Arc::new(candidate));
            inner.last_applied = Some(Utc::now());
        }

        inner
            .versions
            .record(&self.account, ConfigKind::Trade, tokens.trade);
        for id in &assigned {
            let token = tokens.strategies.get(id).copied().flatten();
            inner
                .versions
                .record(&self.account, ConfigKind::Strategy(*id), token);
        }
        inner.versions.retain_strategies(&self.account, &assigned);

        if unchanged {
            Ok(SyncOutcome::Unchanged)
        } else {
            Ok(SyncOutcome::Applied {
                trade: trade_changed,
                strategies: pulled,
            })
        }
    }

    /// The token moved again between our read and the fetch. Harmless: the
    /// older token is recorded, so the next check refetches once more.
    fn note_race(&self, kind: ConfigKind, observed: Option<u64>, fetched: u64) {
        if let Some(observed) = observed {
            if fetched > observed {
                debug!(
                    "{}",
                    SyncError::VersionRaceLost {
                        key: keys::version(&self.account, kind),
                        observed,
                        fetched,
                    }
                );
            }
        }
    }

    fn fetch_failed(&self, failure: FetchFailure) -> SyncError {
        match &failure.last {
            FetchError::Malformed(reason) => {
                return self.reject(&failure.what, vec![format!("malformed payload: {}", reason)]);
            }
            // Retrying next cycle won't fix these, so someone has to look
            FetchError::Unauthorized(_) | FetchError::NotFound(_) => {
                self.alerts.dispatch(Alert::new(
                    AlertLevel::Error,
                    &self.account,
                    "Authority refused fetch",
                    &failure.to_string(),
                ));
            }
            FetchError::Timeout { .. } | FetchError::Transport(_) => {}
        }
        failure.into()
    }

    fn reject(&self, what: &str, errors: Vec<String>) -> SyncError {
        let err = SyncError::ConfigApplyFailed(format!("{}: {}", what, errors.join("; ")));
        warn!(account = %self.account, "Keeping last-known-good config: {}", err);
        self.alerts.dispatch(Alert::new(
            AlertLevel::Error,
            &self.account,
            "Config rejected",
            &err.to_string(),
        ));
        err
    }

    fn liveness_record(&self, inner: &Inner, now: DateTime<Utc>) -> AccountLivenessRecord {
        let trading = inner.pause.is_none() && inner.config.is_some();
        let (balance, peak, dd_reason) = match (&inner.balance, &inner.config) {
            (Some(state), _) => (state.balance, state.peak, state.dd_block_reason.clone()),
            (None, Some(config)) => (
                config.trade.balances.current_balance,
                config.trade.balances.peak_balance,
                None,
            ),
            (None, None) => (Decimal::ZERO, Decimal::ZERO, None),
        };

        AccountLivenessRecord {
            bot_status: if trading {
                BotStatus::Active
            } else {
                BotStatus::Paused
            },
            balance,
            peak_balance: peak,
            dd_blocked: dd_reason.is_some(),
            dd_block_reason: dd_reason,
            last_seen: now,
        }
    }

    fn store_ok(&self, inner: &mut Inner) {
        if inner.store_failures > 0 {
            info!(
                account = %self.account,
                "Store reachable again after {} failed cycle(s)",
                inner.store_failures
            );
        }
        inner.store_failures = 0;
    }

    fn store_failed(&self, inner: &mut Inner, err: &SyncError) {
        inner.store_failures = inner.store_failures.saturating_add(1);
        warn!(
            account = %self.account,
            failures = inner.store_failures,
            budget = self.store_retry_budget,
            "Store operation failed: {}",
            err
        );
    }

    /// Derive the target state and hold reason from what we know
    fn decide(&self, inner: &Inner, now: DateTime<Utc>) -> (AgentState, Option<PauseReason>) {
        let degraded = inner.store_failures >= self.store_retry_budget;

        let Some(config) = &inner.config else {
            let state = if degraded {
                AgentState::Degraded
            } else {
                AgentState::Syncing
            };
            return (state, Some(PauseReason::ConfigNotLoaded));
        };

        // Absent or expired status cannot confirm ACTIVE
        let status_reason = match &inner.server_status {
            Some(status) => status.pause_reason(),
            None => Some(PauseReason::StatusUnavailable),
        };
        // The config's bot_status only stands in while there is no status
        // record; a fresh status carries the server's current run command
        let config_reason = config
            .trade
            .pause_reason(now)
            .filter(|reason| {
                inner.server_status.is_none() || *reason != PauseReason::ServerPaused
            });
        let local_reason = inner
            .balance
            .as_ref()
            .and_then(|state| state.dd_block_reason.clone())
            .map(|reason| PauseReason::DrawdownBlocked(Some(reason)));

        let forced = [status_reason.clone(), config_reason, local_reason]
            .into_iter()
            .flatten()
            .find(PauseReason::is_forced);

        if degraded {
            // Keep trading on last-known-good; forced pauses stay in force,
            // including ones that arise during the outage
            return (AgentState::Degraded, forced);
        }

        match forced.or(status_reason) {
            Some(reason) => (AgentState::Paused, Some(reason)),
            None => (AgentState::Running, None),
        }
    }

    fn apply_decision(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let (target, hold) = self.decide(inner, now);
        let was_degraded = inner.state == AgentState::Degraded;
        let previous = inner.pause.clone();

        let reason = hold
            .as_ref()
            .map_or_else(|| "clear to trade".to_string(), ToString::to_string);
        self.transition(inner, target, &reason);
        inner.pause = hold;

        if target == AgentState::Degraded && !was_degraded {
            self.alerts.dispatch(Alert::new(
                AlertLevel::Critical,
                &self.account,
                "Store unreachable",
                &format!(
                    "{} consecutive store failures; trading continues on last-known-good config",
                    inner.store_failures
                ),
            ));
        } else if was_degraded && target != AgentState::Degraded {
            self.alerts.dispatch(Alert::new(
                AlertLevel::Info,
                &self.account,
                "Store recovered",
                &format!("Agent is {}", target),
            ));
        }

        if let Some(reason) = &inner.pause {
            if reason.is_forced() && previous.as_ref() != Some(reason) {
                self.alerts.dispatch(Alert::new(
                    AlertLevel::Warning,
                    &self.account,
                    "Trading paused",
                    &reason.to_string(),
                ));
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: AgentState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(
                account = %self.account,
                "{}",
                SyncError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            );
            return;
        }

        info!(account = %self.account, "State {} -> {} ({})", from, to, reason);
        inner.state = to;
        inner.transitions.push(StateTransition::new(from, to, reason));
        if inner.transitions.len() > MAX_TRANSITIONS {
            inner.transitions.remove(0);
        }
    }
}
