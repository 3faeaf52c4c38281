//! End-to-end protocol scenarios: server publisher and liveness monitor on one
//! side, a bot sync agent on the other, sharing one in-memory store.

use async_trait::async_trait;
use botsync::agent::{BotSyncAgent, SyncOutcome, TradingGate};
use botsync::authority::InMemoryAuthority;
use botsync::config::{AgentConfig, TtlConfig};
use botsync::domain::{
    AccountId, AccountStatus, AgentState, Balances, BotStatus, DrawdownBlock, PauseReason,
    StrategyConfig, StrategyStatus, SubscriptionStatus, TradeConfig,
};
use botsync::notify::{Alert, AlertDispatcher, AlertLevel, Notifier};
use botsync::server::{LivenessMonitor, StrategyField, TradeField, VersionPublisher};
use botsync::store::{keys, EphemeralStore, MemoryStore};
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ACCOUNT: &str = "1001";
const STRATEGY: u64 = 7;

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    fn titles(&self, level: AlertLevel) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|alert| alert.level == level)
            .map(|alert| alert.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, alert: &Alert) -> Result<(), String> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn trade_config(account: &str) -> TradeConfig {
    TradeConfig {
        account_id: AccountId::new(account),
        version: 1,
        bot_status: BotStatus::Active,
        account_status: AccountStatus::Active,
        subscription_status: SubscriptionStatus::Active,
        subscription_expiry: None,
        balances: Balances {
            current_balance: dec!(25000),
            peak_balance: dec!(25000),
        },
        dd_block: DrawdownBlock::default(),
        risk_config: json!({ "max_drawdown_pct": 15 }),
        trade_config: json!({ "lot_size": "0.20", "symbols": ["XAUUSD", "EURUSD"] }),
        active_strategy_id: Some(STRATEGY),
    }
}

fn strategy_config(id: u64) -> StrategyConfig {
    StrategyConfig {
        strategy_id: id,
        version: 1,
        status: StrategyStatus::Active,
        is_pair_trading: false,
        allowed_symbols: vec!["XAUUSD".to_string()],
        parameters_by_symbol: BTreeMap::from([(
            "XAUUSD".to_string(),
            json!({ "tp_points": 450, "sl_points": 200 }),
        )]),
        optimization_config: json!({}),
        last_optimization_date: None,
    }
}

/// Let spawned alert deliveries run
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

struct World {
    store: Arc<MemoryStore>,
    authority: Arc<InMemoryAuthority>,
    monitor: Arc<LivenessMonitor>,
    publisher: VersionPublisher,
    notifier: Arc<RecordingNotifier>,
    agent: BotSyncAgent,
}

impl World {
    /// Account and strategy created server-side, bot not started yet
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(InMemoryAuthority::new());
        let monitor = Arc::new(LivenessMonitor::new(
            store.clone(),
            TtlConfig::default(),
            None,
        ));
        let publisher = VersionPublisher::new(store.clone(), monitor.clone(), TtlConfig::default());

        let trade = trade_config(ACCOUNT);
        authority.set_trade_config(trade.clone());
        authority.set_strategy_config(strategy_config(STRATEGY));
        publisher.trade_account_saved(&trade, None, true).await.unwrap();
        publisher
            .strategy_saved(STRATEGY, &[trade.account_id.clone()], None, false)
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let agent = Self::agent(&store, &authority, &notifier);
        Self {
            store,
            authority,
            monitor,
            publisher,
            notifier,
            agent,
        }
    }

    fn agent(
        store: &Arc<MemoryStore>,
        authority: &Arc<InMemoryAuthority>,
        notifier: &Arc<RecordingNotifier>,
    ) -> BotSyncAgent {
        let alerts = AlertDispatcher::new(Duration::from_secs(300)).with_notifier(notifier.clone());
        BotSyncAgent::new(
            AccountId::new(ACCOUNT),
            store.clone(),
            authority.clone(),
            Arc::new(alerts),
            &AgentConfig::default(),
            &TtlConfig::default(),
        )
    }

    fn account(&self) -> AccountId {
        AccountId::new(ACCOUNT)
    }

    /// Authoritative save of the trade account followed by the publish hook
    async fn save_trade<F>(&self, changed: &[TradeField], edit: F) -> (TradeConfig, Option<u64>)
    where
        F: FnOnce(&mut TradeConfig),
    {
        let saved = self
            .authority
            .update_trade_config(&self.account(), |config| {
                edit(config);
                config.version += 1;
            })
            .unwrap();
        let version = self
            .publisher
            .trade_account_saved(&saved, Some(changed), false)
            .await
            .unwrap();
        (saved, version)
    }

    async fn heartbeat_field(&self, field: &str) -> Option<String> {
        self.store
            .get_field(&keys::heartbeat(&self.account()), field)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_bumped_version_is_applied_and_recorded() {
    let world = World::new().await;
    world.save_trade(&[TradeField::TradeConfig], |_| {}).await;
    let (_, version) = world.save_trade(&[TradeField::TradeConfig], |_| {}).await;
    assert_eq!(version, Some(3));

    world.agent.cold_start().await.unwrap();
    assert_eq!(world.agent.snapshot().await.trade_version, Some(3));

    let (_, version) = world
        .save_trade(&[TradeField::TradeConfig], |config| {
            config.trade_config = json!({ "lot_size": "0.50", "symbols": ["XAUUSD"] });
        })
        .await;
    assert_eq!(version, Some(4));

    let outcome = world.agent.version_check_cycle().await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Applied {
            trade: true,
            strategies: vec![]
        }
    );

    let snapshot = world.agent.snapshot().await;
    assert_eq!(snapshot.trade_version, Some(4));
    assert_eq!(snapshot.strategy_versions.get(&STRATEGY), Some(&Some(1)));
    let config = world.agent.config().await.unwrap();
    assert_eq!(config.trade.version, 4);
    assert_eq!(config.trade.trade_config["lot_size"], "0.50");
}

#[tokio::test]
async fn test_versions_only_move_forward() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    let mut last = world.agent.snapshot().await.trade_version.unwrap();
    for lot in ["0.30", "0.40", "0.50", "0.60", "0.70"] {
        world
            .save_trade(&[TradeField::TradeConfig], |config| {
                config.trade_config["lot_size"] = json!(lot);
            })
            .await;
        world.agent.version_check_cycle().await.unwrap();

        let recorded = world.agent.snapshot().await.trade_version.unwrap();
        assert!(recorded > last, "{} did not advance past {}", recorded, last);
        last = recorded;
    }
    assert_eq!(last, 6);
}

#[tokio::test]
async fn test_non_trigger_save_publishes_no_version() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();
    let fetches = world.authority.fetch_count();

    let (_, version) = world
        .save_trade(&[TradeField::Balances], |config| {
            config.balances.current_balance = dec!(24000);
        })
        .await;
    assert_eq!(version, None);

    assert_eq!(
        world.agent.version_check_cycle().await.unwrap(),
        SyncOutcome::Unchanged
    );
    assert_eq!(world.authority.fetch_count(), fetches);
}

#[tokio::test]
async fn test_strategy_parameter_change_reaches_bot() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    world
        .authority
        .update_strategy_config(STRATEGY, |config| {
            config.version = 2;
            config
                .parameters_by_symbol
                .insert("XAUUSD".to_string(), json!({ "tp_points": 500, "sl_points": 250 }));
        })
        .unwrap();
    let bumped = world
        .publisher
        .strategy_saved(
            STRATEGY,
            &[world.account()],
            Some(&[StrategyField::Parameters]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(bumped, vec![(world.account(), 2)]);

    let outcome = world.agent.version_check_cycle().await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Applied {
            trade: false,
            strategies: vec![STRATEGY]
        }
    );
    let config = world.agent.config().await.unwrap();
    assert_eq!(
        config.strategy(STRATEGY).unwrap().parameters_by_symbol["XAUUSD"]["tp_points"],
        500
    );
}

#[tokio::test]
async fn test_restart_pulls_full_config_regardless_of_tokens() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();
    assert_eq!(world.authority.fetch_count(), 2);

    // Same account, fresh process: tokens are already in the store
    let restarted = World::agent(&world.store, &world.authority, &world.notifier);
    restarted.cold_start().await.unwrap();
    assert_eq!(world.authority.fetch_count(), 4);
    assert_eq!(restarted.state().await, AgentState::Running);
    assert_eq!(restarted.snapshot().await.trade_version, Some(1));

    // Tokens now match, nothing to pull
    restarted.version_check_cycle().await.unwrap();
    assert_eq!(world.authority.fetch_count(), 4);
}

#[tokio::test]
async fn test_identical_refetch_keeps_current_config() {
    let world = World::new().await;
    let store = world.store.clone();

    // An account nobody ever published versions for
    let trade = trade_config("2002");
    world.authority.set_trade_config(trade.clone());
    world.monitor.refresh(&trade).await.unwrap();

    let agent = BotSyncAgent::new(
        AccountId::new("2002"),
        store,
        world.authority.clone(),
        Arc::new(AlertDispatcher::log_only(Duration::from_secs(300))),
        &AgentConfig::default(),
        &TtlConfig::default(),
    );
    agent.cold_start().await.unwrap();
    let before = agent.config().await.unwrap();
    let fetches = world.authority.fetch_count();

    // Absent tokens force a refetch every cycle
    assert_eq!(agent.version_check_cycle().await.unwrap(), SyncOutcome::Unchanged);
    assert_eq!(world.authority.fetch_count(), fetches + 2);
    assert!(Arc::ptr_eq(&before, &agent.config().await.unwrap()));
    assert_eq!(agent.snapshot().await.trade_version, None);
}

#[tokio::test]
async fn test_store_outage_degrades_then_recovers() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();
    assert_eq!(world.agent.state().await, AgentState::Running);

    world.store.set_available(false);
    for cycle in 1..=10 {
        assert!(world.agent.heartbeat_cycle().await.is_err());
        let expected = if cycle < 3 {
            AgentState::Running
        } else {
            AgentState::Degraded
        };
        assert_eq!(world.agent.state().await, expected, "after cycle {}", cycle);
    }

    // Last-known-good config keeps trading
    assert!(world.agent.version_check_cycle().await.is_err());
    assert!(world.agent.gate().await.is_proceed());
    assert_eq!(world.agent.snapshot().await.store_failures, 13);

    world.store.set_available(true);
    world.agent.heartbeat_cycle().await.unwrap();
    assert_eq!(world.agent.state().await, AgentState::Running);
    assert_eq!(world.agent.snapshot().await.store_failures, 0);

    settle().await;
    assert_eq!(
        world.notifier.titles(AlertLevel::Critical),
        vec!["Store unreachable"]
    );
    assert_eq!(world.notifier.titles(AlertLevel::Info), vec!["Store recovered"]);
}

#[tokio::test]
async fn test_outage_still_enforces_drawdown_limit() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    world.store.set_available(false);
    for _ in 0..3 {
        assert!(world.agent.heartbeat_cycle().await.is_err());
    }
    assert_eq!(world.agent.state().await, AgentState::Degraded);
    assert!(world.agent.decision().await.is_proceed());

    // 16% down from the 25000 peak, limit is 15%
    world.agent.record_balance(dec!(21000)).await;
    assert_eq!(world.agent.state().await, AgentState::Degraded);
    assert!(matches!(
        world.agent.decision().await,
        TradingGate::Hold(PauseReason::DrawdownBlocked(Some(_)))
    ));

    world.store.set_available(true);
    world.agent.heartbeat_cycle().await.unwrap();
    assert_eq!(world.agent.state().await, AgentState::Paused);
    assert_eq!(world.heartbeat_field("dd_blocked").await.as_deref(), Some("true"));
}

#[tokio::test]
async fn test_subscription_expiry_pauses_within_one_status_cycle() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();
    assert!(world.agent.decision().await.is_proceed());

    let (saved, _) = world
        .save_trade(&[TradeField::SubscriptionStatus], |config| {
            config.subscription_status = SubscriptionStatus::Expired;
        })
        .await;

    world.agent.heartbeat_cycle().await.unwrap();
    assert_eq!(world.agent.state().await, AgentState::Paused);
    assert!(matches!(
        world.agent.decision().await,
        TradingGate::Hold(PauseReason::SubscriptionInactive(SubscriptionStatus::Expired))
    ));
    assert_eq!(world.heartbeat_field("bot_status").await.as_deref(), Some("PAUSED"));

    // The next server refresh sees the paused heartbeat
    let status = world.monitor.refresh(&saved).await.unwrap();
    assert!(!status.reports_active());
    assert_eq!(status.reason.as_deref(), Some("SUBSCRIPTION_EXPIRED"));

    settle().await;
    assert_eq!(
        world.notifier.titles(AlertLevel::Warning),
        vec!["Trading paused"]
    );
}

#[tokio::test]
async fn test_deactivation_is_detected_without_version_bump() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    let (_, version) = world
        .save_trade(&[TradeField::AccountStatus], |config| {
            config.account_status = AccountStatus::Inactive;
        })
        .await;
    assert_eq!(version, None);

    world.agent.heartbeat_cycle().await.unwrap();
    assert!(matches!(
        world.agent.decision().await,
        TradingGate::Hold(PauseReason::AccountInactive)
    ));
}

#[tokio::test]
async fn test_server_pause_holds_gate_until_resumed() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    world
        .save_trade(&[TradeField::BotStatus], |config| {
            config.bot_status = BotStatus::Paused;
        })
        .await;
    assert!(matches!(
        world.agent.gate().await,
        TradingGate::Hold(PauseReason::ServerPaused)
    ));

    world
        .save_trade(&[TradeField::BotStatus], |config| {
            config.bot_status = BotStatus::Active;
        })
        .await;
    match world.agent.gate().await {
        TradingGate::Proceed(config) => assert_eq!(config.trade.bot_status, BotStatus::Active),
        TradingGate::Hold(reason) => panic!("still held: {}", reason),
    }
}

#[tokio::test(start_paused = true)]
async fn test_expired_heartbeat_is_not_reported_active() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    let trade = trade_config(ACCOUNT);
    let status = world.monitor.refresh(&trade).await.unwrap();
    assert!(status.reports_active());

    // Bot goes silent past the heartbeat TTL
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(world.heartbeat_field("bot_status").await, None);

    let status = world.monitor.refresh(&trade).await.unwrap();
    assert!(!status.reports_active());
}

#[tokio::test]
async fn test_resume_on_status_alone_reopens_gate() {
    let world = World::new().await;
    world.agent.cold_start().await.unwrap();

    world
        .save_trade(&[TradeField::BotStatus], |config| {
            config.bot_status = BotStatus::Paused;
        })
        .await;
    assert!(matches!(
        world.agent.gate().await,
        TradingGate::Hold(PauseReason::ServerPaused)
    ));

    world
        .save_trade(&[TradeField::BotStatus], |config| {
            config.bot_status = BotStatus::Active;
        })
        .await;
    // Status cycle only; the cached config still says PAUSED
    world.agent.heartbeat_cycle().await.unwrap();
    assert_eq!(world.agent.state().await, AgentState::Running);
    match world.agent.decision().await {
        TradingGate::Proceed(config) => assert_eq!(config.trade.bot_status, BotStatus::Paused),
        TradingGate::Hold(reason) => panic!("still held: {}", reason),
    }
}
