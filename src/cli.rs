use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::domain::{AccountId, ConfigKind, Fields, StrategyId};
use crate::error::Result;
use crate::server::VersionPublisher;
use crate::store::{keys, EphemeralStore};

#[derive(Parser)]
#[command(name = "botsync")]
#[command(version)]
#[command(about = "Heartbeat and version-gated config sync for trading bots", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus the BOTSYNC_ENV overlay)
    #[arg(short, long, default_value = "config", env = "BOTSYNC_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run sync agents for one or more trade accounts
    Agent {
        /// Trade account id (repeatable)
        #[arg(short, long = "account", required = true)]
        accounts: Vec<String>,
        /// Serve /health on this port (overrides health_port)
        #[arg(long)]
        health_port: Option<u16>,
    },
    /// Run the server-side liveness sweep
    Monitor,
    /// Dump the ephemeral keys of one account
    Inspect {
        #[arg(short, long)]
        account: String,
    },
    /// Manually publish a new config version
    Bump {
        #[arg(short, long)]
        account: String,
        /// Bump the strategy config version instead of the trade config
        #[arg(short, long)]
        strategy: Option<StrategyId>,
    },
}

/// One live key with its remaining lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDump {
    pub key: String,
    pub ttl: Option<Duration>,
    pub fields: Fields,
}

/// Every live key the protocol keeps for `account`
pub async fn collect_keys(store: &dyn EphemeralStore, account: &AccountId) -> Result<Vec<KeyDump>> {
    let mut names = vec![
        keys::heartbeat(account),
        keys::server_status(account),
        keys::version(account, ConfigKind::Trade),
    ];
    names.extend(
        store
            .keys(&format!("{}{}:", keys::STRATEGY_CONFIG_PREFIX, account))
            .await?,
    );

    let mut dumps = Vec::with_capacity(names.len());
    for key in names {
        let Some(fields) = store.get(&key).await? else {
            continue;
        };
        let ttl = store.ttl(&key).await?;
        dumps.push(KeyDump { key, ttl, fields });
    }
    Ok(dumps)
}

pub async fn inspect(store: &dyn EphemeralStore, account: &AccountId) -> Result<()> {
    let dumps = collect_keys(store, account).await?;
    if dumps.is_empty() {
        println!("No live keys for account {}", account);
        return Ok(());
    }

    for dump in dumps {
        let ttl = dump
            .ttl
            .map(|ttl| format!("{}s", ttl.as_secs()))
            .unwrap_or_else(|| "-".to_string());
        println!("{}  (ttl {})", dump.key, ttl);
        for (field, value) in &dump.fields {
            println!("    {:<20} {}", field, value);
        }
    }
    Ok(())
}

pub async fn bump(
    publisher: &VersionPublisher,
    account: &AccountId,
    strategy: Option<StrategyId>,
) -> Result<u64> {
    let kind = strategy.map_or(ConfigKind::Trade, ConfigKind::Strategy);
    let version = publisher.bump(account, kind).await?;
    println!("{} {} -> version {}", account, kind, version);
    Ok(version)
}
