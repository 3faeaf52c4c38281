//! Bot-side half of the protocol

pub mod retry;
pub mod scheduler;
pub mod sync;
pub mod versions;

pub use self::retry::{fetch_with_retry, RetryPolicy};
pub use self::scheduler::{spawn_agent, Schedule};
pub use self::sync::{AgentSnapshot, BotSyncAgent, LoadedConfig, SyncOutcome, TradingGate};
pub use self::versions::AppliedVersions;
