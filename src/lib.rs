pub mod agent;
pub mod authority;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod notify;
pub mod server;
pub mod services;
pub mod store;

pub use agent::{spawn_agent, AgentSnapshot, BotSyncAgent, Schedule, SyncOutcome, TradingGate};
pub use authority::{AccountDirectory, ConfigAuthority, HttpConfigAuthority, InMemoryAuthority};
pub use config::AppConfig;
pub use error::{FetchError, FetchFailure, Result, SyncError};
pub use notify::{Alert, AlertDispatcher, AlertLevel, Notifier};
pub use server::{LivenessMonitor, VersionPublisher};
pub use services::{HealthServer, HealthState};
pub use store::{EphemeralStore, MemoryStore, RedisStore};
