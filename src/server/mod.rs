//! Server-side half of the protocol: version publication and liveness

pub mod liveness;
pub mod publisher;

pub use liveness::{LivenessMonitor, SweepSummary};
pub use publisher::{StrategyField, TradeField, VersionPublisher};
