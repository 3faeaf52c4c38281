//! Periodic driver for a bot sync agent
//!
//! Heartbeat and version check run as two independent tasks so a slow
//! authoritative fetch never delays the next heartbeat. Each sleep is
//! jittered to spread load on the shared store. Shutdown is only observed
//! between cycles: an in-flight cycle finishes (or hits its own timeouts)
//! before the task exits.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::sync::BotSyncAgent;
use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub heartbeat_interval: Duration,
    pub version_check_interval: Duration,
    pub jitter_pct: f64,
}

impl From<&AgentConfig> for Schedule {
    fn from(config: &AgentConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            version_check_interval: config.version_check_interval(),
            jitter_pct: config.jitter_pct,
        }
    }
}

/// `base` scaled by a random factor in `[1 - pct, 1 + pct]`
pub fn jittered(base: Duration, jitter_pct: f64) -> Duration {
    if jitter_pct <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter_pct..=jitter_pct);
    base.mul_f64(factor.max(0.0))
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    jitter_pct: f64,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let delay = jittered(period, jitter_pct);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        cycle().await;
    }
    debug!("{} loop stopped", name);
}

/// Cold-start the agent, then drive both cycles until shutdown
pub fn spawn_agent(
    agent: Arc<BotSyncAgent>,
    schedule: Schedule,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let account = agent.account().clone();
        info!(
            account = %account,
            "Agent starting (heartbeat every {:?}, version check every {:?})",
            schedule.heartbeat_interval,
            schedule.version_check_interval
        );

        if let Err(e) = agent.cold_start().await {
            // Version checks keep pulling until a config lands
            warn!(account = %account, "Cold start incomplete: {}", e);
        }

        let heartbeat = {
            let agent = agent.clone();
            tokio::spawn(run_periodic(
                "heartbeat",
                schedule.heartbeat_interval,
                schedule.jitter_pct,
                shutdown.clone(),
                move || {
                    let agent = agent.clone();
                    async move {
                        let _ = agent.heartbeat_cycle().await;
                    }
                },
            ))
        };

        let version_check = {
            let agent = agent.clone();
            tokio::spawn(run_periodic(
                "version check",
                schedule.version_check_interval,
                schedule.jitter_pct,
                shutdown,
                move || {
                    let agent = agent.clone();
                    async move {
                        let _ = agent.version_check_cycle().await;
                    }
                },
            ))
        };

        let (heartbeat, version_check) = tokio::join!(heartbeat, version_check);
        if heartbeat.is_err() || version_check.is_err() {
            warn!(account = %account, "Agent task ended abnormally");
        }
        info!(account = %account, "Agent stopped");
    })
}
