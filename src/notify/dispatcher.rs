//! Fire-and-forget alert fan-out with rate limiting

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Alert, LogNotifier, Notifier};

#[derive(Debug)]
struct RateLimitState {
    last_sent: Instant,
    suppressed_count: u32,
}

pub struct AlertDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    rate_limit: Duration,
    rate_limits: DashMap<String, RateLimitState>,
}

impl AlertDispatcher {
    pub fn new(rate_limit: Duration) -> Self {
        Self {
            notifiers: Vec::new(),
            rate_limit,
            rate_limits: DashMap::new(),
        }
    }

    /// Dispatcher that only logs
    pub fn log_only(rate_limit: Duration) -> Self {
        Self::new(rate_limit).with_notifier(Arc::new(LogNotifier))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    fn rate_limit_key(alert: &Alert) -> String {
        format!("{}:{}:{}", alert.account, alert.level, alert.title)
    }

    fn should_rate_limit(&self, alert: &Alert) -> bool {
        let now = Instant::now();

        match self.rate_limits.entry(Self::rate_limit_key(alert)) {
            Entry::Vacant(slot) => {
                slot.insert(RateLimitState {
                    last_sent: now,
                    suppressed_count: 0,
                });
                false
            }
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                if now.duration_since(state.last_sent) < self.rate_limit {
                    state.suppressed_count += 1;
                    debug!(
                        "Rate limiting alert '{}' ({} suppressed)",
                        alert.title, state.suppressed_count
                    );
                    return true;
                }

                state.last_sent = now;
                state.suppressed_count = 0;
                false
            }
        }
    }

    /// Hand the alert to every notifier in the background.
    ///
    /// Returns `None` when the alert was rate limited. The handle is only
    /// useful to tests; callers never wait on it.
    pub fn dispatch(&self, alert: Alert) -> Option<JoinHandle<()>> {
        if self.should_rate_limit(&alert) {
            return None;
        }

        let notifiers = self.notifiers.clone();
        Some(tokio::spawn(async move {
            for notifier in notifiers {
                if let Err(e) = notifier.send(&alert).await {
                    warn!(
                        "Notifier '{}' failed to deliver '{}': {}",
                        notifier.name(),
                        alert.title,
                        e
                    );
                }
            }
        }))
    }
}
