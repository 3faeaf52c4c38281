//! Notification dispatch
//!
//! Alerts about DEGRADED transitions, forced pauses and rejected configs are
//! handed to every configured notifier in the background. A failing notifier
//! is logged and otherwise ignored; it never fails the sync loop.

pub mod dispatcher;
pub mod line;

pub use self::dispatcher::AlertDispatcher;
pub use self::line::LineNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::AccountId;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlertLevel {
    /// Informational (recoveries)
    Info,
    /// Forced pauses
    Warning,
    /// Rejected payloads
    Error,
    /// Store unreachable beyond the retry budget
    Critical,
}

impl AlertLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{274c}",
            AlertLevel::Critical => "\u{1f6a8}",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert payload
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub level: AlertLevel,
    pub account: AccountId,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, account: &AccountId, title: &str, message: &str) -> Self {
        Self {
            level,
            account: account.clone(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Plain-text rendering for chat notifiers
    pub fn format_text(&self) -> String {
        format!(
            "{} {}\nAccount: {}\nTime: {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.account,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn send(&self, alert: &Alert) -> Result<(), String>;
}

/// Writes alerts to the tracing log; always configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), String> {
        match alert.level {
            AlertLevel::Info => info!(account = %alert.account, "{}: {}", alert.title, alert.message),
            AlertLevel::Warning => {
                warn!(account = %alert.account, "{}: {}", alert.title, alert.message)
            }
            AlertLevel::Error | AlertLevel::Critical => {
                error!(account = %alert.account, level = %alert.level, "{}: {}", alert.title, alert.message)
            }
        }
        Ok(())
    }
}
