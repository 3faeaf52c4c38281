use serde::{Deserialize, Serialize};
use std::fmt;

use super::status::SubscriptionStatus;

/// Bot sync agent state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    /// Process started, nothing loaded yet
    Starting,
    /// Pulling configuration; not yet cleared to trade
    Syncing,
    /// Config loaded and server status allows trading
    Running,
    /// A mandatory pause condition is in force
    Paused,
    /// Ephemeral store unreachable beyond the retry budget
    Degraded,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Starting => "STARTING",
            AgentState::Syncing => "SYNCING",
            AgentState::Running => "RUNNING",
            AgentState::Paused => "PAUSED",
            AgentState::Degraded => "DEGRADED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: AgentState) -> bool {
        use AgentState::*;

        match (self, target) {
            // Any state may degrade
            (_, Degraded) => true,

            (Starting, Syncing) => true,

            (Syncing, Running) => true,
            (Syncing, Paused) => true,

            (Running, Paused) => true,
            (Running, Syncing) => true, // Assigned config disappeared

            (Paused, Running) => true,
            (Paused, Syncing) => true,

            // Recovery re-derives the state from config + server status
            (Degraded, Syncing) => true,
            (Degraded, Running) => true,
            (Degraded, Paused) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<AgentState> {
        use AgentState::*;

        match self {
            Starting => vec![Syncing, Degraded],
            Syncing => vec![Running, Paused, Degraded],
            Running => vec![Paused, Syncing, Degraded],
            Paused => vec![Running, Syncing, Degraded],
            Degraded => vec![Syncing, Running, Paused, Degraded],
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AgentState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "STARTING" => Ok(AgentState::Starting),
            "SYNCING" => Ok(AgentState::Syncing),
            "RUNNING" => Ok(AgentState::Running),
            "PAUSED" => Ok(AgentState::Paused),
            "DEGRADED" => Ok(AgentState::Degraded),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// Why the agent is not allowed to trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// Server commanded a pause
    ServerPaused,
    SubscriptionInactive(SubscriptionStatus),
    AccountInactive,
    DrawdownBlocked(Option<String>),
    /// Server status absent, expired or unreadable; cannot confirm ACTIVE
    StatusUnavailable,
    /// Trade or strategy config not loaded yet
    ConfigNotLoaded,
}

impl PauseReason {
    pub fn code(&self) -> &'static str {
        match self {
            PauseReason::ServerPaused => "SERVER_PAUSED",
            PauseReason::SubscriptionInactive(_) => "SUBSCRIPTION_INACTIVE",
            PauseReason::AccountInactive => "ACCOUNT_INACTIVE",
            PauseReason::DrawdownBlocked(_) => "DD_BLOCKED",
            PauseReason::StatusUnavailable => "STATUS_UNAVAILABLE",
            PauseReason::ConfigNotLoaded => "CONFIG_NOT_LOADED",
        }
    }

    /// Pauses commanded by the server, as opposed to local fail-closed holds
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            PauseReason::ServerPaused
                | PauseReason::SubscriptionInactive(_)
                | PauseReason::AccountInactive
                | PauseReason::DrawdownBlocked(_)
        )
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::SubscriptionInactive(status) => {
                write!(f, "{} ({})", self.code(), status)
            }
            PauseReason::DrawdownBlocked(Some(reason)) => write!(f, "{} ({})", self.code(), reason),
            _ => write!(f, "{}", self.code()),
        }
    }
}

/// State transition event (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: AgentState, to: AgentState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use AgentState::*;

        assert!(Starting.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Degraded.can_transition_to(Running));

        for state in [Starting, Syncing, Running, Paused, Degraded] {
            assert!(state.can_transition_to(Degraded));
        }

        assert!(!Starting.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Paused.can_transition_to(Starting));
    }

    #[test]
    fn test_valid_transitions_agree_with_predicate() {
        use AgentState::*;

        for from in [Starting, Syncing, Running, Paused, Degraded] {
            for to in from.valid_transitions() {
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(AgentState::try_from("running").unwrap(), AgentState::Running);
        assert!(AgentState::try_from("INVALID").is_err());
    }

    #[test]
    fn test_forced_pauses() {
        assert!(PauseReason::ServerPaused.is_forced());
        assert!(PauseReason::DrawdownBlocked(None).is_forced());
        assert!(!PauseReason::StatusUnavailable.is_forced());
        assert!(!PauseReason::ConfigNotLoaded.is_forced());
        assert_eq!(
            PauseReason::SubscriptionInactive(SubscriptionStatus::Expired).to_string(),
            "SUBSCRIPTION_INACTIVE (EXPIRED)"
        );
    }
}
