use serde::{Deserialize, Serialize};
use std::fmt;

/// Bot run status, as self-reported by the bot and as commanded by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    Active,
    Paused,
    /// Bot process is not reporting
    Down,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Active => "ACTIVE",
            BotStatus::Paused => "PAUSED",
            BotStatus::Down => "DOWN",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BotStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(BotStatus::Active),
            "PAUSED" => Ok(BotStatus::Paused),
            "DOWN" => Ok(BotStatus::Down),
            _ => Err(format!("Unknown bot status: {}", s)),
        }
    }
}

/// Subscription lifecycle of a trade account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Pending => "PENDING",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "EXPIRED" => Ok(SubscriptionStatus::Expired),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            "PENDING" => Ok(SubscriptionStatus::Pending),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

/// Whether the account itself is enabled in the authoritative store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AccountStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "INACTIVE" => Ok(AccountStatus::Inactive),
            _ => Err(format!("Unknown account status: {}", s)),
        }
    }
}

/// Availability of a strategy definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyStatus {
    Active,
    Inactive,
    Beta,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "ACTIVE",
            StrategyStatus::Inactive => "INACTIVE",
            StrategyStatus::Beta => "BETA",
        }
    }

    /// Beta strategies are tradable
    pub fn is_tradable(&self) -> bool {
        !matches!(self, StrategyStatus::Inactive)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observed liveness derived by the server from heartbeats and account state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Liveness {
    /// Heartbeat present, bot allowed to trade
    Up,
    /// Heartbeat present, bot commanded or self-reported paused
    Paused,
    /// No heartbeat within its TTL
    Down,
    /// Heartbeat present, drawdown block in force
    Blocked,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Up => "UP",
            Liveness::Paused => "PAUSED",
            Liveness::Down => "DOWN",
            Liveness::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Liveness {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(Liveness::Up),
            "PAUSED" => Ok(Liveness::Paused),
            "DOWN" => Ok(Liveness::Down),
            "BLOCKED" => Ok(Liveness::Blocked),
            _ => Err(format!("Unknown liveness: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(BotStatus::try_from("paused").unwrap(), BotStatus::Paused);
        assert_eq!(
            SubscriptionStatus::try_from("Expired").unwrap(),
            SubscriptionStatus::Expired
        );
        assert_eq!(Liveness::try_from("blocked").unwrap(), Liveness::Blocked);
        assert!(AccountStatus::try_from("gone").is_err());
    }

    #[test]
    fn test_serde_uses_wire_strings() {
        let json = serde_json::to_string(&SubscriptionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let status: StrategyStatus = serde_json::from_str("\"BETA\"").unwrap();
        assert!(status.is_tradable());
    }
}
