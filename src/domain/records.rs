//! Ephemeral hash records exchanged through the key store
//!
//! Every field value is a string so bots and server built on different stacks
//! can read each other's records: decimals as decimal-strings, timestamps as
//! RFC 3339, flags as `true`/`false`.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::state::PauseReason;
use super::status::{AccountStatus, BotStatus, Liveness, SubscriptionStatus};
use crate::error::RecordError;

/// Field map of one hash record
pub type Fields = BTreeMap<String, String>;

fn required<'a>(fields: &'a Fields, name: &'static str) -> Result<&'a str, RecordError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(RecordError::MissingField(name))
}

fn optional(fields: &Fields, name: &str) -> Option<String> {
    fields
        .get(name)
        .filter(|v| !v.is_empty())
        .cloned()
}

fn invalid(field: &'static str, value: &str) -> RecordError {
    RecordError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn parse_flag(fields: &Fields, name: &'static str) -> Result<bool, RecordError> {
    // Missing flag means not set
    match fields.get(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v.is_empty() || v == "false" || v == "0" => Ok(false),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) => Err(invalid(name, &v)),
    }
}

fn parse_decimal(fields: &Fields, name: &'static str) -> Result<Decimal, RecordError> {
    let raw = required(fields, name)?;
    Decimal::from_str(raw).map_err(|_| invalid(name, raw))
}

fn parse_time(fields: &Fields, name: &'static str) -> Result<DateTime<Utc>, RecordError> {
    let raw = required(fields, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid(name, raw))
}

fn parse_enum<T>(fields: &Fields, name: &'static str) -> Result<T, RecordError>
where
    T: for<'a> TryFrom<&'a str, Error = String>,
{
    let raw = required(fields, name)?;
    T::try_from(raw).map_err(|_| invalid(name, raw))
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_flag(flag: bool) -> String {
    if flag { "true" } else { "false" }.to_string()
}

/// Heartbeat written by the bot every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLivenessRecord {
    pub bot_status: BotStatus,
    pub balance: Decimal,
    pub peak_balance: Decimal,
    pub dd_blocked: bool,
    pub dd_block_reason: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl AccountLivenessRecord {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("bot_status".into(), self.bot_status.as_str().into());
        fields.insert("balance".into(), self.balance.to_string());
        fields.insert("peak_balance".into(), self.peak_balance.to_string());
        fields.insert("dd_blocked".into(), format_flag(self.dd_blocked));
        fields.insert(
            "dd_block_reason".into(),
            self.dd_block_reason.clone().unwrap_or_default(),
        );
        fields.insert("last_seen".into(), format_time(self.last_seen));
        fields
    }

    pub fn from_fields(fields: &Fields) -> Result<Self, RecordError> {
        // Older bots wrote `current_balance`
        let balance = if fields.contains_key("balance") {
            parse_decimal(fields, "balance")?
        } else {
            parse_decimal(fields, "current_balance")?
        };

        Ok(Self {
            bot_status: parse_enum(fields, "bot_status")?,
            balance,
            peak_balance: parse_decimal(fields, "peak_balance")?,
            dd_blocked: parse_flag(fields, "dd_blocked")?,
            dd_block_reason: optional(fields, "dd_block_reason"),
            last_seen: parse_time(fields, "last_seen")?,
        })
    }
}

/// Run decision published by the server for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatusRecord {
    /// Commanded run state; overrides whatever the bot last reported
    pub bot_status: BotStatus,
    pub account_status: AccountStatus,
    pub subscription_status: SubscriptionStatus,
    pub dd_blocked: bool,
    pub reason: Option<String>,
    /// Observed state of the bot as of this computation
    pub liveness: Liveness,
    pub updated_at: DateTime<Utc>,
}

impl ServerStatusRecord {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("bot_status".into(), self.bot_status.as_str().into());
        fields.insert("account_status".into(), self.account_status.as_str().into());
        fields.insert(
            "subscription_status".into(),
            self.subscription_status.as_str().into(),
        );
        fields.insert("dd_blocked".into(), format_flag(self.dd_blocked));
        fields.insert("reason".into(), self.reason.clone().unwrap_or_default());
        fields.insert("liveness".into(), self.liveness.as_str().into());
        fields.insert("updated_at".into(), format_time(self.updated_at));
        fields
    }

    pub fn from_fields(fields: &Fields) -> Result<Self, RecordError> {
        Ok(Self {
            bot_status: parse_enum(fields, "bot_status")?,
            account_status: parse_enum(fields, "account_status")?,
            subscription_status: parse_enum(fields, "subscription_status")?,
            dd_blocked: parse_flag(fields, "dd_blocked")?,
            reason: optional(fields, "reason"),
            liveness: parse_enum(fields, "liveness")?,
            updated_at: parse_time(fields, "updated_at")?,
        })
    }

    /// Whether the bot is being reported as up and trading
    pub fn reports_active(&self) -> bool {
        self.liveness == Liveness::Up
    }

    /// Mandatory pause conditions, checked in priority order
    pub fn pause_reason(&self) -> Option<PauseReason> {
        if !self.account_status.is_active() {
            return Some(PauseReason::AccountInactive);
        }
        if !self.subscription_status.is_active() {
            return Some(PauseReason::SubscriptionInactive(self.subscription_status));
        }
        if self.dd_blocked {
            return Some(PauseReason::DrawdownBlocked(self.reason.clone()));
        }
        if self.bot_status != BotStatus::Active {
            return Some(PauseReason::ServerPaused);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status() -> ServerStatusRecord {
        ServerStatusRecord {
            bot_status: BotStatus::Active,
            account_status: AccountStatus::Active,
            subscription_status: SubscriptionStatus::Active,
            dd_blocked: false,
            reason: None,
            liveness: Liveness::Up,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_heartbeat_fields_are_strings() {
        let record = AccountLivenessRecord {
            bot_status: BotStatus::Active,
            balance: dec!(10100.50),
            peak_balance: dec!(10500),
            dd_blocked: false,
            dd_block_reason: None,
            last_seen: Utc::now(),
        };
        let fields = record.to_fields();
        assert_eq!(fields["balance"], "10100.50");
        assert_eq!(fields["dd_blocked"], "false");
        assert_eq!(fields["dd_block_reason"], "");
    }

    #[test]
    fn test_heartbeat_accepts_legacy_balance_field() {
        let mut fields = Fields::new();
        fields.insert("bot_status".into(), "ACTIVE".into());
        fields.insert("current_balance".into(), "950.25".into());
        fields.insert("peak_balance".into(), "1000".into());
        fields.insert("last_seen".into(), "2025-11-19T10:30:00Z".into());

        let record = AccountLivenessRecord::from_fields(&fields).unwrap();
        assert_eq!(record.balance, dec!(950.25));
        assert!(!record.dd_blocked);
        assert_eq!(record.dd_block_reason, None);
    }

    #[test]
    fn test_server_status_missing_field_is_error() {
        let mut fields = status().to_fields();
        fields.remove("subscription_status");
        assert_eq!(
            ServerStatusRecord::from_fields(&fields),
            Err(RecordError::MissingField("subscription_status"))
        );

        let mut fields = status().to_fields();
        fields.insert("dd_blocked".into(), "maybe".into());
        assert!(ServerStatusRecord::from_fields(&fields).is_err());
    }

    #[test]
    fn test_pause_reason_priority() {
        assert_eq!(status().pause_reason(), None);

        let mut record = status();
        record.bot_status = BotStatus::Paused;
        record.dd_blocked = true;
        record.reason = Some("DD_LIMIT".into());
        assert_eq!(
            record.pause_reason(),
            Some(PauseReason::DrawdownBlocked(Some("DD_LIMIT".into())))
        );

        record.subscription_status = SubscriptionStatus::Expired;
        assert_eq!(
            record.pause_reason(),
            Some(PauseReason::SubscriptionInactive(SubscriptionStatus::Expired))
        );

        record.account_status = AccountStatus::Inactive;
        assert_eq!(record.pause_reason(), Some(PauseReason::AccountInactive));
    }
}
