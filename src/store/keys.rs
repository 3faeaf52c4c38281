//! Key schema for the ephemeral store
//!
//! All keys live under the `bot:` namespace and are scoped to one account, so
//! no two bots ever write the same key.

use crate::domain::{AccountId, ConfigKind};

pub const HEARTBEAT_PREFIX: &str = "bot:heartbeat:";
pub const SERVER_STATUS_PREFIX: &str = "bot:server_status:";
pub const TRADE_CONFIG_PREFIX: &str = "bot:trade_config:";
pub const STRATEGY_CONFIG_PREFIX: &str = "bot:strategy_config:";

/// Field holding the version token
pub const VERSION_FIELD: &str = "version";
/// Field stamped alongside every version bump
pub const UPDATED_AT_FIELD: &str = "updated_at";

pub fn heartbeat(account: &AccountId) -> String {
    format!("{}{}", HEARTBEAT_PREFIX, account)
}

pub fn server_status(account: &AccountId) -> String {
    format!("{}{}", SERVER_STATUS_PREFIX, account)
}

pub fn version(account: &AccountId, kind: ConfigKind) -> String {
    match kind {
        ConfigKind::Trade => format!("{}{}", TRADE_CONFIG_PREFIX, account),
        ConfigKind::Strategy(id) => format!("{}{}:{}", STRATEGY_CONFIG_PREFIX, account, id),
    }
}

/// Account id from a heartbeat or server status key
pub fn account_from_key(key: &str) -> Option<AccountId> {
    key.strip_prefix(HEARTBEAT_PREFIX)
        .or_else(|| key.strip_prefix(SERVER_STATUS_PREFIX))
        .filter(|id| !id.is_empty())
        .map(AccountId::from)
}
