//! Last-applied version bookkeeping

use std::collections::HashMap;

use crate::domain::{AccountId, ConfigKind};

/// Last-applied version per (account, config kind).
///
/// `Some(None)` means a config was applied while the version token was absent;
/// it never matches an observed token, so the next check refetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedVersions {
    applied: HashMap<(AccountId, ConfigKind), Option<u64>>,
}

impl AppliedVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when nothing was ever applied for this key
    pub fn get(&self, account: &AccountId, kind: ConfigKind) -> Option<Option<u64>> {
        self.applied.get(&(account.clone(), kind)).copied()
    }

    pub fn record(&mut self, account: &AccountId, kind: ConfigKind, version: Option<u64>) {
        self.applied.insert((account.clone(), kind), version);
    }

    pub fn forget(&mut self, account: &AccountId, kind: ConfigKind) {
        self.applied.remove(&(account.clone(), kind));
    }

    /// Whether an observed token calls for a full refetch.
    ///
    /// An absent token is "refetch required", never "already synced".
    pub fn needs_refetch(&self, account: &AccountId, kind: ConfigKind, observed: Option<u64>) -> bool {
        match (observed, self.get(account, kind)) {
            (None, _) => true,
            (Some(observed), Some(Some(applied))) => observed != applied,
            (Some(_), _) => true,
        }
    }

    /// Drop strategy entries of `account` that are no longer assigned
    pub fn retain_strategies(&mut self, account: &AccountId, assigned: &[u64]) {
        self.applied.retain(|(acct, kind), _| match kind {
            ConfigKind::Strategy(id) if acct == account => assigned.contains(id),
            _ => true,
        });
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}
