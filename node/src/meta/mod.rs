//! Auxiliary chain state: accounts, shard chain profiles and providers.
//!
//! Payloads are opaque to the node. They are cached in memory after startup
//! and only change through storage procedures committed together with the
//! cache update.

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaKind {
    Account,
    ShardChain,
    Provider,
}

impl MetaKind {
    pub const ALL: [MetaKind; 3] = [MetaKind::Account, MetaKind::ShardChain, MetaKind::Provider];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            MetaKind::Account => "accounts",
            MetaKind::ShardChain => "shard_chains",
            MetaKind::Provider => "providers",
        }
    }
}

impl Display for MetaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaChange {
    Update {
        kind: MetaKind,
        key: String,
        payload: Vec<u8>,
    },
    Delete {
        kind: MetaKind,
        key: String,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetaState {
    pub accounts: HashMap<String, Vec<u8>>,
    pub shard_chains: HashMap<String, Vec<u8>>,
    pub providers: HashMap<String, Vec<u8>>,
}

impl MetaState {
    pub fn records(&self, kind: MetaKind) -> &HashMap<String, Vec<u8>> {
        match kind {
            MetaKind::Account => &self.accounts,
            MetaKind::ShardChain => &self.shard_chains,
            MetaKind::Provider => &self.providers,
        }
    }

    pub fn get(&self, kind: MetaKind, key: &str) -> Option<&[u8]> {
        self.records(kind).get(key).map(Vec::as_slice)
    }

    pub(crate) fn records_mut(&mut self, kind: MetaKind) -> &mut HashMap<String, Vec<u8>> {
        match kind {
            MetaKind::Account => &mut self.accounts,
            MetaKind::ShardChain => &mut self.shard_chains,
            MetaKind::Provider => &mut self.providers,
        }
    }

    pub(crate) fn apply(&mut self, change: MetaChange) {
        match change {
            MetaChange::Update { kind, key, payload } => {
                self.records_mut(kind).insert(key, payload);
            }
            MetaChange::Delete { kind, key } => {
                self.records_mut(kind).remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn apply_updates_and_deletes() {
        let mut state = MetaState::default();
        state.apply(MetaChange::Update {
            kind: MetaKind::Provider,
            key: "p1".to_string(),
            payload: vec![1],
        });
        assert_eq!(state.get(MetaKind::Provider, "p1"), Some(&[1u8][..]));
        assert!(state.accounts.is_empty());

        state.apply(MetaChange::Delete {
            kind: MetaKind::Provider,
            key: "p1".to_string(),
        });
        assert!(state.get(MetaKind::Provider, "p1").is_none());
    }
}
