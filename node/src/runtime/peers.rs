use std::fmt::Display;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agreement::Agreement;
use crate::logging::pretty_json;

/// Ordered peer membership as seen by the agreement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet {
    pub version: u64,
    pub term: u64,
    pub leader: String,
    pub servers: Vec<String>,
}

impl PeerSet {
    pub fn new(servers: Vec<String>, leader: &str) -> anyhow::Result<Self> {
        if !servers.iter().any(|s| s == leader) {
            anyhow::bail!("Leader {leader} is not one of the peers");
        }
        Ok(Self {
            version: 1,
            term: 0,
            leader: leader.to_string(),
            servers,
        })
    }

    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.servers.iter().position(|s| s == node_id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Display for PeerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "v{} term {} leader {} of {} peers",
            self.version,
            self.term,
            self.leader,
            self.servers.len()
        )
    }
}

/// Rotates the nominal leader every `update_terms` production cycles.
#[derive(Debug)]
pub struct PeerManager {
    base_leader_index: usize,
    update_terms: u64,
    peers: Mutex<PeerSet>,
}

impl PeerManager {
    pub fn new(peers: PeerSet, update_terms: u64) -> anyhow::Result<Self> {
        let base_leader_index = peers
            .index_of(&peers.leader)
            .ok_or_else(|| anyhow::anyhow!("Leader {} is not one of the peers", peers.leader))?;
        Ok(Self {
            base_leader_index,
            update_terms,
            peers: Mutex::new(peers),
        })
    }

    /// Copy of the current peer set.
    pub fn current_peers(&self) -> PeerSet {
        self.peers.lock().clone()
    }

    /// Recomputes term and leader for `cycle` and republishes the peer set.
    ///
    /// A zero rotation period disables rotation entirely. Agreement failures
    /// are logged, the local peer set is updated regardless.
    pub fn rotate_peers<A: Agreement>(&self, cycle: u64, agreement: &A) {
        if self.update_terms == 0 {
            return;
        }
        let mut peers = self.peers.lock();
        let term = cycle / self.update_terms;
        let index = (self.base_leader_index as u64 + term) % peers.servers.len() as u64;
        *peers = PeerSet {
            version: peers.version,
            term,
            leader: peers.servers[index as usize].clone(),
            servers: peers.servers.clone(),
        };
        log::debug!("Peers rotated: {}", pretty_json(&*peers));
        if let Err(err) = agreement.update_peers(&peers) {
            log::error!("Failed to publish peer set {}: {err}", *peers);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::agreement::test_support::RecordingAgreement;

    use super::*;

    fn peers() -> PeerSet {
        PeerSet::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            "b",
        )
        .unwrap()
    }

    #[test]
    fn rejects_unknown_leader() {
        assert!(PeerSet::new(vec!["a".to_string()], "z").is_err());
    }

    #[test]
    fn rotation_follows_terms() {
        let manager = PeerManager::new(peers(), 2).unwrap();
        let agreement = RecordingAgreement::default();

        let expected = [(0, "b"), (1, "b"), (2, "c"), (3, "c"), (4, "a"), (6, "b")];
        for (cycle, leader) in expected {
            manager.rotate_peers(cycle, &agreement);
            let current = manager.current_peers();
            assert_eq!(current.leader, leader, "cycle {cycle}");
            assert_eq!(current.term, cycle / 2);
            assert_eq!(current.version, 1);
            assert_eq!(current.servers.len(), 3);
        }
        assert_eq!(agreement.peer_updates().len(), expected.len());
    }

    #[test]
    fn zero_period_disables_rotation() {
        let manager = PeerManager::new(peers(), 0).unwrap();
        let agreement = RecordingAgreement::default();
        manager.rotate_peers(10, &agreement);
        assert_eq!(manager.current_peers(), peers());
        assert!(agreement.peer_updates().is_empty());
    }
}
