//! Boundary to the consensus protocol that orders blocks between peers.

use crate::block::Block;
use crate::runtime::PeerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    /// The block was agreed on and can be accepted right away.
    Accepted,
    /// Outcome arrives later through the node's accept/finalize callbacks.
    Pending,
}

pub trait Agreement: Send + Sync {
    fn update_peers(&self, peers: &PeerSet) -> anyhow::Result<()>;

    fn propose(&self, block: &Block) -> anyhow::Result<Proposal>;
}

/// Single node agreement: every proposal is accepted immediately.
#[derive(Debug, Default)]
pub struct SoloAgreement;

impl SoloAgreement {
    pub fn new() -> Self {
        Self
    }
}

impl Agreement for SoloAgreement {
    fn update_peers(&self, peers: &PeerSet) -> anyhow::Result<()> {
        log::trace!("Solo agreement peers: {peers}");
        Ok(())
    }

    fn propose(&self, block: &Block) -> anyhow::Result<Proposal> {
        log::debug!("Solo agreement accepts {}", block.hash);
        Ok(Proposal::Accepted)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;

    use super::*;

    /// Remembers everything it is told and answers proposals with a fixed outcome.
    #[derive(Debug)]
    pub(crate) struct RecordingAgreement {
        outcome: Proposal,
        peer_updates: Mutex<Vec<PeerSet>>,
        proposals: Mutex<Vec<Block>>,
    }

    impl Default for RecordingAgreement {
        fn default() -> Self {
            Self::with_outcome(Proposal::Accepted)
        }
    }

    impl RecordingAgreement {
        pub(crate) fn with_outcome(outcome: Proposal) -> Self {
            Self {
                outcome,
                peer_updates: Mutex::new(vec![]),
                proposals: Mutex::new(vec![]),
            }
        }

        pub(crate) fn peer_updates(&self) -> Vec<PeerSet> {
            self.peer_updates.lock().clone()
        }

        pub(crate) fn proposals(&self) -> Vec<Block> {
            self.proposals.lock().clone()
        }
    }

    impl Agreement for RecordingAgreement {
        fn update_peers(&self, peers: &PeerSet) -> anyhow::Result<()> {
            self.peer_updates.lock().push(peers.clone());
            Ok(())
        }

        fn propose(&self, block: &Block) -> anyhow::Result<Proposal> {
            self.proposals.lock().push(block.clone());
            Ok(self.outcome)
        }
    }
}
