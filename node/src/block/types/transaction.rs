use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::utilities::encoding::{self, Decode, Encode};
use crate::utilities::hash::HashType;

/// Opaque transaction waiting in the pool until a block includes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Application defined kind of the payload.
    pub tx_type: u32,
    pub payload: Vec<u8>,
    pub hash: HashType,
}

impl PendingTransaction {
    pub fn new(tx_type: u32, payload: Vec<u8>) -> anyhow::Result<Self> {
        let hash = HashType::digest(&encoding::encode((tx_type, &payload))?);
        Ok(Self {
            tx_type,
            payload,
            hash,
        })
    }
}

impl Display for PendingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx {} (type {})", self.hash, self.tx_type)
    }
}

impl Encode for PendingTransaction {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for PendingTransaction {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}
