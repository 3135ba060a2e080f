use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::types::transaction::PendingTransaction;
use crate::state::{Query, Request, Response};
use crate::utilities::encoding::{self, Decode, Encode};
use crate::utilities::hash::HashType;
use crate::utilities::time::ChainTime;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockHeader {
    pub producer: String,
    pub height: u64,
    /// Zero hash for the genesis block.
    pub parent: HashType,
    pub timestamp: u64,
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let producer = &self.producer;
        let height = self.height;
        let parent = &self.parent;
        let time = ChainTime::from_millis(self.timestamp);
        write!(
            f,
            "producer: {producer}, height: {height}, parent: {parent}, time: {time}"
        )
    }
}

/// A write request together with the response its producer executed it with.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryRecord {
    pub request: Request,
    pub response: Response,
}

impl From<Query> for QueryRecord {
    fn from(query: Query) -> Self {
        Self {
            request: query.request,
            response: query.response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: HashType,
    pub queries: Vec<QueryRecord>,
    pub transactions: Vec<PendingTransaction>,
}

impl Block {
    pub fn new(
        header: BlockHeader,
        queries: Vec<QueryRecord>,
        transactions: Vec<PendingTransaction>,
    ) -> anyhow::Result<Self> {
        let hash = Self::compute_hash(&header, &queries, &transactions)?;
        Ok(Self {
            header,
            hash,
            queries,
            transactions,
        })
    }

    pub fn new_genesis(producer: &str, timestamp: u64) -> anyhow::Result<Self> {
        let header = BlockHeader {
            producer: producer.to_string(),
            height: 0,
            parent: HashType::zero(),
            timestamp,
        };
        Self::new(header, vec![], vec![])
    }

    pub fn is_genesis(&self) -> bool {
        self.header.parent.is_zero()
    }

    pub fn verify_hash(&self) -> anyhow::Result<bool> {
        let hash = Self::compute_hash(&self.header, &self.queries, &self.transactions)?;
        Ok(hash == self.hash)
    }

    fn compute_hash(
        header: &BlockHeader,
        queries: &[QueryRecord],
        transactions: &[PendingTransaction],
    ) -> anyhow::Result<HashType> {
        let bytes = encoding::encode((header, queries, transactions))?;
        Ok(HashType::digest(&bytes))
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "block {} [{}], queries: {}, transactions: {}",
            self.hash,
            self.header,
            self.queries.len(),
            self.transactions.len()
        )
    }
}

impl Encode for Block {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for Block {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genesis_has_zero_parent() {
        let genesis = Block::new_genesis("node-0", 1000).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.header.height, 0);
        assert!(genesis.verify_hash().unwrap());
    }

    #[test]
    fn hash_covers_header_and_payload() {
        let genesis = Block::new_genesis("node-0", 1000).unwrap();
        let header = BlockHeader {
            producer: "node-1".to_string(),
            height: 1,
            parent: genesis.hash,
            timestamp: 2000,
        };
        let tx = PendingTransaction::new(1, vec![1, 2, 3]).unwrap();
        let block = Block::new(header, vec![], vec![tx]).unwrap();
        assert!(block.verify_hash().unwrap());

        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);

        let mut tampered = block;
        tampered.transactions.clear();
        assert!(!tampered.verify_hash().unwrap());
    }
}
