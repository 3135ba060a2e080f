//! # Block tree
//!
//! Blocks reference their parent by hash. The node keeps every block it has
//! accepted since genesis in an in-memory tree, tracks the current heads
//! (blocks without a known child) and the last block the network treats as
//! irreversible.
//!
//! The tree is never persisted as such. At startup it is reconstructed from
//! the block records in the order they were stored, which guarantees that a
//! parent is always seen before its children.

use thiserror::Error;

use crate::utilities::hash::HashType;

pub mod tree;
pub mod types;

pub use tree::{BlockNode, BlockTree};
pub use types::block::{Block, BlockHeader, QueryRecord};
pub use types::transaction::PendingTransaction;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("More than one genesis block, offending block: {0}")]
    MultipleGenesis(HashType),
    #[error("Parent block not found: {0}")]
    ParentNotFound(HashType),
    #[error("Parent block not found: unknown irreversible reference {0}")]
    UnknownIrreversible(HashType),
    #[error("Block {block} does not descend from {ancestor}")]
    NotAnAncestor { ancestor: HashType, block: HashType },
}
