//! Per-node replicated state machine of a SQL chain.
//!
//! A node takes turns with its peers producing blocks, keeps the accepted
//! blocks as a tree rooted at genesis and executes client SQL speculatively
//! so that the writes of a block can be packaged, replayed by followers and
//! reconciled with the order the peers agreed on.

pub mod agreement;
pub mod block;
pub mod cli;
pub mod config;
pub mod core;
pub mod logging;
pub mod meta;
pub mod runtime;
pub mod state;
pub mod storage;
pub(crate) mod utilities;

pub use crate::core::node::{Node, NodeError};
pub use crate::utilities::HashType;
