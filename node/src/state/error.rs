use thiserror::Error;

use crate::state::types::{LogOffset, QueryType};
use crate::utilities::hash::HashType;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Unsupported query type: {0}")]
    InvalidRequest(QueryType),
    #[error("Write request {0} has no statements")]
    EmptyRequest(HashType),
    #[error("Query conflict: local log is at {local}, remote expects {remote}")]
    QueryConflict { local: LogOffset, remote: LogOffset },
    #[error("Local pool is behind remote: {local} local queries, {remote} agreed")]
    LocalBehindRemote { local: usize, remote: usize },
    #[error("Query at #{index} failed: {source}")]
    Execution {
        index: usize,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
