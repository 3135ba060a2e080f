//! Requests, responses and log offsets exchanged with the speculative engine.

use std::fmt::Display;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::utilities::encoding;
use crate::utilities::hash::HashType;
use crate::utilities::time::ChainTime;

/// Composite `(epoch, sequence)` position in the local speculative write history.
///
/// High 32 bits hold the commit epoch, low 32 bits the sequence within the epoch,
/// so the natural `u64` ordering is the lexicographic `(epoch, sequence)` ordering.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogOffset(u64);

impl LogOffset {
    const EPOCH_MASK: u64 = 0xffff_ffff_0000_0000;

    pub fn new(epoch: u32, sequence: u32) -> Self {
        Self((u64::from(epoch) << 32) | u64::from(sequence))
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn epoch(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn sequence(&self) -> u32 {
        self.0 as u32
    }

    pub(crate) fn next_epoch(&self) -> Self {
        Self((self.0 & Self::EPOCH_MASK) + (1 << 32))
    }

    pub(crate) fn reset_sequence(&self) -> Self {
        Self(self.0 & Self::EPOCH_MASK)
    }
}

impl Display for LogOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.epoch(), self.sequence())
    }
}

impl std::fmt::Debug for LogOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogOffset{self}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Read,
    Write,
    /// Any tag this node does not know how to execute.
    Unsupported(u32),
}

impl Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Read => write!(f, "read"),
            QueryType::Write => write!(f, "write"),
            QueryType::Unsupported(tag) => write!(f, "unsupported({tag})"),
        }
    }
}

/// SQL value carried in arguments and result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b.as_slice()),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// Statement argument. An empty name binds by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArg {
    pub name: String,
    pub value: Value,
}

impl NamedArg {
    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
        }
    }

    pub fn named(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementQuery {
    pub pattern: String,
    pub args: Vec<NamedArg>,
}

impl StatementQuery {
    pub fn new(pattern: &str, args: Vec<NamedArg>) -> Self {
        Self {
            pattern: pattern.to_string(),
            args,
        }
    }
}

impl From<&str> for StatementQuery {
    fn from(pattern: &str) -> Self {
        Self::new(pattern, vec![])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub query_type: QueryType,
    pub node_id: String,
    pub timestamp: u64,
    /// Distinguishes otherwise identical requests from one client.
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub header: RequestHeader,
    pub queries: Vec<StatementQuery>,
    /// Identity of the request, blake2-256 over header and queries.
    pub hash: HashType,
}

impl Request {
    pub fn new(
        query_type: QueryType,
        node_id: &str,
        queries: Vec<StatementQuery>,
    ) -> anyhow::Result<Self> {
        let header = RequestHeader {
            query_type,
            node_id: node_id.to_string(),
            timestamp: ChainTime::now(),
            request_id: crate::utilities::id::generate_request_id(),
        };
        let hash = Self::compute_hash(&header, &queries)?;
        Ok(Self {
            header,
            queries,
            hash,
        })
    }

    pub fn read(node_id: &str, queries: Vec<StatementQuery>) -> anyhow::Result<Self> {
        Self::new(QueryType::Read, node_id, queries)
    }

    pub fn write(node_id: &str, queries: Vec<StatementQuery>) -> anyhow::Result<Self> {
        Self::new(QueryType::Write, node_id, queries)
    }

    pub fn verify_hash(&self) -> anyhow::Result<bool> {
        Ok(Self::compute_hash(&self.header, &self.queries)? == self.hash)
    }

    fn compute_hash(header: &RequestHeader, queries: &[StatementQuery]) -> anyhow::Result<HashType> {
        let bytes = encoding::encode((header, queries))?;
        Ok(HashType::digest(&bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub request_hash: HashType,
    pub node_id: String,
    pub timestamp: u64,
    pub row_count: u64,
    /// Offset the engine was at when the request started executing.
    pub log_offset: LogOffset,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub columns: Vec<String>,
    pub decl_types: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub header: ResponseHeader,
    pub payload: ResponsePayload,
}

/// One executed write request buffered in the speculative pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub request: Request,
    pub response: Response,
    /// Offset (and savepoint) established right after the request executed.
    pub last_offset: LogOffset,
}

impl Query {
    pub fn start_offset(&self) -> LogOffset {
        self.response.header.log_offset
    }

    /// Same request executed at the same position in the log.
    pub(crate) fn matches(&self, remote: &Response) -> bool {
        self.request.hash == remote.header.request_hash
            && self.response.header.log_offset == remote.header.log_offset
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log_offset_components() {
        let offset = LogOffset::new(3, 7);
        assert_eq!(offset.epoch(), 3);
        assert_eq!(offset.sequence(), 7);
        assert_eq!(offset.next_epoch(), LogOffset::new(4, 0));
        assert_eq!(offset.reset_sequence(), LogOffset::new(3, 0));
    }

    #[test]
    fn log_offset_orders_by_epoch_then_sequence() {
        assert!(LogOffset::new(0, u32::MAX) < LogOffset::new(1, 0));
        assert!(LogOffset::new(1, 1) < LogOffset::new(1, 2));
    }

    #[test]
    fn request_hash_covers_queries() {
        let request = Request::write("node", vec!["INSERT INTO t VALUES (1)".into()]).unwrap();
        assert!(request.verify_hash().unwrap());

        let mut tampered = request.clone();
        tampered.queries[0].pattern = "DELETE FROM t".to_string();
        assert!(!tampered.verify_hash().unwrap());
    }
}
