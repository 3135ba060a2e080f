//! # Speculative transaction engine
//!
//! Writes execute immediately against an always-open "uncommitted" SQLite
//! transaction while the agreed order of requests is still being decided.
//! Every successful request leaves a savepoint behind, named after the
//! [`LogOffset`] the engine reached, and is appended to an ordered pool.
//!
//! The pool is what the node packages into a block on `commit`, and what
//! gets reconciled when the agreement layer finalizes an order different
//! from the local one (`partial_commit`).
//!
//! Locking: a single read/write lock serializes `write`, `replay`, `commit`,
//! `partial_commit` and `rollback`. Dirty reads skip it on purpose and can
//! interleave with writers between statements; `read_snapshot` holds it shared
//! for the whole request so all statements observe the same state.
//!
//! Reads run on the writer's connection, the only one that sees the
//! uncommitted transaction including its schema changes, inside a savepoint
//! that is always rolled back.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rusqlite::{Connection, Statement};
use serde::{Deserialize, Serialize};

pub use error::{Result, StateError};
pub use types::{
    LogOffset, NamedArg, Query, QueryType, Request, RequestHeader, Response, ResponseHeader,
    ResponsePayload, StatementQuery, Value,
};

use crate::state::pool::QueryPool;
use crate::storage::{SqliteStorage, Storage};
use crate::utilities::time::ChainTime;

mod error;
mod pool;
mod types;

/// How read requests arriving at [`State::query`] are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Statements run one by one, writers may interleave between them.
    Dirty,
    /// All statements of a request observe the same state.
    #[default]
    Snapshot,
}

struct Inner {
    pool: QueryPool,
}

pub struct State<S: Storage = SqliteStorage> {
    storage: S,
    node_id: String,
    read_mode: ReadMode,
    /// Current [`LogOffset`], readable without taking the lock.
    offset: AtomicU64,
    inner: RwLock<Inner>,
}

impl<S: Storage> State<S> {
    /// Opens the uncommitted transaction and the baseline savepoint at offset `(0, 0)`.
    pub fn open(storage: S, node_id: &str, read_mode: ReadMode) -> Result<Self> {
        Self::open_at_epoch(storage, node_id, read_mode, 0)
    }

    /// Like [`State::open`] but the log starts at `(epoch, 0)`.
    ///
    /// Peers replay each other's responses by offset, so a restarted node
    /// has to resume at the epoch matching the number of committed blocks.
    pub fn open_at_epoch(storage: S, node_id: &str, read_mode: ReadMode, epoch: u32) -> Result<Self> {
        let start = LogOffset::new(epoch, 0);
        let state = Self {
            storage,
            node_id: node_id.to_string(),
            read_mode,
            offset: AtomicU64::new(start.as_u64()),
            inner: RwLock::new(Inner {
                pool: QueryPool::new(start),
            }),
        };
        {
            let conn = state.storage.writer();
            conn.execute_batch("BEGIN")?;
            state.set_savepoint(&conn)?;
        }
        log::info!("Speculative state opened at {}", state.offset());
        Ok(state)
    }

    pub fn offset(&self) -> LogOffset {
        LogOffset::from_u64(self.offset.load(Ordering::SeqCst))
    }

    pub fn pool_size(&self) -> usize {
        self.inner.read().pool.len()
    }

    /// Copy of the pooled queries in execution order.
    pub fn pooled_queries(&self) -> Vec<Query> {
        self.inner.read().pool.queries().to_vec()
    }

    /// Public entry point for client requests.
    pub fn query(&self, request: &Request) -> Result<Response> {
        match request.header.query_type {
            QueryType::Read => match self.read_mode {
                ReadMode::Dirty => self.read(request),
                ReadMode::Snapshot => self.read_snapshot(request),
            },
            QueryType::Write => self.write(request),
            other => Err(StateError::InvalidRequest(other)),
        }
    }

    /// Replays a write log from another peer. Reads have nothing to replicate.
    pub fn replay_request(&self, request: &Request, response: &Response) -> Result<()> {
        match request.header.query_type {
            QueryType::Read => Ok(()),
            QueryType::Write => self.replay(request, response),
            other => Err(StateError::InvalidRequest(other)),
        }
    }

    /// Executes every statement on the dirty reader, observing uncommitted writes.
    ///
    /// The returned offset is advisory: concurrent writers may move the log
    /// between statements.
    pub fn read(&self, request: &Request) -> Result<Response> {
        let offset = self.offset();
        // Only the result of the last statement is returned.
        let mut payload = ResponsePayload::default();
        for (index, query) in request.queries.iter().enumerate() {
            let conn = self.storage.dirty_reader();
            payload = with_read_view(&conn, |conn| {
                Self::read_single(conn, query).map_err(|source| StateError::Execution { index, source })
            })?;
        }
        Ok(self.build_response(request, offset, payload))
    }

    /// Like [`State::read`] but writers are held off until every statement ran.
    pub fn read_snapshot(&self, request: &Request) -> Result<Response> {
        let _inner = self.inner.read();
        let conn = self.storage.dirty_reader();
        let offset = self.offset();
        let payload = with_read_view(&conn, |conn| Self::read_all(conn, request))?;
        Ok(self.build_response(request, offset, payload))
    }

    pub fn write(&self, request: &Request) -> Result<Response> {
        ensure_statements(request)?;
        let mut inner = self.inner.write();
        self.write_locked(&mut inner, request.clone())
    }

    /// Applies a request whose position in the log was decided by a remote producer.
    pub fn replay(&self, request: &Request, response: &Response) -> Result<()> {
        ensure_statements(request)?;
        let mut inner = self.inner.write();
        let conn = self.storage.writer();

        let savepoint = self.offset();
        let remote = response.header.log_offset;
        if remote != savepoint {
            log::warn!(
                "Replay of {} rejected: local offset {savepoint}, remote {remote}",
                request.hash
            );
            return Err(StateError::QueryConflict {
                local: savepoint,
                remote,
            });
        }

        let last_offset = self.execute_all(&conn, request, savepoint)?;
        log::debug!("Replayed {} at {savepoint}", request.hash);
        inner.pool.enqueue(Query {
            request: request.clone(),
            response: response.clone(),
            last_offset,
        });
        Ok(())
    }

    /// Durably commits every pooled write and starts the next epoch.
    ///
    /// Returns the flushed queries in execution order.
    pub fn commit(&self) -> Result<Vec<Query>> {
        let mut inner = self.inner.write();
        let conn = self.storage.writer();

        conn.execute_batch("COMMIT")?;
        conn.execute_batch("BEGIN")?;
        self.store_offset(self.offset().next_epoch());
        self.set_savepoint(&conn)?;

        let pool = std::mem::replace(&mut inner.pool, QueryPool::new(self.offset()));
        let queries = pool.into_queries();
        log::info!(
            "Committed {} queries, next epoch starts at {}",
            queries.len(),
            self.offset()
        );
        Ok(queries)
    }

    /// Reconciles the pool against the order finalized by the agreement layer.
    ///
    /// Entries up to the first mismatch are kept. Everything from the
    /// mismatch on is rolled back and executed again in its original order,
    /// so those requests receive offsets consistent with the agreed prefix.
    pub fn partial_commit(&self, agreed: &[Response]) -> Result<()> {
        let mut inner = self.inner.write();

        let local = inner.pool.len();
        if agreed.len() > local {
            log::warn!(
                "Partial commit refused, {local} local queries but {} agreed",
                agreed.len()
            );
            return Err(StateError::LocalBehindRemote {
                local,
                remote: agreed.len(),
            });
        }

        let diverged = inner
            .pool
            .queries()
            .iter()
            .zip(agreed)
            .position(|(local, remote)| !local.matches(remote));
        let Some(index) = diverged else {
            log::debug!("Partial commit: all {} agreed queries match", agreed.len());
            return Ok(());
        };

        let target = inner.pool.offset_at(index);
        log::info!(
            "Partial commit diverged at #{index}, rolling back to {target} and rewriting {} queries",
            local - index
        );
        {
            let conn = self.storage.writer();
            self.rollback_to(&conn, target)?;
        }
        let discarded = inner.pool.split_off(index);

        // A rewrite that no longer applies is dropped, the rest still run.
        let mut first_error = None;
        for query in discarded {
            let hash = query.request.hash;
            if let Err(err) = self.write_locked(&mut inner, query.request) {
                log::warn!("Rewrite of {hash} failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Discards the whole uncommitted transaction and every pooled write.
    ///
    /// The sequence restarts at zero within the current epoch and a fresh
    /// uncommitted transaction is opened.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let conn = self.storage.writer();

        conn.execute_batch("ROLLBACK")?;
        self.store_offset(self.offset().reset_sequence());
        conn.execute_batch("BEGIN")?;
        self.set_savepoint(&conn)?;

        let discarded = std::mem::replace(&mut inner.pool, QueryPool::new(self.offset()));
        log::warn!(
            "Rolled back uncommitted state, {} pooled queries discarded",
            discarded.len()
        );
        Ok(())
    }

    /// Commits or discards the uncommitted transaction and releases the storage.
    pub fn close(self, commit: bool) -> anyhow::Result<()> {
        {
            let conn = self.storage.writer();
            if commit {
                conn.execute_batch("COMMIT")?;
            } else {
                conn.execute_batch("ROLLBACK")?;
            }
        }
        log::info!("Speculative state closed at {}, commit: {commit}", self.offset());
        self.storage.close()
    }

    fn write_locked(&self, inner: &mut Inner, request: Request) -> Result<Response> {
        let conn = self.storage.writer();
        let savepoint = self.offset();
        let last_offset = self.execute_all(&conn, &request, savepoint)?;

        let response = self.build_response(&request, savepoint, Default::default());
        log::debug!(
            "Executed {} from {savepoint} to {last_offset}",
            request.hash
        );
        inner.pool.enqueue(Query {
            request,
            response: response.clone(),
            last_offset,
        });
        Ok(response)
    }

    /// Runs every statement of the request, or none of them.
    fn execute_all(
        &self,
        conn: &Connection,
        request: &Request,
        savepoint: LogOffset,
    ) -> Result<LogOffset> {
        for (index, query) in request.queries.iter().enumerate() {
            if let Err(source) = Self::execute_single(conn, query) {
                log::warn!(
                    "Statement #{index} of {} failed, rolling back to {savepoint}: {source}",
                    request.hash
                );
                self.rollback_to(conn, savepoint)?;
                return Err(StateError::Execution { index, source });
            }
            self.offset.fetch_add(1, Ordering::SeqCst);
        }
        self.set_savepoint(conn)
    }

    fn execute_single(conn: &Connection, query: &StatementQuery) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&query.pattern)?;
        bind_args(&mut stmt, &query.args)?;
        stmt.raw_execute()
    }

    fn read_all(conn: &Connection, request: &Request) -> Result<ResponsePayload> {
        let mut payload = ResponsePayload::default();
        for (index, query) in request.queries.iter().enumerate() {
            payload = Self::read_single(conn, query)
                .map_err(|source| StateError::Execution { index, source })?;
        }
        Ok(payload)
    }

    fn read_single(conn: &Connection, query: &StatementQuery) -> rusqlite::Result<ResponsePayload> {
        let mut stmt = conn.prepare_cached(&query.pattern)?;
        bind_args(&mut stmt, &query.args)?;

        let columns = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let decl_types = stmt
            .columns()
            .iter()
            .map(|column| column.decl_type().unwrap_or_default().to_string())
            .collect::<Vec<_>>();

        let column_count = columns.len();
        let mut data = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(Value::from(row.get_ref(i)?));
            }
            data.push(values);
        }

        Ok(ResponsePayload {
            columns,
            decl_types,
            rows: data,
        })
    }

    fn set_savepoint(&self, conn: &Connection) -> Result<LogOffset> {
        let savepoint = self.offset();
        conn.execute_batch(&format!("SAVEPOINT {}", savepoint_name(savepoint)))?;
        Ok(savepoint)
    }

    fn rollback_to(&self, conn: &Connection, savepoint: LogOffset) -> Result<()> {
        conn.execute_batch(&format!("ROLLBACK TO {}", savepoint_name(savepoint)))?;
        self.store_offset(savepoint);
        Ok(())
    }

    fn store_offset(&self, offset: LogOffset) {
        self.offset.store(offset.as_u64(), Ordering::SeqCst);
    }

    fn build_response(
        &self,
        request: &Request,
        offset: LogOffset,
        payload: ResponsePayload,
    ) -> Response {
        Response {
            header: ResponseHeader {
                request_hash: request.hash,
                node_id: self.node_id.clone(),
                timestamp: ChainTime::now(),
                row_count: payload.rows.len() as u64,
                log_offset: offset,
            },
            payload,
        }
    }
}

/// Runs `read` inside a savepoint that is rolled back afterwards, whatever the outcome.
fn with_read_view<T>(conn: &Connection, read: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("SAVEPOINT read_view")?;
    let result = read(conn);
    conn.execute_batch("ROLLBACK TO read_view; RELEASE read_view")?;
    result
}

fn ensure_statements(request: &Request) -> Result<()> {
    if request.queries.is_empty() {
        return Err(StateError::EmptyRequest(request.hash));
    }
    Ok(())
}

fn savepoint_name(offset: LogOffset) -> String {
    format!("sp_{}", offset.as_u64())
}

fn bind_args(stmt: &mut Statement<'_>, args: &[NamedArg]) -> rusqlite::Result<()> {
    for (position, arg) in args.iter().enumerate() {
        let index = if arg.name.is_empty() {
            position + 1
        } else {
            let name = if arg.name.starts_with([':', '@', '$']) {
                arg.name.clone()
            } else {
                format!(":{}", arg.name)
            };
            stmt.parameter_index(&name)?
                .ok_or(rusqlite::Error::InvalidParameterName(name))?
        };
        stmt.raw_bind_parameter(index, &arg.value)?;
    }
    Ok(())
}
