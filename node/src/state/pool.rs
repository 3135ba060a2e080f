use crate::state::types::{LogOffset, Query};

/// Ordered buffer of executed writes awaiting commit or reconciliation.
///
/// Insertion order is the authoritative execution order for replay.
#[derive(Debug)]
pub(crate) struct QueryPool {
    /// Offset the pool started at, the rollback target when nothing in it survives.
    base: LogOffset,
    queries: Vec<Query>,
}

impl QueryPool {
    pub(crate) fn new(base: LogOffset) -> Self {
        Self {
            base,
            queries: Vec::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, query: Query) {
        log::trace!(
            "Enqueue query {} at {}",
            query.request.hash,
            query.start_offset()
        );
        self.queries.push(query);
    }

    pub(crate) fn len(&self) -> usize {
        self.queries.len()
    }

    pub(crate) fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Offset at which the entry at `index` started, or the pool tail offset
    /// when `index` is past the end.
    pub(crate) fn offset_at(&self, index: usize) -> LogOffset {
        match self.queries.get(index) {
            Some(query) => query.start_offset(),
            None => self.queries.last().map_or(self.base, |q| q.last_offset),
        }
    }

    /// Keeps entries before `index`, returns the rest in their original order.
    pub(crate) fn split_off(&mut self, index: usize) -> Vec<Query> {
        self.queries.split_off(index)
    }

    pub(crate) fn into_queries(self) -> Vec<Query> {
        self.queries
    }
}
