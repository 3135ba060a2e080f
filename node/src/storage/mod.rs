//! Persistence gateway.
//!
//! A storage hands out three kinds of access over the same database:
//! an exclusive writer, a reader that only observes committed state and a
//! "dirty" reader that also observes the writer's uncommitted changes.

use parking_lot::MutexGuard;
use rusqlite::Connection;

pub mod chain;
pub mod sqlite;

pub use sqlite::SqliteStorage;

pub trait Storage: Send + Sync {
    /// Exclusive transactional handle. All mutation goes through it.
    fn writer(&self) -> MutexGuard<'_, Connection>;

    /// Consistent reads of committed state.
    fn reader(&self) -> MutexGuard<'_, Connection>;

    /// Reads which observe the writer's uncommitted changes, schema included.
    ///
    /// May hand out the writer itself, so never hold both at once.
    fn dirty_reader(&self) -> MutexGuard<'_, Connection>;

    fn close(self) -> anyhow::Result<()>
    where
        Self: Sized;
}
