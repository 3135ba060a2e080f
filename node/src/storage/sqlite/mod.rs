use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};

use crate::storage::Storage;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded SQLite storage.
///
/// The dirty reader is the writer's own connection: only it sees the open
/// transaction, schema changes included. The consistent reader is a second
/// connection and relies on WAL snapshots.
pub struct SqliteStorage {
    path: String,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &str, create_if_not_exists: bool) -> anyhow::Result<Self> {
        let mut flags = OpenFlags::default();
        if !create_if_not_exists {
            flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        }

        let writer = Connection::open_with_flags(path, flags)?;
        let journal_mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        writer.busy_timeout(BUSY_TIMEOUT)?;

        let reader = Connection::open_with_flags(path, flags)?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        log::info!("Opened sqlite storage at {path}, journal mode {journal_mode}");
        Ok(Self {
            path: path.to_string(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }
}

impl Storage for SqliteStorage {
    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        self.reader.lock()
    }

    fn dirty_reader(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }

    fn close(self) -> anyhow::Result<()> {
        log::info!("Closing sqlite storage at {}", self.path);
        for connection in [self.reader, self.writer] {
            connection
                .into_inner()
                .close()
                .map_err(|(_, err)| anyhow::anyhow!(err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use uuid::Uuid;

    /// Fresh database file under the OS temp dir.
    pub(crate) fn temp_db_path(label: &str) -> String {
        let path: PathBuf = std::env::temp_dir().join(format!("sqlchain-{label}-{}.db", Uuid::new_v4()));
        path.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod test {
    use rusqlite::params;

    use super::test_support::temp_db_path;
    use super::*;

    #[test]
    fn dirty_reader_sees_uncommitted_writes() {
        let storage = SqliteStorage::open(&temp_db_path("storage"), true).unwrap();
        {
            let writer = storage.writer();
            writer
                .execute_batch("BEGIN; CREATE TABLE t (v INTEGER)")
                .unwrap();
            writer.execute("INSERT INTO t VALUES (?1)", params![1]).unwrap();
        }

        let dirty: i64 = storage
            .dirty_reader()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        let committed: i64 = storage
            .reader()
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 't'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(dirty, 1);
        assert_eq!(committed, 0);

        storage.writer().execute_batch("COMMIT").unwrap();
        let committed: i64 = storage
            .reader()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(committed, 1);

        storage.close().unwrap();
    }

    #[test]
    fn open_without_create_fails_for_missing_file() {
        assert!(SqliteStorage::open(&temp_db_path("missing"), false).is_err());
    }
}
