//! Durable chain records: blocks, the pending transaction pool, the
//! irreversible marker and the auxiliary meta tables.

use rusqlite::Connection;

use crate::block::{Block, BlockTree, PendingTransaction};
use crate::core::fatal;
use crate::meta::MetaState;
use crate::storage::{SqliteStorage, Storage};

pub use store::StorageProcedure;

pub mod query;
pub mod store;

mod migrations {
    use refinery::embed_migrations;

    embed_migrations!("migrations");
}

/// Everything a node needs from disk before it can take part in scheduling.
#[derive(Debug)]
pub struct ChainState {
    pub tree: BlockTree,
    pub meta: MetaState,
    pub tx_pool: Vec<PendingTransaction>,
}

pub struct ChainStore {
    storage: SqliteStorage,
}

impl ChainStore {
    pub fn open(path: &str, create_if_not_exists: bool) -> anyhow::Result<Self> {
        log::info!("Starting chain store with path: {path}");
        let storage = SqliteStorage::open(path, create_if_not_exists)?;
        Self::run_migrations(&mut storage.writer())?;
        Ok(Self { storage })
    }

    /// Runs all procedures in one transaction.
    ///
    /// A failing procedure rolls the transaction back and its error is
    /// returned. `callback` runs only after a successful commit. A failed
    /// commit leaves durable state unknown and aborts the process.
    pub fn store<F>(&self, procedures: Vec<StorageProcedure>, callback: F) -> anyhow::Result<()>
    where
        F: FnOnce(),
    {
        let mut conn = self.storage.writer();
        let tx = conn.transaction()?;
        let count = procedures.len();
        for (index, procedure) in procedures.into_iter().enumerate() {
            if let Err(err) = procedure(&tx) {
                log::warn!("Storage procedure #{index} failed, rolling back: {err}");
                tx.rollback()?;
                return Err(err);
            }
        }
        if let Err(err) = tx.commit() {
            fatal(format!("Chain store commit failed: {err}"));
        }
        log::trace!("Stored {count} procedures");
        callback();
        Ok(())
    }

    /// Stores `genesis` as the first block and irreversible marker of an empty database.
    ///
    /// Returns `false` when the database already holds a chain.
    pub fn bootstrap(&self, genesis: &Block) -> anyhow::Result<bool> {
        let (irreversible, blocks) = {
            let conn = self.storage.reader();
            (query::load_irreversible_hash(&conn)?, query::count_blocks(&conn)?)
        };
        match irreversible {
            Some(_) => Ok(false),
            None if blocks == 0 => {
                log::info!("Empty chain store, writing genesis {genesis}");
                self.store(
                    vec![
                        store::add_block(genesis),
                        store::update_irreversible(genesis.hash),
                    ],
                    || {},
                )?;
                Ok(true)
            }
            None => anyhow::bail!("Chain store holds {blocks} blocks but no irreversible marker"),
        }
    }

    /// Irreversible marker, block tree, meta caches and transaction pool, in that order.
    pub fn load_database(&self) -> anyhow::Result<ChainState> {
        let conn = self.storage.reader();
        let irreversible = query::load_irreversible_hash(&conn)?
            .ok_or_else(|| anyhow::anyhow!("Irreversible marker missing"))?;
        let tree = query::load_blocks(&conn, irreversible)?;
        let meta = query::load_meta_state(&conn)?;
        let tx_pool = query::load_tx_pool(&conn)?;
        Ok(ChainState {
            tree,
            meta,
            tx_pool,
        })
    }

    pub fn close(self) -> anyhow::Result<()> {
        self.storage.close()
    }

    fn run_migrations(connection: &mut Connection) -> anyhow::Result<()> {
        log::info!("Running database migrations");
        match migrations::migrations::runner().run(connection) {
            Ok(report) => {
                log::info!(
                    "Database migrations completed, applied: {}",
                    report.applied_migrations().len()
                );
                Ok(())
            }
            Err(err) => {
                log::error!("Database migrations failed: {err}");
                Err(anyhow::anyhow!(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::block::{BlockHeader, ChainError};
    use crate::meta::{MetaChange, MetaKind};
    use crate::storage::sqlite::test_support::temp_db_path;

    use super::*;

    fn child(parent: &Block) -> Block {
        let header = BlockHeader {
            producer: "node-1".to_string(),
            height: parent.header.height + 1,
            parent: parent.hash,
            timestamp: parent.header.timestamp + 10,
        };
        Block::new(header, vec![], vec![]).unwrap()
    }

    #[test]
    fn bootstrap_then_load() {
        let path = temp_db_path("chain");
        let chain = ChainStore::open(&path, true).unwrap();
        let genesis = Block::new_genesis("node-0", 1_000).unwrap();

        assert!(chain.bootstrap(&genesis).unwrap());
        assert!(!chain.bootstrap(&genesis).unwrap());

        let b1 = child(&genesis);
        let b2 = child(&b1);
        let tx = PendingTransaction::new(7, b"payload".to_vec()).unwrap();
        chain
            .store(
                vec![
                    store::add_block(&b1),
                    store::add_block(&b2),
                    store::add_transaction(&tx),
                    store::update_account("alice", vec![1, 2]),
                    store::update_provider("p", vec![3]),
                    store::meta_change(&MetaChange::Update {
                        kind: MetaKind::ShardChain,
                        key: "s".to_string(),
                        payload: vec![4],
                    }),
                ],
                || {},
            )
            .unwrap();
        chain.close().unwrap();

        let chain = ChainStore::open(&path, false).unwrap();
        let loaded = chain.load_database().unwrap();
        assert_eq!(loaded.tree.len(), 3);
        assert_eq!(loaded.tree.best_head().hash(), b2.hash);
        assert_eq!(loaded.tree.irreversible().hash(), genesis.hash);
        assert_eq!(loaded.tx_pool, vec![tx.clone()]);
        assert_eq!(loaded.meta.get(MetaKind::Account, "alice"), Some(&[1u8, 2][..]));
        assert_eq!(loaded.meta.get(MetaKind::ShardChain, "s"), Some(&[4u8][..]));
        assert_eq!(loaded.meta.providers.len(), 1);

        chain
            .store(
                vec![
                    store::delete_transactions(&[tx.hash]),
                    store::delete_account("alice"),
                    store::update_irreversible(b1.hash),
                ],
                || {},
            )
            .unwrap();
        let loaded = chain.load_database().unwrap();
        assert!(loaded.tx_pool.is_empty());
        assert!(loaded.meta.accounts.is_empty());
        assert_eq!(loaded.tree.irreversible().hash(), b1.hash);
    }

    #[test]
    fn failed_procedure_rolls_back_and_skips_callback() {
        let chain = ChainStore::open(&temp_db_path("chain"), true).unwrap();
        let genesis = Block::new_genesis("node-0", 0).unwrap();
        chain.bootstrap(&genesis).unwrap();

        let mut called = false;
        let failing: StorageProcedure = Box::new(|_: &rusqlite::Transaction<'_>| Err(anyhow::anyhow!("boom")));
        let result = chain.store(
            vec![store::update_provider("p", vec![1]), failing],
            || called = true,
        );

        assert!(result.is_err());
        assert!(!called);
        assert!(chain.load_database().unwrap().meta.providers.is_empty());
    }

    #[test]
    fn load_fails_on_orphan_block() {
        let chain = ChainStore::open(&temp_db_path("chain"), true).unwrap();
        let genesis = Block::new_genesis("node-0", 0).unwrap();
        chain.bootstrap(&genesis).unwrap();
        let b1 = child(&genesis);
        chain
            .store(vec![store::add_block(&child(&b1))], || {})
            .unwrap();

        let err = chain.load_database().unwrap_err();
        assert_matches!(
            err.downcast_ref::<ChainError>(),
            Some(ChainError::ParentNotFound(hash)) if *hash == b1.hash
        );
    }
}
