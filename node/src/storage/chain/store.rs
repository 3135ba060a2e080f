//! Storage procedures. Each one is a unit of work executed inside the
//! transaction opened by [`super::ChainStore::store`].

use rusqlite::{params, Transaction};

use crate::block::{Block, PendingTransaction};
use crate::meta::{MetaChange, MetaKind};
use crate::utilities::encoding::Encode;
use crate::utilities::hash::HashType;

pub type StorageProcedure = Box<dyn FnOnce(&Transaction<'_>) -> anyhow::Result<()> + Send>;

pub fn add_block(block: &Block) -> StorageProcedure {
    let block = block.clone();
    Box::new(move |tx: &Transaction<'_>| {
        log::debug!("Storing block {block}");
        let encoded = block.encode()?;
        // Re-storing a known block must not move it in insertion order.
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO blocks (height, hash, parent, encoded) VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![
            block.header.height,
            block.hash.to_string(),
            block.header.parent.to_string(),
            encoded
        ])?;
        Ok(())
    })
}

pub fn add_transaction(transaction: &PendingTransaction) -> StorageProcedure {
    let transaction = transaction.clone();
    Box::new(move |tx: &Transaction<'_>| {
        log::debug!("Storing {transaction}");
        let encoded = transaction.encode()?;
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO tx_pool (tx_type, hash, encoded) VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![
            transaction.tx_type,
            transaction.hash.to_string(),
            encoded
        ])?;
        Ok(())
    })
}

pub fn delete_transactions(hashes: &[HashType]) -> StorageProcedure {
    let hashes = hashes.to_vec();
    Box::new(move |tx: &Transaction<'_>| {
        let mut stmt = tx.prepare_cached("DELETE FROM tx_pool WHERE hash = ?1")?;
        for hash in &hashes {
            stmt.execute(params![hash.to_string()])?;
        }
        log::debug!("Deleted {} pooled transactions", hashes.len());
        Ok(())
    })
}

pub fn update_irreversible(hash: HashType) -> StorageProcedure {
    Box::new(move |tx: &Transaction<'_>| {
        log::debug!("Storing irreversible marker {hash}");
        tx.prepare_cached("INSERT OR REPLACE INTO irreversible (id, hash) VALUES (0, ?1)")?
            .execute(params![hash.to_string()])?;
        Ok(())
    })
}

pub fn update_account(key: &str, payload: Vec<u8>) -> StorageProcedure {
    update_meta(MetaKind::Account, key, payload)
}

pub fn delete_account(key: &str) -> StorageProcedure {
    delete_meta(MetaKind::Account, key)
}

pub fn update_shard_chain(key: &str, payload: Vec<u8>) -> StorageProcedure {
    update_meta(MetaKind::ShardChain, key, payload)
}

pub fn delete_shard_chain(key: &str) -> StorageProcedure {
    delete_meta(MetaKind::ShardChain, key)
}

pub fn update_provider(key: &str, payload: Vec<u8>) -> StorageProcedure {
    update_meta(MetaKind::Provider, key, payload)
}

pub fn delete_provider(key: &str) -> StorageProcedure {
    delete_meta(MetaKind::Provider, key)
}

pub fn meta_change(change: &MetaChange) -> StorageProcedure {
    match change {
        MetaChange::Update { kind, key, payload } => update_meta(*kind, key, payload.clone()),
        MetaChange::Delete { kind, key } => delete_meta(*kind, key),
    }
}

fn update_meta(kind: MetaKind, key: &str, payload: Vec<u8>) -> StorageProcedure {
    let key = key.to_string();
    Box::new(move |tx: &Transaction<'_>| {
        log::debug!("Storing {kind} record {key}");
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, encoded) VALUES (?1, ?2)",
            kind.table()
        );
        tx.prepare_cached(&sql)?.execute(params![key, payload])?;
        Ok(())
    })
}

fn delete_meta(kind: MetaKind, key: &str) -> StorageProcedure {
    let key = key.to_string();
    Box::new(move |tx: &Transaction<'_>| {
        log::debug!("Deleting {kind} record {key}");
        let sql = format!("DELETE FROM {} WHERE key = ?1", kind.table());
        tx.prepare_cached(&sql)?.execute(params![key])?;
        Ok(())
    })
}
