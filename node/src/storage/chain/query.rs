//! Startup loaders. All of them read committed state only.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension};

use crate::block::{Block, BlockTree, PendingTransaction};
use crate::meta::{MetaKind, MetaState};
use crate::utilities::encoding::Decode;
use crate::utilities::hash::HashType;

pub(crate) fn load_irreversible_hash(conn: &Connection) -> anyhow::Result<Option<HashType>> {
    let hash: Option<String> = conn
        .prepare_cached("SELECT hash FROM irreversible WHERE id = 0")?
        .query_row([], |row| row.get(0))
        .optional()?;
    hash.map(|hash| HashType::from_str(&hash)).transpose()
}

pub(crate) fn count_blocks(conn: &Connection) -> anyhow::Result<u64> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
    Ok(count)
}

/// Decodes every stored block in insertion order and rebuilds the tree.
pub(crate) fn load_blocks(conn: &Connection, irreversible: HashType) -> anyhow::Result<BlockTree> {
    let mut stmt = conn.prepare_cached("SELECT encoded FROM blocks ORDER BY id")?;
    let blocks = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))?
        .map(|encoded| Block::decode(&encoded?))
        .collect::<anyhow::Result<Vec<_>>>()?;
    log::debug!("Loaded {} stored blocks", blocks.len());
    Ok(BlockTree::reconstruct(blocks, irreversible)?)
}

pub(crate) fn load_meta_state(conn: &Connection) -> anyhow::Result<MetaState> {
    let mut state = MetaState::default();
    for kind in MetaKind::ALL {
        let mut stmt = conn.prepare_cached(&format!("SELECT key, encoded FROM {}", kind.table()))?;
        let mut rows = stmt.query([])?;
        let records = state.records_mut(kind);
        while let Some(row) = rows.next()? {
            records.insert(row.get(0)?, row.get(1)?);
        }
        log::debug!("Loaded {} {kind} records", records.len());
    }
    Ok(state)
}

/// Pending transactions in the order they were submitted.
pub(crate) fn load_tx_pool(conn: &Connection) -> anyhow::Result<Vec<PendingTransaction>> {
    let mut stmt = conn.prepare_cached("SELECT encoded FROM tx_pool ORDER BY id")?;
    let pool = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))?
        .map(|encoded| PendingTransaction::decode(&encoded?))
        .collect::<anyhow::Result<Vec<_>>>()?;
    log::debug!("Loaded {} pooled transactions", pool.len());
    Ok(pool)
}
