//! # Node context
//!
//! Owns everything one chain participant needs: the production schedule,
//! the peer terms, the block tree with its auxiliary caches, the durable
//! chain store and the speculative SQL state.
//!
//! The production loop ([`Node::run`]) wakes at least once per tick. When
//! the next turn is due and belongs to this node, the speculative state is
//! committed and its queries are packaged into a block on top of the best
//! head. Blocks produced elsewhere arrive through [`Node::on_block_accepted`]
//! and are replayed before being committed locally.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::agreement::{Agreement, Proposal};
use crate::block::{Block, BlockHeader, ChainError, PendingTransaction, QueryRecord};
use crate::config::Configuration;
use crate::core::fatal;
use crate::core::shutdown::Shutdown;
use crate::meta::{MetaChange, MetaKind};
use crate::runtime::{ChainClock, PeerManager, PeerSet, TurnScheduler};
use crate::state::{LogOffset, Request, Response, State, StateError};
use crate::storage::chain::{store, ChainState, ChainStore};
use crate::storage::SqliteStorage;
use crate::utilities::hash::HashType;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Block {0} failed hash verification")]
    InvalidBlock(HashType),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

pub struct Node<A: Agreement> {
    node_id: String,
    agreement: A,
    scheduler: TurnScheduler,
    peers: PeerManager,
    chain: RwLock<ChainState>,
    store: ChainStore,
    state: State<SqliteStorage>,
}

impl<A: Agreement> Node<A> {
    /// Loads the chain, opens the speculative state and announces the peer set.
    pub fn start(config: Configuration, agreement: A) -> anyhow::Result<Self> {
        config.validate()?;
        let node_id = config.node.node_id.clone();
        log::info!("Starting node {node_id}");

        let storage = &config.storage;
        let store = ChainStore::open(&storage.chain_db_path, storage.create_if_not_exists)?;
        let genesis = Block::new_genesis(&config.chain.leader, config.chain.genesis_timestamp_ms)?;
        store.bootstrap(&genesis)?;
        let chain = store.load_database()?;

        let best_head = chain.tree.best_head();
        let (head_height, depth) = (best_head.height, chain.tree.depth(&best_head.hash()));
        let epoch = u32::try_from(depth)?;

        let state_storage = SqliteStorage::open(&storage.state_db_path, storage.create_if_not_exists)?;
        let state = State::open_at_epoch(state_storage, &node_id, config.state.read_mode, epoch)?;

        let peer_set = PeerSet::new(config.chain.peers.clone(), &config.chain.leader)?;
        let own_index = peer_set
            .index_of(&node_id)
            .ok_or_else(|| anyhow::anyhow!("Node {node_id} is not one of the peers"))?;
        let scheduler = TurnScheduler::new(
            Arc::new(ChainClock::new()),
            config.chain.genesis_timestamp_ms,
            config.chain.period_ms,
            config.chain.tick_ms,
            own_index,
            peer_set.len(),
        )?;
        scheduler.resume_at(head_height + 1);

        let peers = PeerManager::new(peer_set, config.chain.update_terms)?;
        agreement.update_peers(&peers.current_peers())?;

        log::info!(
            "Node {node_id} ready: index {own_index}, head height {head_height}, next turn {}, log offset {}",
            scheduler.next_turn(),
            state.offset()
        );
        Ok(Self {
            node_id,
            agreement,
            scheduler,
            peers,
            chain: RwLock::new(chain),
            store,
            state,
        })
    }

    /// Production loop. Returns once `shutdown` fires.
    pub async fn run(&self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        log::info!("Production loop started");
        loop {
            let (now, wait) = self.scheduler.next_tick();
            if !wait.is_zero() {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(wait) => continue,
                }
            }
            if shutdown.is_shutdown() {
                break;
            }
            self.run_cycle(now);
        }
        log::info!("Production loop stopped at turn {}", self.scheduler.next_turn());
        Ok(())
    }

    /// One due turn: produce if it is ours, then move to the next turn and term.
    pub fn run_cycle(&self, now: u64) {
        let turn = self.scheduler.next_turn();
        if self.scheduler.is_my_turn() {
            match self.produce_block(turn, now) {
                Ok(block) => log::info!("Produced {block}"),
                Err(err) => log::error!("Failed to produce block at height {turn}: {err}"),
            }
        } else {
            log::trace!("Turn {turn} belongs to another peer");
        }
        let next = self.scheduler.advance_turn();
        self.peers.rotate_peers(next, &self.agreement);
    }

    fn produce_block(&self, height: u64, now: u64) -> Result<Block> {
        let queries = match self.state.commit() {
            Ok(queries) => queries,
            Err(err) => fatal(format!("Speculative state commit failed: {err}")),
        };

        let (parent, transactions) = {
            let chain = self.chain.read();
            (chain.tree.best_head().hash(), chain.tx_pool.clone())
        };
        let header = BlockHeader {
            producer: self.node_id.clone(),
            height,
            parent,
            timestamp: now,
        };
        let queries = queries.into_iter().map(QueryRecord::from).collect();
        let block = Block::new(header, queries, transactions)?;

        match self.agreement.propose(&block)? {
            Proposal::Accepted => {
                self.on_block_accepted(block.clone())?;
            }
            Proposal::Pending => log::debug!("Block {} waits for agreement", block.hash),
        }
        Ok(block)
    }

    /// Attaches an agreed block. Returns `false` for an already known block.
    ///
    /// Blocks from other producers are replayed on the speculative state and
    /// committed. A replay conflict discards all uncommitted local state.
    pub fn on_block_accepted(&self, block: Block) -> Result<bool> {
        if !block.verify_hash()? {
            return Err(NodeError::InvalidBlock(block.hash));
        }

        let mut chain = self.chain.write();
        if !chain.tree.check_insert(&block)? {
            log::debug!("Block {} already accepted", block.hash);
            return Ok(false);
        }

        let remote = block.header.producer != self.node_id;
        if remote {
            self.replay_block(&block)?;
        }

        let included = block
            .transactions
            .iter()
            .map(|tx| tx.hash)
            .collect::<Vec<_>>();
        let height = block.header.height;
        let procedures = vec![
            store::add_block(&block),
            store::delete_transactions(&included),
        ];
        let chain = &mut *chain;
        self.store.store(procedures, || {
            chain.tx_pool.retain(|tx| !included.contains(&tx.hash));
            if let Err(err) = chain.tree.insert(block) {
                log::error!("Checked block could not be attached: {err}");
            }
        })?;

        if remote {
            self.scheduler.resume_at(height + 1);
        }
        Ok(true)
    }

    fn replay_block(&self, block: &Block) -> Result<()> {
        log::debug!(
            "Replaying {} queries of {} from {}",
            block.queries.len(),
            block.hash,
            block.header.producer
        );
        for record in &block.queries {
            if let Err(err) = self.state.replay_request(&record.request, &record.response) {
                log::warn!("Replay of block {} failed: {err}", block.hash);
                self.state.rollback()?;
                return Err(err.into());
            }
        }
        if let Err(err) = self.state.commit() {
            fatal(format!("Speculative state commit failed: {err}"));
        }
        Ok(())
    }

    /// Reconciles the speculative pool with the write order the peers agreed on.
    pub fn on_write_log_agreed(&self, responses: &[Response]) -> Result<()> {
        self.state.partial_commit(responses)?;
        Ok(())
    }

    /// Moves the irreversible marker. Failing to persist it aborts the node.
    pub fn on_block_finalized(&self, hash: HashType) -> Result<()> {
        let mut chain = self.chain.write();
        chain.tree.check_irreversible(&hash)?;
        let tree = &mut chain.tree;
        let result = self.store.store(vec![store::update_irreversible(hash)], || {
            if let Err(err) = tree.advance_irreversible(hash) {
                log::error!("Checked irreversible block could not be applied: {err}");
            }
        });
        if let Err(err) = result {
            fatal(format!("Failed to persist irreversible marker {hash}: {err}"));
        }
        Ok(())
    }

    /// Adds a transaction to the pool. Returns `false` if it is already pooled.
    pub fn submit_transaction(&self, transaction: PendingTransaction) -> Result<bool> {
        let mut chain = self.chain.write();
        if chain.tx_pool.iter().any(|tx| tx.hash == transaction.hash) {
            return Ok(false);
        }
        let tx_pool = &mut chain.tx_pool;
        self.store
            .store(vec![store::add_transaction(&transaction)], || {
                tx_pool.push(transaction)
            })?;
        Ok(true)
    }

    /// Persists meta changes and applies them to the in-memory caches.
    pub fn apply_meta_changes(&self, changes: Vec<MetaChange>) -> Result<()> {
        let procedures = changes.iter().map(store::meta_change).collect();
        let mut chain = self.chain.write();
        let meta = &mut chain.meta;
        self.store.store(procedures, || {
            for change in changes {
                meta.apply(change);
            }
        })?;
        Ok(())
    }

    pub fn query(&self, request: &Request) -> Result<Response> {
        Ok(self.state.query(request)?)
    }

    pub fn replay(&self, request: &Request, response: &Response) -> Result<()> {
        Ok(self.state.replay_request(request, response)?)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn agreement(&self) -> &A {
        &self.agreement
    }

    pub fn scheduler(&self) -> &TurnScheduler {
        &self.scheduler
    }

    pub fn current_peers(&self) -> PeerSet {
        self.peers.current_peers()
    }

    pub fn log_offset(&self) -> LogOffset {
        self.state.offset()
    }

    pub fn best_head(&self) -> Block {
        self.chain.read().tree.best_head().block.clone()
    }

    pub fn irreversible(&self) -> HashType {
        self.chain.read().tree.irreversible().hash()
    }

    pub fn contains_block(&self, hash: &HashType) -> bool {
        self.chain.read().tree.contains(hash)
    }

    pub fn pooled_transactions(&self) -> Vec<PendingTransaction> {
        self.chain.read().tx_pool.clone()
    }

    pub fn meta(&self, kind: MetaKind, key: &str) -> Option<Vec<u8>> {
        self.chain.read().meta.get(kind, key).map(<[u8]>::to_vec)
    }

    /// Closes the speculative state, committing or discarding pending writes.
    pub fn close(self, commit: bool) -> anyhow::Result<()> {
        log::info!("Closing node {}", self.node_id);
        self.state.close(commit)?;
        self.store.close()
    }
}
