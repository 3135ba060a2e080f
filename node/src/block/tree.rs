use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use crate::block::{Block, ChainError, Result};
use crate::utilities::hash::HashType;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub height: u64,
    /// `None` only for genesis.
    pub parent: Option<HashType>,
    pub block: Block,
}

impl BlockNode {
    pub fn hash(&self) -> HashType {
        self.block.hash
    }
}

/// Arena of accepted blocks keyed by hash. Nodes only link to their parent.
#[derive(Debug)]
pub struct BlockTree {
    nodes: HashMap<HashType, BlockNode>,
    heads: HashSet<HashType>,
    irreversible: HashType,
}

impl BlockTree {
    /// Rebuilds the tree from blocks in the order they were stored.
    pub fn reconstruct<I>(blocks: I, irreversible: HashType) -> Result<Self>
    where
        I: IntoIterator<Item = Block>,
    {
        let mut genesis: Option<HashType> = None;
        let mut tree = Self {
            nodes: HashMap::new(),
            heads: HashSet::new(),
            irreversible,
        };

        for block in blocks {
            if block.is_genesis() {
                if genesis.is_some() {
                    log::error!("Second genesis block {} in stored chain", block.hash);
                    return Err(ChainError::MultipleGenesis(block.hash));
                }
                genesis = Some(block.hash);
            } else if !tree.nodes.contains_key(&block.header.parent) {
                log::error!(
                    "Stored block {} references unknown parent {}",
                    block.hash,
                    block.header.parent
                );
                return Err(ChainError::ParentNotFound(block.header.parent));
            }
            tree.attach(block);
        }

        if !tree.nodes.contains_key(&irreversible) {
            return Err(ChainError::UnknownIrreversible(irreversible));
        }

        log::info!(
            "Block tree reconstructed: {} blocks, {} heads, irreversible {}",
            tree.nodes.len(),
            tree.heads.len(),
            irreversible
        );
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &HashType) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn irreversible(&self) -> &BlockNode {
        &self.nodes[&self.irreversible]
    }

    pub fn heads(&self) -> Vec<&BlockNode> {
        self.heads.iter().map(|hash| &self.nodes[hash]).collect()
    }

    /// Highest head, ties broken by the lowest hash.
    pub fn best_head(&self) -> &BlockNode {
        self.heads
            .iter()
            .map(|hash| &self.nodes[hash])
            .max_by_key(|node| (node.height, Reverse(node.hash())))
            .unwrap_or_else(|| self.irreversible())
    }

    /// Number of ancestors of `hash`, 0 for genesis and unknown blocks.
    pub fn depth(&self, hash: &HashType) -> u64 {
        let mut depth = 0;
        let mut current = self.nodes.get(hash).and_then(|node| node.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(&parent).and_then(|node| node.parent);
        }
        depth
    }

    /// True if `ancestor` is `block` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &HashType, block: &HashType) -> bool {
        let mut current = Some(*block);
        while let Some(hash) = current {
            if hash == *ancestor {
                return true;
            }
            current = self.nodes.get(&hash).and_then(|node| node.parent);
        }
        false
    }

    /// Checks that `block` can be attached. `Ok(false)` means it is already known.
    pub fn check_insert(&self, block: &Block) -> Result<bool> {
        if self.nodes.contains_key(&block.hash) {
            return Ok(false);
        }
        if block.is_genesis() {
            return Err(ChainError::MultipleGenesis(block.hash));
        }
        let parent = &block.header.parent;
        if !self.nodes.contains_key(parent) {
            return Err(ChainError::ParentNotFound(*parent));
        }
        if !self.is_ancestor(&self.irreversible, parent) {
            return Err(ChainError::NotAnAncestor {
                ancestor: self.irreversible,
                block: block.hash,
            });
        }
        Ok(true)
    }

    pub fn insert(&mut self, block: Block) -> Result<bool> {
        if !self.check_insert(&block)? {
            log::debug!("Block {} already in tree", block.hash);
            return Ok(false);
        }
        self.attach(block);
        Ok(true)
    }

    /// Checks that `hash` may become the irreversible block.
    pub fn check_irreversible(&self, hash: &HashType) -> Result<()> {
        if !self.nodes.contains_key(hash) {
            return Err(ChainError::UnknownIrreversible(*hash));
        }
        if !self.is_ancestor(&self.irreversible, hash) {
            return Err(ChainError::NotAnAncestor {
                ancestor: self.irreversible,
                block: *hash,
            });
        }
        if let Some(head) = self.heads.iter().find(|head| !self.is_ancestor(hash, head)) {
            return Err(ChainError::NotAnAncestor {
                ancestor: *hash,
                block: *head,
            });
        }
        Ok(())
    }

    pub fn advance_irreversible(&mut self, hash: HashType) -> Result<()> {
        self.check_irreversible(&hash)?;
        log::info!("Irreversible block advanced {} -> {hash}", self.irreversible);
        self.irreversible = hash;
        Ok(())
    }

    /// Adds the block as a new head. The parent must already be present.
    fn attach(&mut self, block: Block) {
        let hash = block.hash;
        let (height, parent) = if block.is_genesis() {
            (0, None)
        } else {
            self.heads.remove(&block.header.parent);
            (block.header.height, Some(block.header.parent))
        };
        log::trace!("Attach block {hash} at height {height}");
        self.nodes.insert(
            hash,
            BlockNode {
                height,
                parent,
                block,
            },
        );
        self.heads.insert(hash);
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::block::BlockHeader;

    use super::*;

    fn genesis() -> Block {
        Block::new_genesis("node-0", 0).unwrap()
    }

    fn child(parent: &Block, producer: &str) -> Block {
        let header = BlockHeader {
            producer: producer.to_string(),
            height: parent.header.height + 1,
            parent: parent.hash,
            timestamp: parent.header.timestamp + 1,
        };
        Block::new(header, vec![], vec![]).unwrap()
    }

    #[test]
    fn reconstruct_linear_chain() {
        let g = genesis();
        let b1 = child(&g, "node-1");
        let b2 = child(&b1, "node-2");

        let tree = BlockTree::reconstruct(vec![g.clone(), b1, b2.clone()], g.hash).unwrap();

        assert_eq!(tree.len(), 3);
        let heads = tree.heads();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].hash(), b2.hash);
        assert_eq!(tree.irreversible().hash(), g.hash);
        assert_eq!(tree.irreversible().parent, None);
    }

    #[test]
    fn reconstruct_long_chain_with_fork() {
        let g = genesis();
        let mut chain = vec![g.clone()];
        for i in 0..5 {
            let next = child(chain.last().unwrap(), &format!("node-{i}"));
            chain.push(next);
        }
        let fork = child(&chain[2], "other");
        let mut records = chain.clone();
        records.push(fork.clone());

        let tree = BlockTree::reconstruct(records, chain[1].hash).unwrap();

        assert_eq!(tree.len(), 7);
        let mut heads = tree.heads().iter().map(|n| n.hash()).collect::<Vec<_>>();
        heads.sort();
        let mut expected = vec![chain[5].hash, fork.hash];
        expected.sort();
        assert_eq!(heads, expected);
        assert_eq!(tree.best_head().hash(), chain[5].hash);
        assert_eq!(tree.depth(&chain[5].hash), 5);
        assert_eq!(tree.depth(&fork.hash), 3);
        assert_eq!(tree.depth(&g.hash), 0);
        assert!(tree.is_ancestor(&chain[1].hash, &fork.hash));
        assert!(!tree.is_ancestor(&fork.hash, &chain[5].hash));
    }

    #[test]
    fn reconstruct_rejects_second_genesis() {
        let g = genesis();
        let other = Block::new_genesis("node-1", 5).unwrap();
        assert_matches!(
            BlockTree::reconstruct(vec![g.clone(), other.clone()], g.hash),
            Err(ChainError::MultipleGenesis(hash)) if hash == other.hash
        );
    }

    #[test]
    fn reconstruct_rejects_unknown_parent() {
        let g = genesis();
        let b1 = child(&g, "node-1");
        let b2 = child(&b1, "node-2");
        assert_matches!(
            BlockTree::reconstruct(vec![g.clone(), b2], g.hash),
            Err(ChainError::ParentNotFound(hash)) if hash == b1.hash
        );
    }

    #[test]
    fn reconstruct_rejects_unknown_irreversible() {
        let g = genesis();
        let b1 = child(&g, "node-1");
        assert_matches!(
            BlockTree::reconstruct(vec![g], b1.hash),
            Err(ChainError::UnknownIrreversible(_))
        );
    }

    #[test]
    fn insert_attaches_and_ignores_duplicates() {
        let g = genesis();
        let mut tree = BlockTree::reconstruct(vec![g.clone()], g.hash).unwrap();
        let b1 = child(&g, "node-1");

        assert!(tree.insert(b1.clone()).unwrap());
        assert!(!tree.insert(b1.clone()).unwrap());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.best_head().hash(), b1.hash);

        let orphan = child(&child(&b1, "x"), "y");
        assert_matches!(tree.insert(orphan), Err(ChainError::ParentNotFound(_)));
        assert_matches!(
            tree.insert(Block::new_genesis("node-2", 9).unwrap()),
            Err(ChainError::MultipleGenesis(_))
        );
    }

    #[test]
    fn best_head_breaks_ties_by_hash() {
        let g = genesis();
        let a = child(&g, "a");
        let b = child(&g, "b");
        let tree = BlockTree::reconstruct(vec![g.clone(), a.clone(), b.clone()], g.hash).unwrap();
        assert_eq!(tree.best_head().hash(), a.hash.min(b.hash));
    }

    #[test]
    fn irreversible_must_precede_every_head() {
        let g = genesis();
        let b1 = child(&g, "node-1");
        let b2 = child(&b1, "node-2");
        let fork = child(&g, "other");
        let mut tree =
            BlockTree::reconstruct(vec![g.clone(), b1.clone(), b2.clone(), fork], g.hash).unwrap();

        assert_matches!(
            tree.advance_irreversible(b1.hash),
            Err(ChainError::NotAnAncestor { .. })
        );

        let mut linear = BlockTree::reconstruct(vec![g.clone(), b1.clone(), b2.clone()], g.hash).unwrap();
        linear.advance_irreversible(b1.hash).unwrap();
        assert_eq!(linear.irreversible().hash(), b1.hash);
        assert_matches!(
            linear.advance_irreversible(g.hash),
            Err(ChainError::NotAnAncestor { .. })
        );

        // Forks below the irreversible block can no longer grow.
        assert_matches!(
            linear.insert(child(&g, "late")),
            Err(ChainError::NotAnAncestor { .. })
        );
        assert!(tree.advance_irreversible(g.hash).is_ok());
    }
}
