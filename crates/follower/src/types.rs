use bitcoin::{BlockHash, Txid};
use serde_derive::{Deserialize, Serialize};

/// The last fully processed on-chain block, as tracked by the follower.
///
/// The engine owns and advances the live copy for the duration of a run;
/// every emitted message carries an owned snapshot that the consumer can
/// persist without racing the engine's next mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPosition {
    pub block_hash: BlockHash,
    pub block_height: u64,
    /// True exactly when the block at `block_hash` has been emitted but its
    /// successor hash is not yet known, i.e. the follower is at the tip.
    pub waiting_for_next_hash: bool,
}

impl ChainPosition {
    pub fn new(block_hash: BlockHash, block_height: u64) -> Self {
        Self {
            block_hash,
            block_height,
            waiting_for_next_hash: false,
        }
    }
}

/// Header summary as returned by `getblockheader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: BlockHash,
    pub height: u64,
    /// -1 means the block is no longer part of the canonical chain.
    pub confirmations: i32,
    pub previous_block_hash: Option<BlockHash>,
    /// Absent while this block is the tip.
    pub next_block_hash: Option<BlockHash>,
}

impl BlockHeader {
    pub fn is_on_chain(&self) -> bool {
        self.confirmations != -1
    }
}

/// Block summary as returned by `getblock`, fetched once per canonical block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    pub confirmations: i32,
    pub time: u64,
    pub tx: Vec<Txid>,
}

/// The subset of `getblockchaininfo` consulted during start resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub best_block_hash: BlockHash,
    pub initial_block_download: bool,
}
