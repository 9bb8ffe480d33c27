mod chain;
mod commands;
mod follower;
mod messages;
mod transport;
mod types;

use thiserror::Error;

pub use bitcoin;

pub use chain::ChainParams;
pub use commands::{Command, CommandSender};
pub use follower::{
    ChainFollower, FollowerHandle, RunEnd, CONFLICT_DELAY, FRESH_START_LOOKBACK, RETRY_DELAY,
    WAIT_INITIAL_BLOCK, WRONG_CHAIN_DELAY,
};
pub use messages::Message;
pub use transport::{BitcoinCore, MemoryTransport, Transport};
pub use types::{Block, BlockHeader, BlockchainInfo, ChainPosition};

use bitcoin::BlockHash;

#[derive(Error, Debug)]
pub enum Error {
    #[error("rpc error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),
    #[error("block header not found: {0}")]
    HeaderNotFound(BlockHash),
    #[error("no block at height {0}")]
    HeightNotFound(u64),
    #[error("no on-chain ancestor found while resolving a rollback")]
    NoCommonAncestor,
    #[error("follower task terminated abnormally")]
    TaskFailed,
}
