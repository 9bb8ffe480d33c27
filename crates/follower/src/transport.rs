use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use bitcoincore_rpc::{json, Auth, Client, RpcApi};

use crate::types::{Block, BlockHeader, BlockchainInfo};
use crate::Error;

/// The node queries the follower needs, polymorphic over the backend so the
/// engine can run against Core over JSON-RPC or against an in-memory fixture.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, Error>;
    async fn get_block_header(&self, hash: &BlockHash) -> Result<BlockHeader, Error>;
    async fn get_block_count(&self) -> Result<u64, Error>;
    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error>;
    async fn get_best_block_hash(&self) -> Result<BlockHash, Error>;
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error>;
}

/// Live transport speaking JSON-RPC to a Core node.
#[derive(Clone)]
pub struct BitcoinCore {
    pub rpc: Arc<Client>,
}

impl BitcoinCore {
    pub fn new(
        url: &str,
        rpc_user: impl Into<String>,
        rpc_pass: impl Into<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            rpc: Client::new(url, Auth::UserPass(rpc_user.into(), rpc_pass.into()))?.into(),
        })
    }
}

#[async_trait]
impl Transport for BitcoinCore {
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, Error> {
        Ok(self.rpc.get_block_info(hash)?.into())
    }

    async fn get_block_header(&self, hash: &BlockHash) -> Result<BlockHeader, Error> {
        Ok(self.rpc.get_block_header_info(hash)?.into())
    }

    async fn get_block_count(&self) -> Result<u64, Error> {
        Ok(self.rpc.get_block_count()?)
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        Ok(self.rpc.get_block_hash(height)?)
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash, Error> {
        Ok(self.rpc.get_best_block_hash()?)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        Ok(self.rpc.get_blockchain_info()?.into())
    }
}

impl From<json::GetBlockHeaderResult> for BlockHeader {
    fn from(res: json::GetBlockHeaderResult) -> Self {
        BlockHeader {
            hash: res.hash,
            height: res.height as u64,
            confirmations: res.confirmations,
            previous_block_hash: res.previous_block_hash,
            next_block_hash: res.next_block_hash,
        }
    }
}

impl From<json::GetBlockResult> for Block {
    fn from(res: json::GetBlockResult) -> Self {
        Block {
            hash: res.hash,
            height: res.height as u64,
            confirmations: res.confirmations,
            time: res.time as u64,
            tx: res.tx,
        }
    }
}

impl From<json::GetBlockchainInfoResult> for BlockchainInfo {
    fn from(res: json::GetBlockchainInfoResult) -> Self {
        BlockchainInfo {
            chain: res.chain,
            blocks: res.blocks,
            best_block_hash: res.best_block_hash,
            initial_block_download: res.initial_block_download,
        }
    }
}

/// Fixture-backed transport double.
///
/// Heights index only headers that are on the canonical chain, so orphaned
/// fixtures stay reachable by hash alone, as on a real node. Clones share the
/// same state, which lets a test mutate fixtures while a follower is running.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryState {
    blocks: HashMap<BlockHash, Block>,
    headers: HashMap<BlockHash, BlockHeader>,
    hash_by_height: HashMap<u64, BlockHash>,
    block_count: u64,
    best_block_hash: BlockHash,
    chain: String,
    initial_block_download: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            headers: HashMap::new(),
            hash_by_height: HashMap::new(),
            block_count: 0,
            best_block_hash: BlockHash::all_zeros(),
            chain: "regtest".to_string(),
            initial_block_download: false,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block together with its header.
    pub fn add_block(&self, block: Block, header: BlockHeader) {
        let mut state = self.state.lock().unwrap();
        if header.is_on_chain() {
            state.hash_by_height.insert(header.height, header.hash);
        }
        state.blocks.insert(block.hash, block);
        state.headers.insert(header.hash, header);
    }

    /// Register a header with no body, e.g. the tip of an orphaned branch.
    pub fn add_header(&self, header: BlockHeader) {
        let mut state = self.state.lock().unwrap();
        if header.is_on_chain() {
            state.hash_by_height.insert(header.height, header.hash);
        }
        state.headers.insert(header.hash, header);
    }

    pub fn set_block_count(&self, count: u64) {
        self.state.lock().unwrap().block_count = count;
    }

    pub fn set_best_block_hash(&self, hash: BlockHash) {
        self.state.lock().unwrap().best_block_hash = hash;
    }

    pub fn set_initial_block_download(&self, syncing: bool) {
        self.state.lock().unwrap().initial_block_download = syncing;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, Error> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(hash)
            .cloned()
            .ok_or(Error::BlockNotFound(*hash))
    }

    async fn get_block_header(&self, hash: &BlockHash) -> Result<BlockHeader, Error> {
        let state = self.state.lock().unwrap();
        state
            .headers
            .get(hash)
            .cloned()
            .ok_or(Error::HeaderNotFound(*hash))
    }

    async fn get_block_count(&self) -> Result<u64, Error> {
        Ok(self.state.lock().unwrap().block_count)
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        let state = self.state.lock().unwrap();
        state
            .hash_by_height
            .get(&height)
            .copied()
            .ok_or(Error::HeightNotFound(height))
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash, Error> {
        Ok(self.state.lock().unwrap().best_block_hash)
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        let state = self.state.lock().unwrap();
        Ok(BlockchainInfo {
            chain: state.chain.clone(),
            blocks: state.block_count,
            best_block_hash: state.best_block_hash,
            initial_block_download: state.initial_block_download,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hash(byte: u8) -> BlockHash {
        BlockHash::from_byte_array([byte; 32])
    }

    #[tokio::test]
    async fn missing_fixtures_are_reported_as_not_found() {
        let transport = MemoryTransport::new();

        assert!(matches!(
            transport.get_block_header(&test_hash(1)).await,
            Err(Error::HeaderNotFound(_))
        ));
        assert!(matches!(
            transport.get_block(&test_hash(1)).await,
            Err(Error::BlockNotFound(_))
        ));
        assert!(matches!(
            transport.get_block_hash(3).await,
            Err(Error::HeightNotFound(3))
        ));
    }

    #[tokio::test]
    async fn orphaned_headers_do_not_claim_a_height() {
        let transport = MemoryTransport::new();
        transport.add_header(BlockHeader {
            hash: test_hash(2),
            height: 5,
            confirmations: -1,
            previous_block_hash: Some(test_hash(1)),
            next_block_hash: None,
        });

        assert!(transport.get_block_header(&test_hash(2)).await.is_ok());
        assert!(transport.get_block_hash(5).await.is_err());
    }
}
