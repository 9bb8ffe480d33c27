use bitcoin::blockdata::constants::genesis_block;
use bitcoin::{BlockHash, Network};
use once_cell::sync::Lazy;

/// Identity of a network the follower knows how to track, keyed by the hash
/// of its genesis block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub name: &'static str,
    pub network: Network,
    pub genesis_hash: BlockHash,
}

static CHAINS: Lazy<Vec<ChainParams>> = Lazy::new(|| {
    [
        ("mainnet", Network::Bitcoin),
        ("testnet", Network::Testnet),
        ("signet", Network::Signet),
        ("regtest", Network::Regtest),
    ]
    .into_iter()
    .map(|(name, network)| ChainParams {
        name,
        network,
        genesis_hash: genesis_block(network).block_hash(),
    })
    .collect()
});

impl ChainParams {
    /// Identify the network a node serves from its block-zero hash.
    pub fn from_genesis_hash(hash: &BlockHash) -> Option<&'static ChainParams> {
        CHAINS.iter().find(|chain| chain.genesis_hash == *hash)
    }
}
