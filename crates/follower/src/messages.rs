use crate::types::{Block, ChainPosition};

/// Events pushed to the follower's consumer, in emission order.
///
/// Positions are snapshots taken at emission time; the consumer may persist
/// them as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A canonical block was confirmed at `position`. Emitted once per block,
    /// in strictly ascending height order between rollbacks.
    Block {
        block: Block,
        position: ChainPosition,
    },
    /// The branch the follower was on was orphaned. Emitted exactly once per
    /// detected divergence, before any block beyond `new_position`.
    Rollback {
        old_position: ChainPosition,
        new_position: ChainPosition,
    },
}
