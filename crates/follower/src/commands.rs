use std::time::Duration;

use bitcoin::BlockHash;
use tokio::sync::mpsc;

/// Out-of-band instructions for a running follower.
///
/// Commands are read only while the engine is parked in a retry wait, and at
/// most one is pending at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the run so the supervisor starts again from this position instead
    /// of the persisted one.
    ReSync {
        block_hash: BlockHash,
        block_height: u64,
    },
    /// End the run so the supervisor starts a fresh one.
    Restart,
    /// End the run for good. The deadline is bookkeeping for the caller; the
    /// engine stops at its next wait regardless.
    Stop { deadline: Option<Duration> },
}

/// Cloneable handle for steering a follower run.
///
/// Sends are fire-and-forget: a command issued after the run already ended is
/// dropped.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn stop(&self, deadline: Option<Duration>) {
        let _ = self.tx.send(Command::Stop { deadline }).await;
    }

    pub async fn restart(&self) {
        let _ = self.tx.send(Command::Restart).await;
    }

    pub async fn resync(&self, block_hash: BlockHash, block_height: u64) {
        let _ = self
            .tx
            .send(Command::ReSync {
                block_hash,
                block_height,
            })
            .await;
    }
}
