use std::time::Duration;

use bitcoin::BlockHash;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::*;

use crate::chain::ChainParams;
use crate::commands::{Command, CommandSender};
use crate::messages::Message;
use crate::transport::Transport;
use crate::types::ChainPosition;
use crate::Error;

/// Delay before retrying after a generic RPC or persistence failure.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Delay between identity checks against a node serving an unrecognized chain.
pub const WRONG_CHAIN_DELAY: Duration = Duration::from_secs(5 * 60);
/// Delay between sync checks while the node is in initial block download.
pub const WAIT_INITIAL_BLOCK: Duration = Duration::from_secs(30);
/// Delay before retrying a contended position write. Reserved for stores that
/// can fail on concurrent transactions; nothing in the engine sleeps on it.
pub const CONFLICT_DELAY: Duration = Duration::from_millis(250);

/// How far behind the tip a fresh start begins, so reorgs already visible at
/// startup are still caught.
pub const FRESH_START_LOOKBACK: u64 = 100;

/// Pause between header polls once the follower has caught up with the tip.
const TIP_POLL_INTERVAL: Duration = Duration::from_secs(1);

const MESSAGE_CHANNEL_SIZE: usize = 1;

/// How a follower run ended, when it did not end in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// Stop was requested, or the consumer went away.
    Stopped,
    /// Restart was requested. `resync` overrides the persisted start position
    /// for the next run.
    Restart { resync: Option<ChainPosition> },
}

enum WaitOutcome {
    Elapsed,
    Interrupted(RunEnd),
}

enum StartState {
    Position(ChainPosition),
    Interrupted(RunEnd),
}

/// Follows the canonical chain of a remote node, emitting one [`Message`] per
/// new block and per detected reorganization.
///
/// The engine runs on its own task and owns the working position for the
/// whole run; callers interact with it only through the event stream and the
/// command slot on [`FollowerHandle`]. A run ends with a [`RunEnd`] on stop or
/// restart, or with an [`Error`] on the first RPC failure outside the start
/// retry loop; starting a new run is the supervisor's call.
pub struct ChainFollower<T> {
    transport: T,
    chain: Option<&'static ChainParams>,
    commands: mpsc::Receiver<Command>,
    messages: mpsc::Sender<Message>,
}

/// Consumer side of a spawned follower: the event stream, the command slot,
/// and the run result.
pub struct FollowerHandle {
    messages: mpsc::Receiver<Message>,
    commands: CommandSender,
    task: JoinHandle<Result<RunEnd, Error>>,
}

impl FollowerHandle {
    /// Next event from the follower; `None` once the stream has closed.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Wait for the run to end. Drops the event stream, so a follower blocked
    /// on emitting finishes as stopped rather than deadlocking the caller.
    pub async fn join(self) -> Result<RunEnd, Error> {
        let FollowerHandle { messages, task, .. } = self;
        drop(messages);
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!("follower task failed: {err}");
                Err(Error::TaskFailed)
            }
        }
    }
}

impl<T: Transport + 'static> ChainFollower<T> {
    /// Spawn a follower starting from `start`, or from scratch if `None`.
    pub fn spawn(transport: T, start: Option<ChainPosition>) -> FollowerHandle {
        Self::spawn_with_channel_size(transport, start, MESSAGE_CHANNEL_SIZE)
    }

    /// Spawn with an explicit event stream capacity, for consumers that want
    /// to lag further behind the engine.
    pub fn spawn_with_channel_size(
        transport: T,
        start: Option<ChainPosition>,
        channel_size: usize,
    ) -> FollowerHandle {
        let (message_tx, message_rx) = mpsc::channel(channel_size.max(1));
        let (command_tx, command_rx) = mpsc::channel(1);

        let follower = ChainFollower {
            transport,
            chain: None,
            commands: command_rx,
            messages: message_tx,
        };

        FollowerHandle {
            messages: message_rx,
            commands: CommandSender::new(command_tx),
            task: tokio::spawn(follower.run(start)),
        }
    }

    async fn run(mut self, start: Option<ChainPosition>) -> Result<RunEnd, Error> {
        let mut position = match self.resolve_start(start).await? {
            StartState::Position(position) => position,
            StartState::Interrupted(end) => return Ok(end),
        };

        if let Some(chain) = self.chain {
            info!(
                "following {} from {} at height {}",
                chain.name, position.block_hash, position.block_height
            );
        }

        loop {
            let header = self.transport.get_block_header(&position.block_hash).await?;

            if header.is_on_chain() {
                if !position.waiting_for_next_hash {
                    debug!("fetching block {}", position.block_hash);
                    let block = self.transport.get_block(&header.hash).await?;

                    position.waiting_for_next_hash = true;

                    let message = Message::Block {
                        block,
                        position: position.clone(),
                    };
                    if self.messages.send(message).await.is_err() {
                        debug!("event stream closed, ending run");
                        return Ok(RunEnd::Stopped);
                    }
                }

                position.waiting_for_next_hash = header.next_block_hash.is_none();

                if let Some(next_hash) = header.next_block_hash {
                    position.block_hash = next_hash;
                    position.block_height = header.height + 1;
                }

                if position.waiting_for_next_hash {
                    sleep(TIP_POLL_INTERVAL).await;
                }
            } else {
                let mut old_position = position.clone();
                // the old snapshot no longer denotes "at tip"
                old_position.waiting_for_next_hash = false;

                let from_hash = header.previous_block_hash.ok_or(Error::NoCommonAncestor)?;
                position = self.resolve_rollback(from_hash).await?;

                let message = Message::Rollback {
                    old_position,
                    new_position: position.clone(),
                };
                if self.messages.send(message).await.is_err() {
                    debug!("event stream closed, ending run");
                    return Ok(RunEnd::Stopped);
                }
            }
        }
    }

    /// Resolve the position to start polling from.
    ///
    /// Loops until the node passes the identity and sync checks, honoring
    /// commands during each wait. RPC failures are fatal for the run and
    /// bubble up to the supervisor.
    async fn resolve_start(
        &mut self,
        persisted: Option<ChainPosition>,
    ) -> Result<StartState, Error> {
        loop {
            let genesis_hash = self.transport.get_block_hash(0).await?;

            let chain = match ChainParams::from_genesis_hash(&genesis_hash) {
                Some(chain) => chain,
                None => {
                    warn!("unrecognized chain: block 0 on the node is {genesis_hash}");
                    warn!("the genesis block does not match any known network");
                    match self.wait_or_interrupt(WRONG_CHAIN_DELAY).await {
                        WaitOutcome::Elapsed => continue,
                        WaitOutcome::Interrupted(end) => return Ok(StartState::Interrupted(end)),
                    }
                }
            };
            self.chain = Some(chain);

            let info = self.transport.get_blockchain_info().await?;
            if info.initial_block_download {
                info!("waiting for the node to finish initial block download");
                match self.wait_or_interrupt(WAIT_INITIAL_BLOCK).await {
                    WaitOutcome::Elapsed => continue,
                    WaitOutcome::Interrupted(end) => return Ok(StartState::Interrupted(end)),
                }
            }

            return Ok(StartState::Position(match &persisted {
                Some(position) => {
                    info!("resuming from height {}", position.block_height);
                    ChainPosition::new(position.block_hash, position.block_height)
                }
                None => {
                    let tip_height = self.transport.get_block_count().await?;
                    let first_height = tip_height.saturating_sub(FRESH_START_LOOKBACK);
                    let first_hash = self.transport.get_block_hash(first_height).await?;
                    info!("fresh start at height {first_height}");
                    ChainPosition::new(first_hash, first_height)
                }
            }));
        }
    }

    /// Walk back through ancestor headers until one is still on the canonical
    /// chain; that block becomes the new position.
    async fn resolve_rollback(&self, from_hash: BlockHash) -> Result<ChainPosition, Error> {
        let mut from_hash = from_hash;
        loop {
            debug!("fetching previous header {from_hash}");
            let header = self.transport.get_block_header(&from_hash).await?;

            if header.is_on_chain() {
                return Ok(ChainPosition::new(header.hash, header.height));
            }

            // still orphaned, keep walking backwards
            from_hash = header.previous_block_hash.ok_or(Error::NoCommonAncestor)?;
        }
    }

    /// Park for `delay`, or less if a command arrives first. This is the only
    /// point where the engine reads the command slot.
    async fn wait_or_interrupt(&mut self, delay: Duration) -> WaitOutcome {
        tokio::select! {
            command = self.commands.recv() => match command {
                Some(Command::Stop { deadline }) => {
                    info!("stop requested (deadline {deadline:?})");
                    WaitOutcome::Interrupted(RunEnd::Stopped)
                }
                Some(Command::Restart) => {
                    info!("restart requested");
                    WaitOutcome::Interrupted(RunEnd::Restart { resync: None })
                }
                Some(Command::ReSync { block_hash, block_height }) => {
                    info!("resync requested from {block_hash} at height {block_height}");
                    WaitOutcome::Interrupted(RunEnd::Restart {
                        resync: Some(ChainPosition::new(block_hash, block_height)),
                    })
                }
                // every command sender is gone; nobody is left to steer
                None => WaitOutcome::Interrupted(RunEnd::Stopped),
            },
            _ = sleep(delay) => WaitOutcome::Elapsed,
        }
    }
}
