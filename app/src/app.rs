use crate::metrics;
use crate::store::PositionStore;
use clap::Parser;
use eyre::Result;
use follower::{BitcoinCore, ChainFollower, Message, RunEnd};
use futures::pin_mut;
use std::future::Future;
use std::str::FromStr;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

#[derive(Parser)]
#[command(
    author,
    about = "Follows the canonical chain tip of a Bitcoin Core node",
    long_about = None
)]
pub struct App {
    #[clap(
        long,
        env = "BITCOIN_RPC_URL",
        default_value = "http://127.0.0.1:8332"
    )]
    pub bitcoin_rpc_url: String,

    #[clap(long, env = "BITCOIN_RPC_USER", default_value = "rpcuser")]
    pub bitcoin_rpc_user: String,

    #[clap(long, env = "BITCOIN_RPC_PASS", default_value = "rpcpassword")]
    pub bitcoin_rpc_pass: String,

    /// File the follower position is persisted to between runs
    #[arg(long = "position-file", default_value = "position.json")]
    pub position_file: String,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    #[clap(long, help = "Port for the metrics server")]
    pub metrics_port: Option<u16>,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(run_until_ctrl_c(self.execute()))?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = Level::from_str(
            std::env::var("RUST_LOG")
                .unwrap_or("info".to_string())
                .as_str(),
        )
        .unwrap();

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("app={rust_log_level},follower={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer().with_target(true);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    async fn execute(self) -> Result<()> {
        let store = PositionStore::new(&self.position_file);
        let mut start = store.load()?;
        match &start {
            Some(position) => info!(
                "Resuming from {} at height {}",
                position.block_hash, position.block_height
            ),
            None => info!("No persisted position, starting fresh"),
        }

        metrics::start_server(self.metrics_port).await;

        loop {
            let transport = BitcoinCore::new(
                &self.bitcoin_rpc_url,
                self.bitcoin_rpc_user.clone(),
                self.bitcoin_rpc_pass.clone(),
            )?;

            let mut handle = ChainFollower::spawn(transport, start.take());

            // external shutdown requests feed the same control path as the API
            let commands = handle.commands();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    commands.stop(None).await;
                }
            });

            while let Some(message) = handle.next_message().await {
                match message {
                    Message::Block { block, position } => {
                        info!(
                            "Block {} at height {} ({} txs)",
                            block.hash,
                            position.block_height,
                            block.tx.len()
                        );
                        metrics::BLOCKS_FOLLOWED.inc();
                        metrics::CHAIN_HEIGHT.set(position.block_height as i64);
                        store.save(&position)?;
                    }
                    Message::Rollback {
                        old_position,
                        new_position,
                    } => {
                        info!(
                            "Rollback from height {} to {} at {}",
                            old_position.block_height,
                            new_position.block_height,
                            new_position.block_hash
                        );
                        metrics::ROLLBACKS.inc();
                        metrics::CHAIN_HEIGHT.set(new_position.block_height as i64);
                        store.save(&new_position)?;
                    }
                }
            }

            let end = match handle.join().await {
                Ok(end) => end,
                Err(err) => {
                    error!("Follower failed: {err}");
                    return Err(err.into());
                }
            };

            match end {
                RunEnd::Stopped => {
                    info!("Follower stopped");
                    return Ok(());
                }
                RunEnd::Restart { resync } => {
                    match &resync {
                        Some(position) => info!(
                            "Restarting from {} at height {}",
                            position.block_hash, position.block_height
                        ),
                        None => info!("Restarting"),
                    }
                    start = match resync {
                        Some(position) => Some(position),
                        None => store.load()?,
                    };
                }
            }
        }
    }
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn run_until_ctrl_c<F, E>(fut: F) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    E: Send + Sync + 'static + From<std::io::Error>,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = fut => res?,
    }

    Ok(())
}
