//! Voice Node
//!
//! Streams a DCA file to a voice server over an encrypted UDP session.
//!
//! ```text
//! voice-node <endpoint> <ssrc> <hex-secret> <file.dca> [mode]
//! ```

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_node::{
    codec::OPUS,
    config::AppConfig,
    media::{DcaReader, SharedFrameQueue, SILENCE_FRAME_COUNT},
    protocol::SessionDescription,
    NodeContext, VoiceNode,
};

const GUILD_ID: u64 = 0;

struct Args {
    endpoint: SocketAddr,
    ssrc: u32,
    secret: Vec<u8>,
    file: PathBuf,
    mode: Option<String>,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 || args.len() > 5 {
        bail!("usage: voice-node <endpoint> <ssrc> <hex-secret> <file.dca> [mode]");
    }

    Ok(Args {
        endpoint: args[0].parse().context("Invalid endpoint address")?,
        ssrc: args[1].parse().context("Invalid ssrc")?,
        secret: hex::decode(&args[2]).context("Secret must be hex encoded")?,
        file: PathBuf::from(&args[3]),
        mode: args.get(4).cloned(),
    })
}

fn main() -> Result<()> {
    let config_path = std::env::var_os("VOICE_NODE_CONFIG").map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.node.worker_threads)
        .thread_name("voice-worker")
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(run(config, args))
}

async fn run(config: AppConfig, args: Args) -> Result<()> {
    tracing::info!("Starting voice node");

    let ctx = NodeContext::with_defaults(tokio::runtime::Handle::current(), config.voice.clone());
    let modes = match args.mode {
        Some(mode) => vec![mode],
        None => ctx.encryption().names().into_iter().map(String::from).collect(),
    };

    let session = SessionDescription {
        endpoint: args.endpoint,
        ssrc: args.ssrc,
        secret_key: args.secret,
        modes,
        payload_type: OPUS.payload_type,
    };

    // Print outbound gateway commands as they would go to the control plane
    let (commands_tx, mut commands_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(command) = commands_rx.recv().await {
            match serde_json::to_string(&command) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Failed to encode gateway command: {}", e),
            }
        }
    });

    let node = VoiceNode::new(ctx, config.node.bind_address);
    node.connect(GUILD_ID, &session, commands_tx)
        .await
        .context("Failed to establish voice session")?;

    if let Some(connection) = node.get(GUILD_ID) {
        tracing::info!(
            "Session {} up: mode {}, external address {:?}",
            connection.id(),
            connection.mode_name(),
            connection.external_addr()
        );
    }

    let reader = DcaReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let queue = node.provide_queue(GUILD_ID)?;

    let stop = Arc::new(AtomicBool::new(false));
    let feeder = {
        let queue = queue.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("dca-feeder".into())
            .spawn(move || feed(reader, queue, stop))
            .context("Failed to spawn feeder thread")?
    };

    tracing::info!("Streaming {} - press Ctrl+C to stop", args.file.display());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
        _ = drained(feeder_done(&feeder), queue.clone()) => {
            tracing::info!("End of stream");
        }
    }

    stop.store(true, Ordering::Release);

    if let Some(connection) = node.get(GUILD_ID) {
        let stats = connection.stats();
        tracing::info!(
            "Stats: {} packets sent, {:.1} KB sent, {} send failures, {} seal failures",
            stats.packets_sent,
            stats.bytes_sent as f64 / 1024.0,
            stats.send_failures,
            stats.seal_failures
        );
    }
    tracing::info!(
        "Queue: {}/{} frames left, {} overflows, {} underruns",
        queue.len(),
        queue.capacity(),
        queue.overflow_count(),
        queue.underrun_count()
    );

    node.shutdown();
    if feeder.join().is_err() {
        tracing::warn!("Feeder thread panicked");
    }
    Ok(())
}

/// Push frames into the queue, backing off while it is full
fn feed<R: std::io::Read>(reader: DcaReader<R>, queue: SharedFrameQueue, stop: Arc<AtomicBool>) {
    let mut frames = 0usize;
    for frame in reader {
        let mut frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Stopped reading DCA stream: {}", e);
                break;
            }
        };

        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }
            // back off without touching the overflow count
            if queue.is_full() {
                std::thread::sleep(OPUS.frame_interval());
                continue;
            }
            match queue.push(frame) {
                Ok(()) => break,
                Err(rejected) => frame = rejected,
            }
        }
        frames += 1;
    }
    tracing::debug!("Fed {} frames", frames);
}

fn feeder_done(feeder: &std::thread::JoinHandle<()>) -> impl std::future::Future<Output = ()> + '_ {
    async move {
        while !feeder.is_finished() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Resolves once the feeder is done and the queue plus silence burst went out
async fn drained(feeder: impl std::future::Future<Output = ()>, queue: SharedFrameQueue) {
    feeder.await;
    while !queue.is_empty() {
        tokio::time::sleep(OPUS.frame_interval()).await;
    }
    tokio::time::sleep(OPUS.frame_interval() * (SILENCE_FRAME_COUNT + 1)).await;
}
