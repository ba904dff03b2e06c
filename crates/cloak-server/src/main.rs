//! Cloak node binary.
//!
//! Listens for peers, dials the addresses given with `--connect`, broadcasts
//! each line read from stdin and logs every verified message it receives.
//! On Ctrl-C the node stops and, with `--audit-out`, writes its
//! accountability log as CBOR.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use cloak_core::{Ed25519Authenticator, NetworkEvent, NodeId};
use cloak_server::{Node, NodeConfig, TcpTransport};
use ed25519_dalek::VerifyingKey;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Cloak accountable transport node
#[derive(Parser, Debug)]
#[command(name = "cloak-node")]
#[command(about = "Accountable transport node for the Cloak group protocol")]
struct Args {
    /// Our node id
    #[arg(long)]
    id: u32,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:7000")]
    listen: String,

    /// Ed25519 secret key seed (32 bytes, hex)
    #[arg(long)]
    secret_key: String,

    /// Peer verifying key as `ID:PUBKEY_HEX` (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Peer address to dial after listening (repeatable)
    #[arg(long = "connect")]
    connect: Vec<String>,

    /// Session nonce
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    nonce: i32,

    /// Handshake timeout in seconds
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Write the accountability log here (CBOR) on shutdown
    #[arg(long)]
    audit_out: Option<PathBuf>,
}

fn parse_seed(hex_str: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_str)?;
    let seed: [u8; 32] =
        bytes.try_into().map_err(|_| "secret key must be 32 bytes (64 hex characters)")?;
    Ok(seed)
}

fn parse_peer(arg: &str) -> Result<(NodeId, VerifyingKey), Box<dyn std::error::Error>> {
    let (id, key) = arg.split_once(':').ok_or("peer must be ID:PUBKEY_HEX")?;
    let id: u32 = id.parse()?;
    let key: [u8; 32] = hex::decode(key)?
        .try_into()
        .map_err(|_| "peer key must be 32 bytes (64 hex characters)")?;
    Ok((NodeId(id), VerifyingKey::from_bytes(&key)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut authenticator = Ed25519Authenticator::from_seed(parse_seed(&args.secret_key)?);
    for arg in &args.peers {
        let (node, key) = parse_peer(arg)?;
        authenticator.add_peer(node, key);
    }
    tracing::info!(
        public_key = %hex::encode(authenticator.verifying_key().as_bytes()),
        peers = args.peers.len(),
        "identity loaded"
    );

    let mut config = NodeConfig::new(NodeId(args.id), args.listen.clone());
    config.handshake_timeout = Duration::from_secs(args.handshake_timeout);

    let (node, mut events) = Node::new(TcpTransport, authenticator, config);
    node.set_nonce(args.nonce);
    node.start_incoming().await?;

    for addr in &args.connect {
        match node.connect(addr).await {
            Ok(peer) => tracing::info!(%addr, node_id = %peer, "dialed"),
            Err(e) => tracing::warn!(%addr, error = %e, "dial failed"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut fatal = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let delivered = node.broadcast(line.as_bytes());
                    tracing::info!(delivered, "broadcast");
                },
                None => stdin_open = false,
            },
            Some(event) = events.recv() => match event {
                NetworkEvent::ReadyRead(peer) => {
                    while let Some(message) = node.read(peer) {
                        tracing::info!(node_id = %peer, message = %String::from_utf8_lossy(&message), "received");
                    }
                },
                NetworkEvent::InputError(peer) => tracing::warn!(node_id = %peer, "bad input"),
                NetworkEvent::Connected(peer) => tracing::info!(node_id = %peer, "peer connected"),
                NetworkEvent::Disconnected(peer) => {
                    tracing::info!(node_id = %peer, "peer disconnected");
                },
                NetworkEvent::Fatal(peer) => {
                    tracing::error!(node_id = %peer, "out of memory buffering input, shutting down");
                    fatal = Some(peer);
                    break;
                },
            },
        }
    }

    node.stop_incoming().await;

    let log = node.log();
    let stats = log.stats();
    tracing::info!(
        entries = log.len(),
        sent = stats.sent,
        failed_sends = stats.failed_sends,
        received_valid = stats.received_valid,
        received_invalid = stats.received_invalid,
        "shutdown"
    );

    if let Some(path) = args.audit_out {
        std::fs::write(&path, log.to_cbor()?)?;
        tracing::info!(path = %path.display(), "accountability log written");
    }

    match fatal {
        Some(peer) => Err(format!("unrecoverable error on input from {peer}").into()),
        None => Ok(()),
    }
}
