//! Connection handshake.
//!
//! Both ends write a fixed-size hello and then read the peer's:
//!
//! ```text
//! ┌──────────────────┬────────────────────────┐
//! │ node id (u32 BE) │ session nonce (i32 BE) │
//! └──────────────────┴────────────────────────┘
//! ```
//!
//! Writing before reading cannot deadlock; eight bytes always fit in the
//! socket's send buffer. No frame is exchanged before both hellos are read,
//! so nothing is over-read from the stream.

use std::time::Duration;

use cloak_core::NodeId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NodeError;

/// Encoded hello size in bytes.
pub const HELLO_SIZE: usize = 8;

/// Identity announcement sent as the first bytes on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Sender's identity
    pub node_id: NodeId,
    /// Sender's current session nonce
    pub nonce: i32,
}

impl Hello {
    /// Encode to wire format.
    pub fn to_bytes(&self) -> [u8; HELLO_SIZE] {
        let mut bytes = [0u8; HELLO_SIZE];
        bytes[..4].copy_from_slice(&self.node_id.get().to_be_bytes());
        bytes[4..].copy_from_slice(&self.nonce.to_be_bytes());
        bytes
    }

    /// Decode from wire format.
    pub fn from_bytes(bytes: &[u8; HELLO_SIZE]) -> Self {
        let [a, b, c, d, e, f, g, h] = *bytes;
        Self {
            node_id: NodeId(u32::from_be_bytes([a, b, c, d])),
            nonce: i32::from_be_bytes([e, f, g, h]),
        }
    }
}

/// Exchange hellos over `stream` and return the peer's `NodeId`.
///
/// # Errors
///
/// - `HandshakeTimeout` if the peer's hello does not arrive within `timeout`
/// - `Io` if the stream fails or closes early
/// - `Handshake` if the peer runs a different session nonce or claims our
///   own `NodeId`
pub async fn exchange<S>(stream: &mut S, ours: Hello, timeout: Duration) -> Result<NodeId, NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io = async {
        stream.write_all(&ours.to_bytes()).await?;
        stream.flush().await?;

        let mut buf = [0u8; HELLO_SIZE];
        stream.read_exact(&mut buf).await?;
        Ok::<_, std::io::Error>(Hello::from_bytes(&buf))
    };

    let theirs =
        tokio::time::timeout(timeout, io).await.map_err(|_| NodeError::HandshakeTimeout(timeout))??;

    if theirs.nonce != ours.nonce {
        return Err(NodeError::Handshake(format!(
            "{} runs session nonce {}, expected {}",
            theirs.node_id, theirs.nonce, ours.nonce
        )));
    }
    if theirs.node_id == ours.node_id {
        return Err(NodeError::Handshake(format!("peer claims our own id {}", ours.node_id)));
    }

    Ok(theirs.node_id)
}
