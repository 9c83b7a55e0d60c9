// Peer wire protocol: length-prefixed JSON frames over a plain TCP stream.
// Mirrors the teacher's `FramedStream` (4-byte big-endian length prefix, one
// message per frame) but carries JSON bodies instead of a fixed binary
// struct layout, since every payload here (operations, blocks) is already a
// `serde`-derived type shared with the rest of the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::primitives::block::Block;
use crate::primitives::operation::Operation;

/// Frames larger than this are rejected outright — generous enough for a
/// full block of operations, small enough to bound a malicious peer's
/// ability to make a node allocate.
pub const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(u32),
    #[error("malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Sent immediately after connecting, identifying the sender.
    Hello { pubkey: String },
    /// Gossiped operation. `ttl` is decremented by each relaying peer and
    /// the message is dropped, not relayed further, once it reaches zero.
    GossipOp { op: Operation, ttl: u32 },
    /// Gossiped block, same TTL discipline as `GossipOp`.
    GossipBlock { block: Block, ttl: u32 },
    /// Requests the sender's full known chain (used to catch up after
    /// connecting to a peer that's further ahead).
    GetChain,
    Chain { blocks: Vec<Block> },
    Ping,
    Pong,
}

pub async fn write_message<W: AsyncWriteExt + Unpin>(writer: &mut W, msg: &PeerMessage) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec(msg)?;
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<PeerMessage, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
