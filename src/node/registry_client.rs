// Registry RPC client: the three calls a miner makes to the coordinating
// registry server (§6) — Register, HeartBeat, GetNodes. Speaks the same
// JSON-RPC-over-HTTP shape the client API and `ink-registry` use, but over a
// bare TCP connection rather than a full hyper client, matching the
// teacher's `knotcoin_cli.rs` choice to hand-roll a minimal HTTP/1.1 POST
// instead of pulling in a client library for three call sites.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error talking to registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed registry response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("registry returned an error: {0}")]
    Remote(String),
    #[error("registry response had no body we could parse")]
    NoBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerInfo {
    pub address: String,
    pub pubkey: String,
}

/// Network-wide parameters a miner learns at `Register` time and otherwise
/// has no way to discover — every honest miner must agree on these, so they
/// come from the one shared collaborator rather than local config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerNetSettings {
    pub genesis_hash: String,
    pub min_peer_count: u32,
    pub ink_per_op_block: u64,
    pub ink_per_noop_block: u64,
    pub heartbeat_ms: u64,
    pub difficulty_op: u32,
    pub difficulty_noop: u32,
    pub canvas_xmax: u32,
    pub canvas_ymax: u32,
}

async fn rpc_call(registry_addr: &str, method: &str, params: Value) -> Result<Value, RegistryError> {
    let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 }).to_string();
    let request = format!(
        "POST /rpc HTTP/1.1\r\nHost: {registry_addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );

    let mut stream = TcpStream::connect(registry_addr).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);
    let json_body = text.split("\r\n\r\n").nth(1).ok_or(RegistryError::NoBody)?;
    let parsed: Value = serde_json::from_str(json_body)?;

    if let Some(err) = parsed.get("error") {
        return Err(RegistryError::Remote(err.to_string()));
    }
    parsed.get("result").cloned().ok_or(RegistryError::NoBody)
}

pub async fn register(registry_addr: &str, info: &MinerInfo) -> Result<MinerNetSettings, RegistryError> {
    let result = rpc_call(registry_addr, "Register", json!(info)).await?;
    Ok(serde_json::from_value(result)?)
}

pub async fn heartbeat(registry_addr: &str, pubkey: &str) -> Result<(), RegistryError> {
    rpc_call(registry_addr, "HeartBeat", json!({ "pubkey": pubkey })).await?;
    Ok(())
}

pub async fn get_nodes(registry_addr: &str, pubkey: &str) -> Result<Vec<String>, RegistryError> {
    let result = rpc_call(registry_addr, "GetNodes", json!({ "pubkey": pubkey })).await?;
    Ok(serde_json::from_value(result)?)
}
