// ink-registry — the coordinating bootstrap server (§6). Hands out the
// network-wide `MinerNetSettings` (canvas size, ink rewards, PoW
// difficulties, heartbeat interval, genesis hash) on a miner's first
// `Register` call, and from then on just tracks who's alive and answers
// `GetNodes`. A thin external collaborator, not a general-purpose service —
// every honest node on one network must talk to the same registry.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::*;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use inkminer::config::{CanvasSettings, MiningSettings};
use inkminer::primitives::block::Block;

const STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MinerNetSettings {
    genesis_hash: String,
    min_peer_count: u32,
    ink_per_op_block: u64,
    ink_per_noop_block: u64,
    heartbeat_ms: u64,
    difficulty_op: u32,
    difficulty_noop: u32,
    canvas_xmax: u32,
    canvas_ymax: u32,
}

fn env_override(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn net_settings() -> MinerNetSettings {
    let canvas = CanvasSettings::default();
    let mining = MiningSettings::default();
    // Computed exactly like any other empty block's hash — deterministic and
    // coordination-free across independently-started registry processes, as
    // long as they agree on the (fixed, code-level) seed fields below.
    let genesis_hash = Block::new(String::new(), vec![], String::new(), 0).hash();
    MinerNetSettings {
        genesis_hash,
        min_peer_count: 2,
        ink_per_op_block: mining.ink_per_op_block,
        ink_per_noop_block: mining.ink_per_no_op_block,
        heartbeat_ms: Duration::from_secs(inkminer::config::HEARTBEAT_INTERVAL_SECS).as_millis() as u64,
        // Overridable so integration tests and local devnets aren't stuck
        // waiting on the production difficulty's expected hash count.
        difficulty_op: env_override("INKMINER_DIFFICULTY_OP", mining.pow_difficulty_op_block),
        difficulty_noop: env_override("INKMINER_DIFFICULTY_NOOP", mining.pow_difficulty_no_op_block),
        canvas_xmax: canvas.x_max,
        canvas_ymax: canvas.y_max,
    }
}

struct Registry {
    settings: MinerNetSettings,
    miners: Mutex<HashMap<String, (String, Instant)>>,
}

async fn handle_request(registry: Arc<Registry>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = match req.collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return Ok(error_response(json!(null), -32700, "could not read request body")),
    };
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return Ok(error_response(json!(null), -32700, "malformed JSON")),
    };
    let id = parsed.get("id").cloned().unwrap_or(json!(null));
    let method = parsed.get("method").and_then(|v| v.as_str()).unwrap_or_default();
    let params = parsed.get("params").cloned().unwrap_or(json!({}));

    let result = match method {
        "Register" => handle_register(&registry, &params).await,
        "HeartBeat" => handle_heartbeat(&registry, &params).await,
        "GetNodes" => handle_get_nodes(&registry, &params).await,
        other => {
            eprintln!("{} unknown method {other}", "[registry]".bright_red().bold());
            Err("unknown method".to_string())
        }
    };

    Ok(match result {
        Ok(value) => Response::new(Full::new(Bytes::from(json!({ "jsonrpc": "2.0", "result": value, "id": id }).to_string()))),
        Err(msg) => error_response(id, -32000, &msg),
    })
}

async fn handle_register(registry: &Registry, params: &Value) -> Result<Value, String> {
    let address = params.get("address").and_then(|v| v.as_str()).ok_or("missing address")?.to_string();
    let pubkey = params.get("pubkey").and_then(|v| v.as_str()).ok_or("missing pubkey")?.to_string();
    registry.miners.lock().await.insert(pubkey.clone(), (address.clone(), Instant::now()));
    println!("{} miner {} registered at {}", "[registry]".bright_green().bold(), short(&pubkey), address);
    Ok(json!(registry.settings))
}

async fn handle_heartbeat(registry: &Registry, params: &Value) -> Result<Value, String> {
    let pubkey = params.get("pubkey").and_then(|v| v.as_str()).ok_or("missing pubkey")?;
    if let Some(entry) = registry.miners.lock().await.get_mut(pubkey) {
        entry.1 = Instant::now();
    }
    Ok(json!(null))
}

async fn handle_get_nodes(registry: &Registry, params: &Value) -> Result<Value, String> {
    let caller = params.get("pubkey").and_then(|v| v.as_str()).unwrap_or_default();
    let miners = registry.miners.lock().await;
    let addrs: Vec<String> = miners
        .iter()
        .filter(|(pubkey, (_, seen))| pubkey.as_str() != caller && seen.elapsed() < STALE_AFTER)
        .map(|(_, (addr, _))| addr.clone())
        .collect();
    Ok(json!(addrs))
}

fn error_response(id: Value, code: i32, message: &str) -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::from(
        json!({ "jsonrpc": "2.0", "error": { "code": code, "message": message }, "id": id }).to_string(),
    )))
}

fn short(pubkey: &str) -> &str {
    &pubkey[..pubkey.len().min(12)]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bind_addr = std::env::args().nth(1).unwrap_or_else(|| inkminer::config::DEFAULT_REGISTRY_BIND.to_string());
    let settings = net_settings();
    println!("{} genesis hash: {}", "[registry]".bright_cyan().bold(), settings.genesis_hash);

    let registry = Arc::new(Registry { settings, miners: Mutex::new(HashMap::new()) });
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("{} listening on {}", "[registry]".bright_cyan().bold(), listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            let svc = service_fn(move |req| handle_request(registry.clone(), req));
            let _ = hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
        });
    }
}
