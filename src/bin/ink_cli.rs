// ink-cli — thin signed command-line adapter over the client API (§4.6).
//
// Usage: ink-cli <command> [args...]
//
// `open`/`ink`/`add`/`delete`/`close` need a session; the CLI opens one on
// every invocation for simplicity (no session persisted between calls) — a
// deliberate simplification over the RPC contract's intent for long-lived
// sessions, acceptable because a one-shot CLI has no notion of "later".

use std::env;

use colored::*;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use inkminer::crypto::keys::{self, PrivateKey, PublicKey};
use inkminer::primitives::operation::{OpType, Operation};

fn print_usage() {
    println!("{}", "ink-cli — signed client for an ink miner's client API".bright_cyan().bold());
    println!();
    println!("{}", "  Usage: ink-cli <command> [args...]".bright_yellow().bold());
    println!();
    println!("{}", "  Commands:".bright_white().bold());
    let rows: &[(&str, &str)] = &[
        ("keygen", "Generate a new P384 keypair"),
        ("open", "Open a canvas session, print client_id"),
        ("ink", "Print the caller's current ink balance"),
        ("add <svg> <fill> <stroke> <validate_num>", "Draw a shape"),
        ("delete <shape_hash> <validate_num>", "Erase a shape"),
        ("svg <shape_hash>", "Look up a shape's svg/fill/stroke"),
        ("shapes <block_hash>", "List shapes live as of a block"),
        ("genesis", "Print the genesis block"),
        ("children <block_hash>", "List a block's children"),
    ];
    for (cmd, desc) in rows {
        println!("  {} {:<42} {}", "❯".bright_black(), cmd.bright_green(), desc.white());
    }
    println!();
    println!("{}", "  env: INKMINER_RPC_ADDR (default 127.0.0.1:9101), INKMINER_PUBKEY, INKMINER_PRIVKEY".bright_black());
}

fn rpc_addr() -> String {
    env::var("INKMINER_RPC_ADDR").unwrap_or_else(|_| "127.0.0.1:9101".to_string())
}

fn keypair() -> Result<(PublicKey, PrivateKey), Box<dyn std::error::Error + Send + Sync>> {
    let pubkey_hex = env::var("INKMINER_PUBKEY").map_err(|_| "INKMINER_PUBKEY must be set (see `ink-cli keygen`)")?;
    let privkey_hex = env::var("INKMINER_PRIVKEY").map_err(|_| "INKMINER_PRIVKEY must be set (see `ink-cli keygen`)")?;
    let sk = PrivateKey::from_hex(&privkey_hex)?;
    let pk = PublicKey::from_hex(&pubkey_hex)?;
    Ok((pk, sk))
}

/// Signs `msg` (the JSON-encoded method payload) and sends the §6 envelope
/// to the client API over a single HTTP/1.1 POST, matching the bare-TCP
/// client style `knotcoin_cli.rs` uses instead of pulling in an HTTP client
/// crate for one call site.
async fn call(method: &str, params: Value, sk: &PrivateKey) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
    let msg = json!({ "method": method, "params": params }).to_string();
    let hashed_msg = inkminer::crypto::hash::hash_md5_hex(msg.as_bytes());
    let sig = sk.sign(msg.as_bytes());
    let (r, s) = keys::signature_to_rs_hex(&sig);
    let envelope = json!({ "msg": msg, "hashed_msg": hashed_msg, "r": r, "s": s }).to_string();

    let addr = rpc_addr();
    let request = format!(
        "POST /rpc HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{envelope}",
        envelope.len(),
    );

    let mut stream = TcpStream::connect(&addr).await?;
    stream.write_all(request.as_bytes()).await?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);
    let body = text.split("\r\n\r\n").nth(1).ok_or("empty response from miner")?;
    let parsed: Value = serde_json::from_str(body)?;

    if let Some(err) = parsed.get("error") {
        return Err(format!("miner returned an error: {err}").into());
    }
    parsed.get("result").cloned().ok_or_else(|| "response had no result field".into())
}

async fn open_session(sk: &PrivateKey, pubkey_hex: &str) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
    let result = call("OpenCanvas", json!({ "pubkey": pubkey_hex }), sk).await?;
    result.get("client_id").and_then(|v| v.as_u64()).ok_or_else(|| "OpenCanvas response had no client_id".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "keygen" => {
            let (pk, sk) = keys::generate_keypair();
            println!("{} {}", "pubkey: ".bright_yellow(), pk.to_hex().bright_white());
            println!("{} {}", "privkey:".bright_yellow(), sk.to_hex().bright_white());
            return Ok(());
        }
        "genesis" => {
            let (_pk, sk) = keypair()?;
            let result = call("GetGenesisBlock", json!({}), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        "children" => {
            let block_hash = args.get(2).ok_or("usage: ink-cli children <block_hash>")?;
            let (_pk, sk) = keypair()?;
            let result = call("GetChildren", json!({ "block_hash": block_hash }), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        "svg" => {
            let shape_hash = args.get(2).ok_or("usage: ink-cli svg <shape_hash>")?;
            let (_pk, sk) = keypair()?;
            let result = call("GetSvgString", json!({ "shape_hash": shape_hash }), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        "shapes" => {
            let block_hash = args.get(2).ok_or("usage: ink-cli shapes <block_hash>")?;
            let (_pk, sk) = keypair()?;
            let result = call("GetShapes", json!({ "block_hash": block_hash }), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        "open" => {
            let (pk, sk) = keypair()?;
            let client_id = open_session(&sk, &pk.to_hex()).await?;
            println!("{} {}", "client_id:".bright_yellow(), client_id);
            return Ok(());
        }
        "ink" => {
            let (pk, sk) = keypair()?;
            let client_id = open_session(&sk, &pk.to_hex()).await?;
            let result = call("GetInk", json!({ "client_id": client_id }), &sk).await?;
            println!("{} {}", "ink:".bright_yellow(), result.get("ink").cloned().unwrap_or(json!(null)));
            return Ok(());
        }
        "add" => {
            if args.len() != 6 {
                return Err("usage: ink-cli add <svg> <fill> <stroke> <validate_num>".into());
            }
            let (pk, sk) = keypair()?;
            let client_id = open_session(&sk, &pk.to_hex()).await?;
            let validate_num: u32 = args[5].parse()?;
            let op_num = next_op_num();
            let op = Operation::signed(OpType::Add, args[2].clone(), args[3].clone(), args[4].clone(), String::new(), validate_num, op_num, &sk, &pk);
            let result = call("AddShape", json!({ "client_id": client_id, "operation": op }), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        "delete" => {
            if args.len() != 4 {
                return Err("usage: ink-cli delete <shape_hash> <validate_num>".into());
            }
            let (pk, sk) = keypair()?;
            let client_id = open_session(&sk, &pk.to_hex()).await?;
            let validate_num: u32 = args[3].parse()?;
            let op_num = next_op_num();
            let op = Operation::signed(OpType::Delete, String::new(), String::new(), String::new(), args[2].clone(), validate_num, op_num, &sk, &pk);
            let result = call("DeleteShape", json!({ "client_id": client_id, "operation": op }), &sk).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        other => {
            eprintln!("{} unknown command {other}", "error:".bright_red().bold());
            print_usage();
            std::process::exit(1);
        }
    }
}

/// A per-process monotonic counter standing in for the op_num a long-lived
/// client would otherwise track across its session; good enough for a CLI
/// that signs exactly one operation per invocation.
fn next_op_num() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}
