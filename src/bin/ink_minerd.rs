// ink-minerd — the miner daemon.
//
// Usage: ink-minerd <registry_addr> <pubkey_hex> <privkey_hex>
//
// Registers with the registry, then runs the peer subsystem, PoW engine,
// and client API for as long as the process lives.

use colored::*;
use inkminer::config::NodeConfig;

fn usage() -> ! {
    eprintln!("{} ink-minerd <registry_addr> <pubkey_hex> <privkey_hex>", "usage:".bright_yellow().bold());
    eprintln!();
    eprintln!("  {} INKMINER_PEER_BIND   override the peer listen address (default 0.0.0.0:9100)", "env:".bright_black());
    eprintln!("  {} INKMINER_RPC_BIND    override the client API bind address (default 127.0.0.1:9101)", "env:".bright_black());
    eprintln!("  {} INKMINER_MAX_WORKERS override the PoW thread count (default: available_parallelism)", "env:".bright_black());
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        usage();
    }

    println!("{}", "ink-minerd starting".bright_cyan().bold());
    let cfg = NodeConfig::from_args(args[1].clone(), args[2].clone(), args[3].clone());
    println!("{} peer_bind={} rpc_bind={} registry={}", "[init]".bright_blue().bold(), cfg.peer_bind, cfg.rpc_bind, cfg.registry_addr);

    inkminer::node::run(cfg).await?;
    Ok(())
}
