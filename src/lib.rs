//! inkminer: a peer-to-peer proof-of-work blockchain whose ledger is a
//! shared, bounded 2D canvas. Clients spend mined "ink" to draw and erase
//! SVG shapes; miners gossip operations and blocks and agree on a canonical
//! history the same way any PoW chain does — longest chain wins, ties broken
//! deterministically.
//!
//! Module map:
//! - [`primitives`]: the wire/storage types — `Point`, `Operation`, `Block`.
//! - [`crypto`]: MD5 content hashing and P384 ECDSA signing.
//! - [`shapes`]: the SVG/circle mini-language parser and pixel rasterizer.
//! - [`consensus`]: the block store, canvas-state validator, and `Chain` facade.
//! - [`miner`]: the PoW nonce search and the mining coordinator state machine.
//! - [`net`]: the peer wire protocol.
//! - [`node`]: orchestration — peer subsystem, registry client, client API.
//! - [`config`]: network-wide and per-node configuration.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod miner;
pub mod net;
pub mod node;
pub mod primitives;
pub mod shapes;
