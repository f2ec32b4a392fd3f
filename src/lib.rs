//! # DEX Event Indexer
//!
//! Event harvesting and state-reconstruction engine for a DEX protocol,
//! built on [Alloy](https://github.com/alloy-rs/alloy).
//!
//! The engine ingests on-chain smart-contract events and turns them into
//! consistent, queryable derived state:
//!
//! - **Event Harvester** ([`harvester`]) — pulls contract events over
//!   bounded block ranges with bounded concurrency and resumable per-stream
//!   cursors, maps them through declarative rule pipelines, and persists
//!   them idempotently.
//! - **Order Codec** ([`codec`]) — decodes the protocol's packed
//!   (mantissa, exponent) order encoding into real liquidity and price
//!   values, plus proportional fee attribution.
//! - **Referral State Machine** ([`referral`]) — replays a chronologically
//!   ordered referral event log into point-in-time trader → code → tier
//!   snapshots, resumable from any batch boundary.
//! - **Multicall Batch Reader** ([`multicall`]) — aggregates many read-only
//!   contract calls into one RPC round trip across two on-chain dialects.
//!
//! ## Architecture
//!
//! The crate is organized into independent layers:
//!
//! 1. **Config Layer** ([`config`]) - Environment variable loading
//! 2. **RPC Layer** ([`rpc`]) - The `ChainClient` collaborator trait and its
//!    Alloy HTTP implementation
//! 3. **Events Layer** ([`events`]) - Typed event definitions and decoders
//! 4. **Persistence Layer** ([`db`]) - SQLite-backed repository
//! 5. **Engine Layers** ([`harvester`], [`referral`], [`multicall`],
//!    [`codec`]) - The core algorithms
//! 6. **Scheduling** ([`scheduler`]) - Fixed-interval cycle driving with a
//!    TTL deployment lock
//!
//! ## Quick Start
//!
//! ```bash
//! # One-shot catch-up
//! cargo run --release -- sync
//!
//! # Continuous indexing
//! cargo run --release -- run
//! ```
//!
//! ## Environment Setup
//!
//! Create a `.env` file:
//!
//! ```text
//! RPC_URL=https://eth-mainnet.example/v2/YOUR_KEY
//! DATABASE_URL=sqlite:./indexer.db
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::IndexerResult<T>`](error::IndexerResult)
//! for consistent error propagation:
//!
//! ```rust
//! use dex_event_indexer::error::{IndexerError, IndexerResult};
//!
//! fn example() -> IndexerResult<()> {
//!     // Operations that can fail return IndexerResult
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod db;
pub mod deployment;
pub mod error;
pub mod events;
pub mod harvester;
pub mod multicall;
pub mod observability;
pub mod referral;
pub mod rpc;
pub mod scheduler;
