//! On-chain state synchronization core.
//!
//! # Overview
//!
//! Keeps a client-side view of on-chain state (token balances, token
//! metadata, approvals, submitted transactions) consistent with one or more
//! EVM chains.
//!
//! * [`registry::ConnectorRegistry`] resolves which connector serves reads
//!   for a chain: the active wallet on its own chain, a read-only endpoint on
//!   every other supported chain.
//! * [`multicall::Multicall`] batches contract reads into one aggregated
//!   call per chain and caches results per block.
//! * [`transactions::TransactionTracker`] follows submitted transactions
//!   until their receipts are observed.
//! * [`balances::Balances`] projects balances, metadata and approval states
//!   from batched reads.
//!
//! [`session::Session`] wires them together, consumes connector
//! notifications and drives both polling loops.
//!
//! See `./tests` for examples.
//!
//! # Features
//!
//! | Feature | Default | Description |
//! | --- | --- | --- |
//! | `display` | yes | Enables [`std::fmt::Display`] tables for chains and transactions. |
//! | `testing` | yes | Enables [`testing`] module. |
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory node and wallet to exercise the
//! core without network access.

pub mod abi;
pub mod balances;
pub mod chain;
pub mod connector;
pub mod error;
pub mod multicall;
pub mod provider;
pub mod registry;
pub mod session;
#[cfg(feature = "testing")]
pub mod testing;
pub mod transactions;
