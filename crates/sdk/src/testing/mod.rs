//! In-memory test environment.
//!
//! [`MockProvider`] stands in for a JSON-RPC node with a Multicall3
//! deployment, [`MockNetwork`] builds one per chain for a
//! [`crate::registry::ConnectorRegistry`] and [`MockWallet`] plays the role of
//! an interactive wallet.

mod provider;
mod wallet;

pub use provider::{Hold, MockNetwork, MockProvider};
pub use wallet::MockWallet;
