//! Ethereum bindings for the REST gateway: a JSON-RPC client implementing
//! the core `EthRpc` trait, the wire-transaction builder, a local-wallet
//! signer adapter, and the solc subprocess adapter.

#![forbid(unsafe_code)]

mod compiler;
mod provider;
mod signer;
mod txn;

pub use compiler::{select_contract, SolcCompiler};
pub use provider::HttpRpc;
pub use signer::WalletSigner;
pub use txn::{Txn, GAP_FILL_GAS_LIMIT};
