//! Electrum wire-protocol client and Dogecoin transaction engine.

pub mod address;
pub mod cache;
pub mod electrum;
pub mod error;
pub mod rawtx;
pub mod scripthash;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod test_util;

pub use address::{Address, Network};
pub use cache::RawTxCache;
pub use electrum::{ElectrumApi, ElectrumClient};
pub use error::{CoreError, RpcError};
pub use scripthash::{scripthash, Scripthash};
pub use types::{FeeRate, Recipient, TransactionDraft, Utxo};
