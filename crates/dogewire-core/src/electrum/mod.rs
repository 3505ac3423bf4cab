//! Electrum protocol client.
//!
//! Defines the [`ElectrumApi`] trait and the socket-backed implementation
//! ([`ElectrumClient`]) plus a test mock (`mock::MockElectrum`).

mod client;
mod connection;
mod dispatcher;
mod framing;
#[cfg(test)]
pub mod mock;
mod protocol;
pub mod subscriptions;
mod tls;
pub mod types;

pub use client::ElectrumClient;
pub use connection::{ClientOptions, ConnectionManager, ConnectionState, ConnectionTarget, Transport};
pub use subscriptions::{ChannelId, EventStream, SubscriptionEvent, SubscriptionRegistry};
pub use types::{Balance, HeaderTip, HistoryEntry, UnspentEntry};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Transaction, Txid};

use crate::address::{Address, Network};
use crate::error::CoreError;
use crate::rawtx::parse_raw_tx;
use crate::types::FeeRate;

/// The Electrum calls a wallet needs.
///
/// Implementations own connection management; callers never see sockets.
#[async_trait]
pub trait ElectrumApi: Send + Sync {
    fn network(&self) -> Network;

    async fn get_balance(&self, address: &Address) -> Result<Balance, CoreError>;

    async fn get_utxos(&self, address: &Address) -> Result<Vec<UnspentEntry>, CoreError>;

    async fn get_history(&self, address: &Address) -> Result<Vec<HistoryEntry>, CoreError>;

    /// Current chain tip from `blockchain.headers.subscribe`.
    async fn get_tip(&self) -> Result<HeaderTip, CoreError>;

    /// `None` when the server has no estimate for `target_blocks`.
    async fn estimate_fee(&self, target_blocks: u16) -> Result<Option<FeeRate>, CoreError>;

    /// Raw transaction hex exactly as the server sent it.
    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<String, CoreError>;

    /// 80-byte header hex at `height`.
    async fn get_block_header(&self, height: u32) -> Result<String, CoreError>;

    /// Relay a signed transaction. Server rejections keep their message.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, CoreError>;

    /// Point the client at another server. A no-op for the current target.
    async fn retarget(&self, target: &ConnectionTarget) -> Result<(), CoreError>;

    /// Watch `addresses`; events flow once a stream is attached.
    async fn open_subscription(&self, addresses: Vec<Address>) -> Result<ChannelId, CoreError>;

    fn attach_stream(&self, channel_id: &ChannelId) -> Result<EventStream, CoreError>;

    /// Stop delivering events for the channel. Purely local.
    fn close_subscription(&self, channel_id: &ChannelId) -> bool;

    async fn get_height(&self) -> Result<u32, CoreError> {
        Ok(self.get_tip().await?.height)
    }

    /// Fetch, repair and decode a transaction.
    async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        let raw = self.fetch_raw_tx(txid).await?;
        parse_raw_tx(&raw)
    }

    /// Repaired raw hex. Fails with `MalformedTransaction` when the
    /// transaction cannot be decoded even after repair.
    async fn get_raw_tx(&self, txid: &Txid) -> Result<String, CoreError> {
        let tx = self.get_transaction(txid).await?;
        Ok(serialize_hex(&tx))
    }
}
