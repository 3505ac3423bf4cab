use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Transaction, Txid};

use crate::address::{Address, Network};
use crate::error::{CoreError, RpcError};
use crate::types::FeeRate;

use super::connection::ConnectionTarget;
use super::subscriptions::{ChannelId, EventStream, SubscriptionRegistry};
use super::types::{Balance, HeaderTip, HistoryEntry, UnspentEntry};
use super::ElectrumApi;

/// An in-memory Electrum backend for tests, populated via the builder.
/// Data is keyed by address; unknown addresses look empty.
pub struct MockElectrum {
    network: Network,
    tip: HeaderTip,
    balances: HashMap<Address, Balance>,
    utxos: HashMap<Address, Vec<UnspentEntry>>,
    history: HashMap<Address, Vec<HistoryEntry>>,
    raw_txs: HashMap<Txid, String>,
    headers: HashMap<u32, String>,
    fee_rate: Option<FeeRate>,
    registry: Arc<SubscriptionRegistry>,
    broadcasts: Mutex<Vec<String>>,
    broadcast_error: Option<String>,
}

impl MockElectrum {
    pub fn builder() -> MockElectrumBuilder {
        MockElectrumBuilder {
            network: Network::Dogecoin,
            tip: HeaderTip {
                height: 100,
                hex: "00".repeat(80),
            },
            balances: HashMap::new(),
            utxos: HashMap::new(),
            history: HashMap::new(),
            raw_txs: HashMap::new(),
            headers: HashMap::new(),
            fee_rate: None,
            broadcast_error: None,
        }
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct MockElectrumBuilder {
    network: Network,
    tip: HeaderTip,
    balances: HashMap<Address, Balance>,
    utxos: HashMap<Address, Vec<UnspentEntry>>,
    history: HashMap<Address, Vec<HistoryEntry>>,
    raw_txs: HashMap<Txid, String>,
    headers: HashMap<u32, String>,
    fee_rate: Option<FeeRate>,
    broadcast_error: Option<String>,
}

impl MockElectrumBuilder {
    pub fn with_height(mut self, height: u32) -> Self {
        self.tip.height = height;
        self
    }

    pub fn with_balance(mut self, address: &Address, balance: Balance) -> Self {
        self.balances.insert(address.clone(), balance);
        self
    }

    pub fn with_utxo(mut self, address: &Address, entry: UnspentEntry) -> Self {
        self.utxos.entry(address.clone()).or_default().push(entry);
        self
    }

    pub fn with_history(mut self, address: &Address, entry: HistoryEntry) -> Self {
        self.history.entry(address.clone()).or_default().push(entry);
        self
    }

    pub fn with_tx(mut self, tx: &Transaction) -> Self {
        self.raw_txs.insert(tx.compute_txid(), serialize_hex(tx));
        self
    }

    /// Serve `hex` verbatim for `txid`, e.g. a broken encoding.
    pub fn with_raw_tx(mut self, txid: Txid, hex: impl Into<String>) -> Self {
        self.raw_txs.insert(txid, hex.into());
        self
    }

    pub fn with_header(mut self, height: u32, hex: impl Into<String>) -> Self {
        self.headers.insert(height, hex.into());
        self
    }

    pub fn with_fee_rate(mut self, rate: FeeRate) -> Self {
        self.fee_rate = Some(rate);
        self
    }

    pub fn with_broadcast_error(mut self, message: impl Into<String>) -> Self {
        self.broadcast_error = Some(message.into());
        self
    }

    pub fn build(self) -> MockElectrum {
        MockElectrum {
            network: self.network,
            tip: self.tip,
            balances: self.balances,
            utxos: self.utxos,
            history: self.history,
            raw_txs: self.raw_txs,
            headers: self.headers,
            fee_rate: self.fee_rate,
            registry: Arc::new(SubscriptionRegistry::new()),
            broadcasts: Mutex::new(Vec::new()),
            broadcast_error: self.broadcast_error,
        }
    }
}

fn not_found(what: String) -> CoreError {
    RpcError::ServerError {
        code: Some(2),
        message: what,
    }
    .into()
}

#[async_trait]
impl ElectrumApi for MockElectrum {
    fn network(&self) -> Network {
        self.network
    }

    async fn get_balance(&self, address: &Address) -> Result<Balance, CoreError> {
        Ok(self.balances.get(address).copied().unwrap_or_default())
    }

    async fn get_utxos(&self, address: &Address) -> Result<Vec<UnspentEntry>, CoreError> {
        Ok(self.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_history(&self, address: &Address) -> Result<Vec<HistoryEntry>, CoreError> {
        Ok(self.history.get(address).cloned().unwrap_or_default())
    }

    async fn get_tip(&self) -> Result<HeaderTip, CoreError> {
        Ok(self.tip.clone())
    }

    async fn estimate_fee(&self, _target_blocks: u16) -> Result<Option<FeeRate>, CoreError> {
        Ok(self.fee_rate)
    }

    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<String, CoreError> {
        self.raw_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found(format!("no such mempool or blockchain transaction {txid}")))
    }

    async fn get_block_header(&self, height: u32) -> Result<String, CoreError> {
        self.headers
            .get(&height)
            .cloned()
            .ok_or_else(|| not_found(format!("height {height} out of range")))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, CoreError> {
        if let Some(message) = &self.broadcast_error {
            return Err(RpcError::ServerError {
                code: Some(1),
                message: message.clone(),
            }
            .into());
        }
        let tx = crate::rawtx::parse_raw_tx(raw_tx_hex)?;
        self.broadcasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(raw_tx_hex.to_owned());
        Ok(tx.compute_txid())
    }

    async fn retarget(&self, _target: &ConnectionTarget) -> Result<(), CoreError> {
        Ok(())
    }

    async fn open_subscription(&self, addresses: Vec<Address>) -> Result<ChannelId, CoreError> {
        let channel_id = ChannelId::random();
        self.registry.subscribe_channel(channel_id.clone(), addresses);
        Ok(channel_id)
    }

    fn attach_stream(&self, channel_id: &ChannelId) -> Result<EventStream, CoreError> {
        self.registry.attach_sink(channel_id)
    }

    fn close_subscription(&self, channel_id: &ChannelId) -> bool {
        self.registry.close_channel(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{address_from_byte, funding_tx};

    #[tokio::test]
    async fn default_methods_decode_served_transactions() {
        let address = address_from_byte(1);
        let tx = funding_tx(1, &[(&address, 10_000)]);
        let txid = tx.compute_txid();
        let rpc = MockElectrum::builder().with_tx(&tx).with_height(500).build();

        assert_eq!(rpc.get_height().await.expect("tip"), 500);
        assert_eq!(rpc.get_transaction(&txid).await.expect("tx"), tx);
        assert_eq!(rpc.get_raw_tx(&txid).await.expect("raw"), serialize_hex(&tx));
    }

    #[tokio::test]
    async fn get_raw_tx_repairs_missing_input_count() {
        let address = address_from_byte(2);
        let tx = funding_tx(1, &[(&address, 10_000)]);
        let txid = tx.compute_txid();
        let hex = serialize_hex(&tx);
        let broken = format!("{}{}", &hex[..8], &hex[10..]);
        let rpc = MockElectrum::builder().with_raw_tx(txid, broken).build();

        assert_eq!(rpc.get_raw_tx(&txid).await.expect("repaired"), hex);
    }

    #[tokio::test]
    async fn get_raw_tx_is_fatal_for_undecodable_hex() {
        let txid = crate::test_util::txid_from_byte(9);
        let rpc = MockElectrum::builder().with_raw_tx(txid, "0100000001ff").build();

        let err = rpc.get_raw_tx(&txid).await.expect_err("must fail");
        assert!(matches!(err, CoreError::MalformedTransaction(_)));
    }

    #[tokio::test]
    async fn broadcast_error_keeps_server_message() {
        let rpc = MockElectrum::builder()
            .with_broadcast_error("min relay fee not met")
            .build();
        let err = rpc.broadcast("00").await.expect_err("must fail");
        assert_eq!(err.to_string(), "server error: min relay fee not met");
    }
}
