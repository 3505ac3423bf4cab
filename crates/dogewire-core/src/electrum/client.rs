use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bitcoin::Txid;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::address::{Address, Network};
use crate::error::{CoreError, RpcError};
use crate::scripthash::Scripthash;
use crate::types::FeeRate;

use super::connection::{ClientOptions, ConnectionManager, ConnectionState, ConnectionTarget};
use super::protocol::{METHOD_HEADERS_SUBSCRIBE, METHOD_SCRIPTHASH_SUBSCRIBE};
use super::subscriptions::{ChannelId, EventStream, SubscriptionRegistry};
use super::types::{Balance, HeaderTip, HistoryEntry, UnspentEntry};
use super::ElectrumApi;

struct ClientInner {
    manager: ConnectionManager,
    registry: Arc<SubscriptionRegistry>,
    target: RwLock<ConnectionTarget>,
    network: Network,
}

/// Cloneable handle to one Electrum connection.
///
/// Every RPC first makes sure the socket points at the configured target,
/// so callers never connect explicitly.
#[derive(Clone)]
pub struct ElectrumClient {
    inner: Arc<ClientInner>,
}

impl ElectrumClient {
    pub fn new(target: ConnectionTarget, network: Network, options: ClientOptions) -> Result<Self, CoreError> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let manager = ConnectionManager::new(options, Arc::clone(&registry))?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                manager,
                registry,
                target: RwLock::new(target),
                network,
            }),
        })
    }

    pub fn target(&self) -> ConnectionTarget {
        self.inner
            .target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.manager.state().await
    }

    pub fn sockets_opened(&self) -> u64 {
        self.inner.manager.sockets_opened()
    }

    /// Connect to the configured target if not already connected.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let target = self.target();
        self.inner.manager.ensure_connected(&target).await
    }

    /// Drop the connection. The next call reconnects.
    pub async fn close(&self) {
        self.inner.manager.close().await;
    }

    /// Issue a raw Electrum call, connecting first when needed.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        self.connect().await?;
        self.inner.manager.call(method, params).await
    }

    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, CoreError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")).into())
    }

    fn check_network(&self, address: &Address) -> Result<Scripthash, CoreError> {
        if address.network() != self.inner.network {
            return Err(CoreError::invalid_address(
                &address.to_string(),
                format!("address is for {}, client is on {}", address.network(), self.inner.network),
            ));
        }
        Ok(Scripthash::from_address(address))
    }

    async fn scripthash_call<T: DeserializeOwned>(&self, method: &str, address: &Address) -> Result<T, CoreError> {
        let scripthash = self.check_network(address)?;
        self.call_typed(method, vec![Value::from(scripthash.to_string())])
            .await
    }
}

#[async_trait]
impl ElectrumApi for ElectrumClient {
    fn network(&self) -> Network {
        self.inner.network
    }

    async fn get_balance(&self, address: &Address) -> Result<Balance, CoreError> {
        self.scripthash_call("blockchain.scripthash.get_balance", address)
            .await
    }

    async fn get_utxos(&self, address: &Address) -> Result<Vec<UnspentEntry>, CoreError> {
        self.scripthash_call("blockchain.scripthash.listunspent", address)
            .await
    }

    async fn get_history(&self, address: &Address) -> Result<Vec<HistoryEntry>, CoreError> {
        self.scripthash_call("blockchain.scripthash.get_history", address)
            .await
    }

    async fn get_tip(&self) -> Result<HeaderTip, CoreError> {
        self.call_typed(METHOD_HEADERS_SUBSCRIBE, vec![]).await
    }

    async fn estimate_fee(&self, target_blocks: u16) -> Result<Option<FeeRate>, CoreError> {
        let coins_per_kb: f64 = self
            .call_typed("blockchain.estimatefee", vec![Value::from(target_blocks)])
            .await?;
        Ok(FeeRate::from_coins_per_kb(coins_per_kb))
    }

    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<String, CoreError> {
        self.call_typed("blockchain.transaction.get", vec![Value::from(txid.to_string())])
            .await
    }

    async fn get_block_header(&self, height: u32) -> Result<String, CoreError> {
        self.call_typed("blockchain.block.header", vec![Value::from(height)])
            .await
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, CoreError> {
        let txid: String = self
            .call_typed("blockchain.transaction.broadcast", vec![Value::from(raw_tx_hex)])
            .await?;
        txid.parse()
            .map_err(|e| RpcError::InvalidResponse(format!("broadcast returned `{txid}`: {e}")).into())
    }

    async fn retarget(&self, target: &ConnectionTarget) -> Result<(), CoreError> {
        *self
            .inner
            .target
            .write()
            .unwrap_or_else(PoisonError::into_inner) = target.clone();
        self.inner.manager.ensure_connected(target).await
    }

    async fn open_subscription(&self, addresses: Vec<Address>) -> Result<ChannelId, CoreError> {
        for address in &addresses {
            self.check_network(address)?;
        }
        self.connect().await?;

        let channel_id = ChannelId::random();
        let fresh = self
            .inner
            .registry
            .subscribe_channel(channel_id.clone(), addresses);

        let calls = fresh.iter().map(|topic| async move {
            let result = self
                .inner
                .manager
                .call(METHOD_SCRIPTHASH_SUBSCRIBE, vec![Value::from(topic.to_string())])
                .await;
            (topic, result)
        });
        for (topic, result) in join_all(calls).await {
            match result {
                Ok(status) => debug!(scripthash = %topic, %status, "scripthash subscribed"),
                Err(err) => {
                    warn!(scripthash = %topic, error = %err, "scripthash subscribe failed");
                    self.inner.registry.upstream_failed(topic);
                }
            }
        }
        Ok(channel_id)
    }

    fn attach_stream(&self, channel_id: &ChannelId) -> Result<EventStream, CoreError> {
        self.inner.registry.attach_sink(channel_id)
    }

    fn close_subscription(&self, channel_id: &ChannelId) -> bool {
        self.inner.registry.close_channel(channel_id)
    }
}
