use std::num::NonZeroUsize;
use std::sync::Arc;

use bitcoin::{Transaction, Txid};
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::trace;

use crate::electrum::ElectrumApi;
use crate::error::CoreError;

/// Maximum number of decoded transactions kept in memory.
pub const RAW_TX_CACHE_CAP: usize = 4_096;

// ==============================================================================
// Raw Transaction Cache
// ==============================================================================

/// Decoded transactions keyed by txid, shared across wallet scans.
///
/// A transaction never changes once it has a txid, so entries are only
/// evicted under memory pressure, never invalidated.
pub struct RawTxCache {
    entries: RwLock<LruCache<Txid, Arc<Transaction>>>,
}

impl RawTxCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, txid: &Txid) -> Option<Arc<Transaction>> {
        self.entries.write().await.get(txid).cloned()
    }

    pub async fn insert(&self, tx: Transaction) -> Arc<Transaction> {
        let tx = Arc::new(tx);
        self.entries
            .write()
            .await
            .put(tx.compute_txid(), Arc::clone(&tx));
        tx
    }

    /// Cached transaction, or fetch, repair and decode it through `api`.
    pub async fn fetch(&self, api: &dyn ElectrumApi, txid: &Txid) -> Result<Arc<Transaction>, CoreError> {
        if let Some(tx) = self.get(txid).await {
            trace!(%txid, "raw tx cache hit");
            return Ok(tx);
        }
        let tx = api.get_transaction(txid).await?;
        Ok(self.insert(tx).await)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for RawTxCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(RAW_TX_CACHE_CAP).unwrap_or(NonZeroUsize::MIN))
    }
}
