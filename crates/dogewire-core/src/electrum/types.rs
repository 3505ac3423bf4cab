//! Result shapes of the Electrum methods the client uses.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// `blockchain.scripthash.get_balance`. Unconfirmed can be negative when
/// mempool transactions spend confirmed coins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: i64,
}

/// One element of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    pub value: u64,
    /// Zero while the output is unconfirmed.
    #[serde(default)]
    pub height: u32,
}

/// One element of `blockchain.scripthash.get_history`.
///
/// Height is 0 for mempool transactions and -1 for mempool transactions
/// with unconfirmed parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: Txid,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

impl HistoryEntry {
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// `blockchain.headers.subscribe` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderTip {
    pub height: u32,
    pub hex: String,
}

/// Number of confirmations of an item mined at `height` given the chain tip.
pub fn confirmations(tip: u32, height: i64) -> u32 {
    if height <= 0 {
        return 0;
    }
    let height = u32::try_from(height).unwrap_or(u32::MAX);
    tip.checked_sub(height).map_or(0, |depth| depth.saturating_add(1))
}
