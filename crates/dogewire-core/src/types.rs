//! Wallet-facing domain types.
//!
//! Amounts are integer koinu (1e-8 DOGE, the satoshi equivalent) throughout.
//! Floating point appears only when decoding `blockchain.estimatefee`.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::address::Address;

// ==============================================================================
// Fee Rate
// ==============================================================================

/// Fee rate in satoshis per 1000 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const fn from_sat_per_kb(sat_per_kb: u64) -> Self {
        Self(sat_per_kb)
    }

    /// Saturates instead of overflowing for absurd inputs.
    pub const fn from_sat_per_byte(sat_per_byte: u64) -> Self {
        Self(sat_per_byte.saturating_mul(1000))
    }

    /// Decode a `blockchain.estimatefee` answer (coins per kB).
    /// Servers answer `-1` when they have no estimate.
    pub fn from_coins_per_kb(coins_per_kb: f64) -> Option<Self> {
        if !coins_per_kb.is_finite() || coins_per_kb <= 0.0 {
            return None;
        }
        let sat = (coins_per_kb * 100_000_000.0).round();
        if sat >= u64::MAX as f64 {
            return None;
        }
        Some(Self(sat as u64))
    }

    pub const fn sat_per_kb(self) -> u64 {
        self.0
    }

    /// Fee for `size` bytes, rounded up. `None` on overflow.
    pub fn fee_for_size(self, size: u64) -> Option<u64> {
        let product = size.checked_mul(self.0)?;
        Some(product.div_ceil(1000))
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat/kB", self.0)
    }
}

// ==============================================================================
// Coins and Payments
// ==============================================================================

/// An unspent output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub address: Address,
    /// Serialized previous transaction, needed for signing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_tx_hex: Option<String>,
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub address: Address,
    pub value_sat: u64,
}

impl Recipient {
    pub fn new(address: Address, value_sat: u64) -> Self {
        Self { address, value_sat }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftOutput {
    pub address: Address,
    pub value: u64,
    pub is_change: bool,
}

/// A fully priced, unsigned transaction plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionDraft {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<DraftOutput>,
    pub fee_sat: u64,
    pub estimated_size: u64,
    pub lock_time: u32,
}

impl TransactionDraft {
    pub fn total_in(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }

    pub fn total_out(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn change_output(&self) -> Option<&DraftOutput> {
        self.outputs.iter().find(|o| o.is_change)
    }
}

// ==============================================================================
// History
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// One history record from the point of view of a single wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletTransaction {
    pub txid: Txid,
    pub address: Address,
    pub direction: Direction,
    /// Absolute net amount moved for `address`.
    pub amount: u64,
    /// Block timestamp, 0 while unconfirmed or when the header is unavailable.
    pub time: u32,
    pub height: i64,
    pub confirmations: u32,
}
