//! Shared test helpers for `dogewire-core` unit tests.
//!
//! Builders for deterministic keys, addresses and funding transactions so
//! that tests across modules share a single source of truth for dummy data.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::address::{Address, Network};
use crate::types::Utxo;
use crate::wallet::keys::KeyPair;

// ==============================================================================
// Keys and Addresses
// ==============================================================================

/// Deterministic key pair distinguished by one byte.
pub fn keypair_from_byte(b: u8) -> KeyPair {
    let mut bytes = [0x11u8; 32];
    bytes[31] = b;
    let secret = SecretKey::from_slice(&bytes).expect("fixed bytes are a valid secret");
    KeyPair::from_secret(&Secp256k1::new(), secret)
}

/// Mainnet P2PKH address of [`keypair_from_byte`].
pub fn address_from_byte(b: u8) -> Address {
    keypair_from_byte(b).address(Network::Dogecoin)
}

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// A one-input transaction paying `outputs`. `seed` keeps txids distinct
/// between otherwise identical funding transactions.
pub fn funding_tx(seed: u8, outputs: &[(&Address, u64)]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(txid_from_byte(seed), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: address.script_pubkey(),
            })
            .collect(),
    }
}

/// The `vout` output of `tx` as a wallet UTXO with its raw parent attached.
pub fn utxo_from_tx(tx: &Transaction, vout: u32, address: &Address) -> Utxo {
    Utxo {
        txid: tx.compute_txid(),
        vout,
        value: tx.output[vout as usize].value.to_sat(),
        address: address.clone(),
        raw_tx_hex: Some(serialize_hex(tx)),
        confirmations: 6,
    }
}

/// A UTXO without a parent transaction, for selection-only tests.
pub fn bare_utxo(seed: u8, value: u64, address: &Address) -> Utxo {
    Utxo {
        txid: txid_from_byte(seed),
        vout: 0,
        value,
        address: address.clone(),
        raw_tx_hex: None,
        confirmations: 1,
    }
}
