//! Electrum lookup keys.
//!
//! Electrum indexes outputs by the sha256 of their `scriptPubKey`, displayed
//! byte-reversed as lowercase hex.

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::Script;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::{Address, Network};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scripthash([u8; 32]);

impl Scripthash {
    pub fn from_script(script: &Script) -> Self {
        let mut bytes = sha256::Hash::hash(script.as_bytes()).to_byte_array();
        bytes.reverse();
        Self(bytes)
    }

    pub fn from_address(address: &Address) -> Self {
        Self::from_script(&address.script_pubkey())
    }
}

/// Compute the Electrum scripthash of a textual address.
pub fn scripthash(address: &str, network: Network) -> Result<Scripthash, CoreError> {
    let address = Address::parse(address, network)?;
    Ok(Scripthash::from_address(&address))
}

impl fmt::Display for Scripthash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Scripthash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| format!("invalid scripthash: {e}"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Scripthash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scripthash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
