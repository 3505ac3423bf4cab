//! Dogecoin network parameters and base58check addresses.
//!
//! The `bitcoin` crate only knows Bitcoin's version bytes, so address
//! encoding lives here while hashing and script construction are delegated
//! to it.

use std::fmt;
use std::str::FromStr;

use bitcoin::base58;
use bitcoin::hashes::Hash;
use bitcoin::{PubkeyHash, PublicKey, Script, ScriptBuf, ScriptHash};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;

// ==============================================================================
// Network Parameters
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Dogecoin,
    Testnet,
}

impl Network {
    pub const fn p2pkh_prefix(self) -> u8 {
        match self {
            Self::Dogecoin => 0x1e,
            Self::Testnet => 0x71,
        }
    }

    pub const fn p2sh_prefix(self) -> u8 {
        match self {
            Self::Dogecoin => 0x16,
            Self::Testnet => 0xc4,
        }
    }

    pub const fn wif_prefix(self) -> u8 {
        match self {
            Self::Dogecoin => 0x9e,
            Self::Testnet => 0xf1,
        }
    }

    /// BIP44 coin type used in derivation paths.
    pub const fn coin_type(self) -> u32 {
        match self {
            Self::Dogecoin => 3,
            Self::Testnet => 1,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dogecoin => write!(f, "dogecoin"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dogecoin" | "doge" | "main" | "mainnet" => Ok(Self::Dogecoin),
            "testnet" | "test" => Ok(Self::Testnet),
            other => Err(format!("unknown network `{other}`")),
        }
    }
}

// ==============================================================================
// Address
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payload {
    PubkeyHash(PubkeyHash),
    ScriptHash(ScriptHash),
}

/// A spendable Dogecoin address bound to one network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    payload: Payload,
    network: Network,
}

impl Address {
    /// Decode a base58check address, rejecting addresses of other networks.
    pub fn parse(s: &str, network: Network) -> Result<Self, CoreError> {
        let data = base58::decode_check(s.trim())
            .map_err(|e| CoreError::invalid_address(s, format!("base58: {e}")))?;
        let (prefix, hash) = data
            .split_first()
            .ok_or_else(|| CoreError::invalid_address(s, "empty payload"))?;
        let hash: [u8; 20] = hash
            .try_into()
            .map_err(|_| CoreError::invalid_address(s, "payload must be 20 bytes"))?;

        let payload = if *prefix == network.p2pkh_prefix() {
            Payload::PubkeyHash(PubkeyHash::from_byte_array(hash))
        } else if *prefix == network.p2sh_prefix() {
            Payload::ScriptHash(ScriptHash::from_byte_array(hash))
        } else {
            return Err(CoreError::invalid_address(
                s,
                format!("version byte {prefix:#04x} is not valid on {network}"),
            ));
        };

        Ok(Self { payload, network })
    }

    pub fn p2pkh(public_key: &PublicKey, network: Network) -> Self {
        Self {
            payload: Payload::PubkeyHash(public_key.pubkey_hash()),
            network,
        }
    }

    /// Recover the address paying to `script`, if it is P2PKH or P2SH.
    pub fn from_script(script: &Script, network: Network) -> Option<Self> {
        let bytes = script.as_bytes();
        let payload = if script.is_p2pkh() {
            let hash: [u8; 20] = bytes[3..23].try_into().ok()?;
            Payload::PubkeyHash(PubkeyHash::from_byte_array(hash))
        } else if script.is_p2sh() {
            let hash: [u8; 20] = bytes[2..22].try_into().ok()?;
            Payload::ScriptHash(ScriptHash::from_byte_array(hash))
        } else {
            return None;
        };
        Some(Self { payload, network })
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        match &self.payload {
            Payload::PubkeyHash(hash) => ScriptBuf::new_p2pkh(hash),
            Payload::ScriptHash(hash) => ScriptBuf::new_p2sh(hash),
        }
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = Vec::with_capacity(21);
        match &self.payload {
            Payload::PubkeyHash(hash) => {
                data.push(self.network.p2pkh_prefix());
                data.extend_from_slice(hash.as_byte_array());
            }
            Payload::ScriptHash(hash) => {
                data.push(self.network.p2sh_prefix());
                data.extend_from_slice(hash.as_byte_array());
            }
        }
        f.write_str(&base58::encode_check(&data))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
