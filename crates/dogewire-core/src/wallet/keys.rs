//! Key material and the wallet's address book.
//!
//! Mnemonic handling and encrypted storage live outside this crate; keys
//! arrive either as WIF strings or as a BIP32 seed behind [`KeyDerivation`].

use std::collections::HashMap;
use std::fmt;

use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{NetworkKind, PublicKey};
use serde::Serialize;

use crate::address::{Address, Network};
use crate::error::CoreError;

// ==============================================================================
// Key Pairs
// ==============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Compressed key pair for `secret`.
    pub fn from_secret(secp: &Secp256k1<All>, secret: SecretKey) -> Self {
        Self {
            public: PublicKey::new(secret.public_key(secp)),
            secret,
        }
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(&self.public, network)
    }

    pub fn to_wif(&self, network: Network) -> String {
        let mut data = Vec::with_capacity(34);
        data.push(network.wif_prefix());
        data.extend_from_slice(&self.secret.secret_bytes());
        if self.public.compressed {
            data.push(0x01);
        }
        base58::encode_check(&data)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Decode a Dogecoin WIF private key.
pub fn decode_wif(wif: &str, network: Network) -> Result<KeyPair, CoreError> {
    let data = base58::decode_check(wif.trim())
        .map_err(|e| CoreError::InvalidKey(format!("WIF base58: {e}")))?;

    let (prefix, rest) = data
        .split_first()
        .ok_or_else(|| CoreError::InvalidKey("empty WIF payload".to_owned()))?;
    if *prefix != network.wif_prefix() {
        return Err(CoreError::InvalidKey(format!(
            "WIF version byte {prefix:#04x} is not valid on {network}"
        )));
    }

    let (secret_bytes, compressed) = match rest {
        [secret @ .., 0x01] if secret.len() == 32 => (secret, true),
        secret if secret.len() == 32 => (secret, false),
        _ => return Err(CoreError::InvalidKey("WIF payload has the wrong length".to_owned())),
    };

    let secret = SecretKey::from_slice(secret_bytes)
        .map_err(|e| CoreError::InvalidKey(format!("WIF secret: {e}")))?;
    let secp = Secp256k1::new();
    let inner = secret.public_key(&secp);
    let public = if compressed {
        PublicKey::new(inner)
    } else {
        PublicKey::new_uncompressed(inner)
    };
    Ok(KeyPair { secret, public })
}

// ==============================================================================
// Derivation
// ==============================================================================

/// Deterministic `path -> key` derivation without network access.
pub trait KeyDerivation: Send + Sync {
    fn derive(&self, path: &DerivationPath) -> Result<KeyPair, CoreError>;
}

/// BIP32 derivation from a raw seed.
pub struct SeedKeys {
    master: Xpriv,
    secp: Secp256k1<All>,
}

impl SeedKeys {
    pub fn new(seed: &[u8], network: Network) -> Result<Self, CoreError> {
        let kind = match network {
            Network::Dogecoin => NetworkKind::Main,
            Network::Testnet => NetworkKind::Test,
        };
        let master = Xpriv::new_master(kind, seed)
            .map_err(|e| CoreError::InvalidKey(format!("seed: {e}")))?;
        Ok(Self {
            master,
            secp: Secp256k1::new(),
        })
    }
}

impl KeyDerivation for SeedKeys {
    fn derive(&self, path: &DerivationPath) -> Result<KeyPair, CoreError> {
        let child = self
            .master
            .derive_priv(&self.secp, path)
            .map_err(|e| CoreError::InvalidKey(format!("derive {path}: {e}")))?;
        Ok(KeyPair::from_secret(&self.secp, child.private_key))
    }
}

/// Locally held keys, looked up by the address they control.
#[derive(Default)]
pub struct KeyRing {
    keys: HashMap<Address, KeyPair>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_wifs<'a>(wifs: impl IntoIterator<Item = &'a str>, network: Network) -> Result<Self, CoreError> {
        let mut ring = Self::new();
        for wif in wifs {
            ring.insert(decode_wif(wif, network)?, network);
        }
        Ok(ring)
    }

    /// Derive and hold the key of every address in `book`.
    pub fn from_book(keys: &dyn KeyDerivation, book: &AddressBook) -> Result<Self, CoreError> {
        let mut ring = Self::new();
        for entry in book.entries() {
            let pair = keys.derive(&entry.path)?;
            if pair.address(book.network()) != entry.address {
                return Err(CoreError::InvalidKey(format!(
                    "key at {} does not control {}",
                    entry.path, entry.address
                )));
            }
            ring.keys.insert(entry.address.clone(), pair);
        }
        Ok(ring)
    }

    pub fn insert(&mut self, pair: KeyPair, network: Network) -> Address {
        let address = pair.address(network);
        self.keys.insert(address.clone(), pair);
        address
    }

    pub fn get(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.keys.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ==============================================================================
// Address Book
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Change,
}

impl Chain {
    const fn index(self) -> u32 {
        match self {
            Self::External => 0,
            Self::Change => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddress {
    pub address: Address,
    pub chain: Chain,
    pub index: u32,
    pub path: DerivationPath,
    pub used: bool,
}

/// `m/44'/coin'/0'/chain/index`.
pub fn account_path(network: Network, chain: Chain, index: u32) -> Result<DerivationPath, CoreError> {
    let hardened = |i: u32| {
        ChildNumber::from_hardened_idx(i).map_err(|e| CoreError::InvalidKey(format!("path index {i}: {e}")))
    };
    let normal = |i: u32| {
        ChildNumber::from_normal_idx(i).map_err(|e| CoreError::InvalidKey(format!("path index {i}: {e}")))
    };
    Ok(DerivationPath::from(vec![
        hardened(44)?,
        hardened(network.coin_type())?,
        hardened(0)?,
        normal(chain.index())?,
        normal(index)?,
    ]))
}

/// Render a path the way hardware signers expect it: no `m/` prefix,
/// `'` for hardened steps.
pub fn signer_path(path: &DerivationPath) -> String {
    path.into_iter()
        .map(|child| match child {
            ChildNumber::Normal { index } => index.to_string(),
            ChildNumber::Hardened { index } => format!("{index}'"),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Ordered list of the wallet's addresses.
#[derive(Debug, Clone)]
pub struct AddressBook {
    network: Network,
    entries: Vec<WalletAddress>,
}

impl AddressBook {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            entries: Vec::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn entries(&self) -> &[WalletAddress] {
        &self.entries
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.entries.iter().map(|e| &e.address)
    }

    pub fn get(&self, address: &Address) -> Option<&WalletAddress> {
        self.entries.iter().find(|e| &e.address == address)
    }

    pub fn insert(&mut self, entry: WalletAddress) {
        match self.entries.iter_mut().find(|e| e.address == entry.address) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Derive `count` further addresses on `chain`, continuing after the
    /// highest index already present.
    pub fn derive(&mut self, keys: &dyn KeyDerivation, chain: Chain, count: u32) -> Result<Vec<Address>, CoreError> {
        let start = self
            .entries
            .iter()
            .filter(|e| e.chain == chain)
            .map(|e| e.index + 1)
            .max()
            .unwrap_or(0);

        let mut added = Vec::with_capacity(count as usize);
        for index in start..start.saturating_add(count) {
            let path = account_path(self.network, chain, index)?;
            let address = keys.derive(&path)?.address(self.network);
            self.entries.push(WalletAddress {
                address: address.clone(),
                chain,
                index,
                path,
                used: false,
            });
            added.push(address);
        }
        Ok(added)
    }

    /// First unused change address, falling back to any change address.
    pub fn change_address(&self) -> Option<&WalletAddress> {
        self.entries
            .iter()
            .find(|e| e.chain == Chain::Change && !e.used)
            .or_else(|| self.entries.iter().find(|e| e.chain == Chain::Change))
    }

    /// Hand out the next unused address on `chain` (or its last one) and
    /// mark it used.
    pub fn next_address(&mut self, chain: Chain) -> Option<Address> {
        let position = self
            .entries
            .iter()
            .position(|e| e.chain == chain && !e.used)
            .or_else(|| self.entries.iter().rposition(|e| e.chain == chain))?;
        let entry = &mut self.entries[position];
        entry.used = true;
        Some(entry.address.clone())
    }

    pub fn mark_used(&mut self, address: &Address) -> bool {
        match self.entries.iter_mut().find(|e| &e.address == address) {
            Some(entry) => {
                entry.used = true;
                true
            }
            None => false,
        }
    }
}
