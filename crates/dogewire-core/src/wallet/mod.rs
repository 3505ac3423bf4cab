//! Wallet-side services built on top of an [`ElectrumApi`](crate::electrum::ElectrumApi):
//! coin gathering, coin selection, transaction building and signing, and the
//! history scan.

pub mod balance;
pub mod builder;
pub mod coin_select;
pub mod history;
pub mod keys;
pub mod signer;
pub mod utxo;

pub use balance::{address_balances, total_confirmed, AddressBalance};
pub use builder::{build, draft_payment, ChangePolicy};
pub use coin_select::{estimate_size, select, Selection};
pub use history::scan_history;
pub use keys::{AddressBook, Chain, KeyDerivation, KeyPair, KeyRing, SeedKeys, WalletAddress};
pub use signer::{
    plan_signing, sign, sign_external, sign_local, ExternalInput, ExternalSignRequest, ExternalSigner, SignedTransaction,
    SigningPlan,
};
pub use utxo::collect_utxos;
