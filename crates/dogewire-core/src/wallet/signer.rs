//! Local P2PKH signing and the external signer boundary.
//!
//! Local signatures are checked against the previous output before the
//! transaction is handed back. Transactions returned by an external signer
//! are trusted; they are only decoded to learn the txid.

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, Verification};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, PublicKey, Script, ScriptBuf, Transaction, TxOut, Txid};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::rawtx::parse_raw_tx;
use crate::types::{TransactionDraft, Utxo};

use super::builder::{input_sequence, unsigned_transaction};
use super::keys::{signer_path, AddressBook, KeyRing};

/// A finished transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedTransaction {
    pub txid: Txid,
    pub hex: String,
}

impl SignedTransaction {
    fn from_tx(tx: &Transaction) -> Self {
        Self {
            txid: tx.compute_txid(),
            hex: serialize_hex(tx),
        }
    }
}

// ==============================================================================
// Previous Outputs
// ==============================================================================

/// Decode the parent attached to `utxo` and check it really carries the
/// claimed output.
fn previous_output(utxo: &Utxo) -> Result<(Transaction, TxOut), CoreError> {
    let raw = utxo
        .raw_tx_hex
        .as_deref()
        .ok_or(CoreError::MissingPrevTx(utxo.txid))?;
    let parent = parse_raw_tx(raw)?;

    let txid = parent.compute_txid();
    if txid != utxo.txid {
        return Err(CoreError::MalformedTransaction(format!(
            "attached parent is {txid}, expected {}",
            utxo.txid
        )));
    }
    let output = parent
        .output
        .get(utxo.vout as usize)
        .cloned()
        .ok_or_else(|| {
            CoreError::MalformedTransaction(format!("{} has no output {}", utxo.txid, utxo.vout))
        })?;
    if output.value.to_sat() != utxo.value {
        return Err(CoreError::MalformedTransaction(format!(
            "{}:{} is worth {} sat, not {}",
            utxo.txid,
            utxo.vout,
            output.value.to_sat(),
            utxo.value
        )));
    }
    if output.script_pubkey != utxo.address.script_pubkey() {
        return Err(CoreError::MalformedTransaction(format!(
            "{}:{} does not pay {}",
            utxo.txid, utxo.vout, utxo.address
        )));
    }
    Ok((parent, output))
}

// ==============================================================================
// Local Signing
// ==============================================================================

/// Sign every input with keys from `keys`.
pub fn sign_local(draft: &TransactionDraft, keys: &KeyRing) -> Result<SignedTransaction, CoreError> {
    let secp = Secp256k1::new();
    let mut tx = unsigned_transaction(draft);

    let mut prev_scripts = Vec::with_capacity(draft.inputs.len());
    for utxo in &draft.inputs {
        let (_, output) = previous_output(utxo)?;
        prev_scripts.push(output.script_pubkey);
    }

    let mut script_sigs = Vec::with_capacity(draft.inputs.len());
    {
        let cache = SighashCache::new(&tx);
        for (index, (utxo, prev_script)) in draft.inputs.iter().zip(&prev_scripts).enumerate() {
            let pair = keys
                .get(&utxo.address)
                .ok_or_else(|| CoreError::MissingKey(utxo.address.to_string()))?;

            let sighash = cache
                .legacy_signature_hash(index, prev_script, EcdsaSighashType::All.to_u32())
                .map_err(|e| CoreError::MalformedTransaction(format!("sighash #{index}: {e}")))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, &pair.secret),
                sighash_type: EcdsaSighashType::All,
            };

            let push = PushBytesBuf::try_from(signature.to_vec())
                .map_err(|_| CoreError::InvalidSignature { input: index })?;
            script_sigs.push(
                ScriptBuf::builder()
                    .push_slice(push)
                    .push_key(&pair.public)
                    .into_script(),
            );
        }
    }

    for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    for (index, prev_script) in prev_scripts.iter().enumerate() {
        if !verify_p2pkh_input(&secp, &tx, index, prev_script) {
            return Err(CoreError::InvalidSignature { input: index });
        }
    }

    let signed = SignedTransaction::from_tx(&tx);
    info!(txid = %signed.txid, inputs = tx.input.len(), "transaction signed locally");
    Ok(signed)
}

/// Check the scriptSig of input `index` against the P2PKH `prev_script`:
/// the pushed key must hash to the script's key hash and the signature must
/// verify over the legacy sighash.
pub fn verify_p2pkh_input<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    prev_script: &Script,
) -> bool {
    let Some(input) = tx.input.get(index) else {
        return false;
    };
    if !prev_script.is_p2pkh() {
        return false;
    }

    let pushes: Vec<&[u8]> = match input
        .script_sig
        .instructions()
        .map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
    {
        Some(pushes) => pushes,
        None => return false,
    };
    let [sig_bytes, key_bytes] = pushes.as_slice() else {
        return false;
    };

    let Ok(signature) = ecdsa::Signature::from_slice(sig_bytes) else {
        return false;
    };
    let Ok(public) = PublicKey::from_slice(key_bytes) else {
        return false;
    };
    if prev_script.as_bytes().get(3..23) != Some(public.pubkey_hash().as_byte_array().as_slice()) {
        return false;
    }

    let Ok(sighash) = SighashCache::new(tx).legacy_signature_hash(
        index,
        prev_script,
        signature.sighash_type.to_u32(),
    ) else {
        return false;
    };
    let message = Message::from_digest(sighash.to_byte_array());
    secp.verify_ecdsa(&message, &signature.signature, &public.inner)
        .is_ok()
}

// ==============================================================================
// External Signing
// ==============================================================================

/// One input as a hardware signer expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalInput {
    /// Full previous transaction.
    pub raw_tx_hex: String,
    pub vout: u32,
    /// Always `None` for P2PKH spends.
    pub redeem_script: Option<String>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalSignRequest {
    pub inputs: Vec<ExternalInput>,
    /// One derivation path per input, e.g. `44'/3'/0'/0/5`.
    pub key_paths: Vec<String>,
    /// Consensus-encoded outputs concatenated, without the count.
    pub output_script_hex: String,
    pub lock_time: u32,
}

/// Signing capability held outside this process, such as a hardware wallet.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Return the signed transaction hex.
    async fn sign(&self, request: &ExternalSignRequest) -> Result<String, CoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPlan {
    Local,
    External(ExternalSignRequest),
}

/// Decide who signs `draft`. Drafts mixing local and external keys are
/// rejected.
pub fn plan_signing(draft: &TransactionDraft, keys: &KeyRing, book: &AddressBook) -> Result<SigningPlan, CoreError> {
    let local = draft
        .inputs
        .iter()
        .filter(|u| keys.contains(&u.address))
        .count();

    if local == draft.inputs.len() {
        return Ok(SigningPlan::Local);
    }
    if local > 0 {
        return Err(CoreError::MixedKeyCustody);
    }
    external_request(draft, book).map(SigningPlan::External)
}

/// Serialize `draft` for an external signer.
pub fn external_request(draft: &TransactionDraft, book: &AddressBook) -> Result<ExternalSignRequest, CoreError> {
    let sequence = input_sequence(draft.lock_time).to_consensus_u32();
    let mut inputs = Vec::with_capacity(draft.inputs.len());
    let mut key_paths = Vec::with_capacity(draft.inputs.len());

    for utxo in &draft.inputs {
        let (parent, _) = previous_output(utxo)?;
        let entry = book
            .get(&utxo.address)
            .ok_or_else(|| CoreError::MissingKey(utxo.address.to_string()))?;
        inputs.push(ExternalInput {
            raw_tx_hex: serialize_hex(&parent),
            vout: utxo.vout,
            redeem_script: None,
            sequence,
        });
        key_paths.push(signer_path(&entry.path));
    }

    let tx = unsigned_transaction(draft);
    let output_script_hex = tx
        .output
        .iter()
        .map(serialize_hex)
        .collect::<String>();

    Ok(ExternalSignRequest {
        inputs,
        key_paths,
        output_script_hex,
        lock_time: draft.lock_time,
    })
}

/// Hand `request` to `signer` and decode its answer.
pub async fn sign_external(
    signer: &dyn ExternalSigner,
    request: &ExternalSignRequest,
) -> Result<SignedTransaction, CoreError> {
    let hex = signer.sign(request).await?;
    let tx = parse_raw_tx(&hex)?;
    let signed = SignedTransaction {
        txid: tx.compute_txid(),
        hex: hex.trim().to_owned(),
    };
    info!(txid = %signed.txid, inputs = request.inputs.len(), "transaction signed externally");
    Ok(signed)
}

/// Sign `draft` locally or through `signer`, whichever holds the keys.
pub async fn sign(
    draft: &TransactionDraft,
    keys: &KeyRing,
    book: &AddressBook,
    signer: Option<&dyn ExternalSigner>,
) -> Result<SignedTransaction, CoreError> {
    match plan_signing(draft, keys, book)? {
        SigningPlan::Local => sign_local(draft, keys),
        SigningPlan::External(request) => {
            debug!(inputs = request.inputs.len(), "delegating to external signer");
            let signer = signer
                .ok_or_else(|| CoreError::Signer("no external signer configured".to_owned()))?;
            sign_external(signer, &request).await
        }
    }
}
