//! Turns a coin selection into a transaction draft.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::types::{DraftOutput, FeeRate, Recipient, TransactionDraft, Utxo};

use super::coin_select::{estimate_size, payment_total, select, Selection};
use super::keys::AddressBook;

/// Where the remainder of a selection goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    /// To the wallet's designated change address.
    #[default]
    UseChange,
    /// Back to the address of the largest input.
    NoChange,
}

/// Assemble a draft from `selection`.
///
/// Every recipient gets one output. A positive remainder becomes one extra
/// output chosen by `policy`; a zero remainder adds nothing. A change address
/// that receives the remainder is marked used in `book`.
pub fn build(
    selection: Selection,
    recipients: &[Recipient],
    policy: ChangePolicy,
    book: &mut AddressBook,
    lock_time: u32,
) -> Result<TransactionDraft, CoreError> {
    let payment = payment_total(recipients)?;
    let spent = payment
        .checked_add(selection.fee_sat)
        .ok_or_else(|| CoreError::FeeCalculation("payment plus fee overflows".to_owned()))?;
    let remainder = selection.total_in.checked_sub(spent).ok_or_else(|| {
        CoreError::FeeCalculation(format!(
            "negative change: inputs {} < payment {payment} + fee {}",
            selection.total_in, selection.fee_sat
        ))
    })?;

    let mut outputs: Vec<DraftOutput> = recipients
        .iter()
        .map(|r| DraftOutput {
            address: r.address.clone(),
            value: r.value_sat,
            is_change: false,
        })
        .collect();

    if remainder > 0 {
        let output = match policy {
            ChangePolicy::UseChange => {
                let change = book
                    .change_address()
                    .ok_or(CoreError::NoChangeAddress)?
                    .address
                    .clone();
                book.mark_used(&change);
                DraftOutput {
                    address: change,
                    value: remainder,
                    is_change: true,
                }
            }
            ChangePolicy::NoChange => {
                let largest = largest_input(&selection.inputs).ok_or_else(|| {
                    CoreError::FeeCalculation("remainder without inputs".to_owned())
                })?;
                DraftOutput {
                    address: largest.address.clone(),
                    value: remainder,
                    is_change: false,
                }
            }
        };
        outputs.push(output);
    }

    let estimated_size = estimate_size(selection.inputs.len(), outputs.len().max(1));
    debug!(
        inputs = selection.inputs.len(),
        outputs = outputs.len(),
        fee_sat = selection.fee_sat,
        remainder,
        estimated_size,
        "transaction draft built"
    );

    Ok(TransactionDraft {
        inputs: selection.inputs,
        outputs,
        fee_sat: selection.fee_sat,
        estimated_size,
        lock_time,
    })
}

/// Select coins and build a draft in one step.
pub fn draft_payment(
    utxos: &[Utxo],
    recipients: &[Recipient],
    fee_rate: FeeRate,
    policy: ChangePolicy,
    book: &mut AddressBook,
    lock_time: u32,
) -> Result<TransactionDraft, CoreError> {
    let selection = select(utxos, recipients, fee_rate)?;
    build(selection, recipients, policy, book, lock_time)
}

/// First input with the highest value.
fn largest_input(inputs: &[Utxo]) -> Option<&Utxo> {
    inputs
        .iter()
        .fold(None, |best: Option<&Utxo>, u| match best {
            Some(b) if b.value >= u.value => Some(b),
            _ => Some(u),
        })
}

/// Input sequence: final, unless a lock time must be enforced.
pub fn input_sequence(lock_time: u32) -> Sequence {
    if lock_time > 0 {
        Sequence::ENABLE_LOCKTIME_NO_RBF
    } else {
        Sequence::MAX
    }
}

/// The draft as an unsigned legacy transaction.
pub fn unsigned_transaction(draft: &TransactionDraft) -> Transaction {
    let sequence = input_sequence(draft.lock_time);
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::from_consensus(draft.lock_time),
        input: draft
            .inputs
            .iter()
            .map(|u| TxIn {
                previous_output: OutPoint::new(u.txid, u.vout),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            })
            .collect(),
        output: draft
            .outputs
            .iter()
            .map(|o| TxOut {
                value: Amount::from_sat(o.value),
                script_pubkey: o.address.script_pubkey(),
            })
            .collect(),
    }
}
