//! Largest-first coin selection over a linear size model.

use tracing::debug;

use crate::error::CoreError;
use crate::types::{FeeRate, Recipient, Utxo};

/// Estimated serialized size of a P2PKH transaction.
///
/// 180 bytes per input, 34 per output, 10 bytes of envelope and one more
/// byte per input.
pub fn estimate_size(inputs: usize, outputs: usize) -> u64 {
    let inputs = inputs as u64;
    let outputs = outputs as u64;
    inputs
        .saturating_mul(180)
        .saturating_add(outputs.saturating_mul(34))
        .saturating_add(10)
        .saturating_add(inputs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub total_in: u64,
    pub fee_sat: u64,
    pub estimated_size: u64,
}

/// Sum of recipient values, rejecting empty or zero-value payments.
pub(crate) fn payment_total(recipients: &[Recipient]) -> Result<u64, CoreError> {
    if recipients.is_empty() {
        return Err(CoreError::InvalidRecipient("no recipients".to_owned()));
    }
    recipients.iter().try_fold(0u64, |acc, r| {
        if r.value_sat == 0 {
            return Err(CoreError::InvalidRecipient(format!(
                "zero amount for {}",
                r.address
            )));
        }
        acc.checked_add(r.value_sat)
            .ok_or_else(|| CoreError::FeeCalculation("recipient total overflows".to_owned()))
    })
}

/// Pick inputs, largest first, until they cover the payment plus the fee of
/// a transaction with one output per recipient and one change output.
///
/// `utxos` is never modified; ties keep their input order.
pub fn select(utxos: &[Utxo], recipients: &[Recipient], fee_rate: FeeRate) -> Result<Selection, CoreError> {
    let payment = payment_total(recipients)?;
    let outputs = recipients.len() + 1;

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let fee_for = |inputs: usize| -> Result<(u64, u64), CoreError> {
        let size = estimate_size(inputs, outputs);
        let fee = fee_rate
            .fee_for_size(size)
            .ok_or_else(|| CoreError::FeeCalculation(format!("fee for {size} bytes overflows")))?;
        Ok((size, fee))
    };

    let mut total_in = 0u64;
    let mut needed = None;
    for (count, utxo) in sorted.iter().enumerate() {
        total_in = total_in
            .checked_add(utxo.value)
            .ok_or_else(|| CoreError::FeeCalculation("input total overflows".to_owned()))?;

        let (estimated_size, fee_sat) = fee_for(count + 1)?;
        let target = payment
            .checked_add(fee_sat)
            .ok_or_else(|| CoreError::FeeCalculation("payment plus fee overflows".to_owned()))?;
        needed = Some(target);

        if total_in >= target {
            debug!(
                inputs = count + 1,
                total_in,
                fee_sat,
                estimated_size,
                %fee_rate,
                "coins selected"
            );
            return Ok(Selection {
                inputs: sorted[..=count].iter().map(|u| (*u).clone()).collect(),
                total_in,
                fee_sat,
                estimated_size,
            });
        }
    }

    let needed = match needed {
        Some(needed) => needed,
        None => payment.saturating_add(fee_for(1)?.1),
    };
    Err(CoreError::InsufficientFunds {
        needed,
        available: total_in,
    })
}
