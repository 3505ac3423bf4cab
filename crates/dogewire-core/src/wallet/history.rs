//! Wallet history scan.
//!
//! Turns Electrum history records into per-address net movements. The scan
//! is best-effort: records whose transaction cannot be fetched or decoded
//! are skipped, and so are records that do not move value for the address.

use bitcoin::{Transaction, TxIn};
use futures::future::{join_all, try_join_all};
use tracing::{debug, warn};

use crate::address::Address;
use crate::cache::RawTxCache;
use crate::electrum::types::confirmations;
use crate::electrum::{ElectrumApi, HistoryEntry};
use crate::error::CoreError;
use crate::rawtx::block_time_from_header;
use crate::types::{Direction, WalletTransaction};

/// Scan the history of every address in `addresses`.
///
/// Records keep address order, then server order within an address. Only
/// the tip and the per-address history listings are fatal when they fail.
pub async fn scan_history(
    api: &dyn ElectrumApi,
    addresses: &[Address],
    cache: &RawTxCache,
) -> Result<Vec<WalletTransaction>, CoreError> {
    let tip = api.get_height().await?;

    let listings = try_join_all(addresses.iter().map(|address| async move {
        let entries = api.get_history(address).await?;
        Ok::<_, CoreError>((address, entries))
    }))
    .await?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (address, entries) in listings {
        let scanned = join_all(
            entries
                .iter()
                .map(|entry| scan_record(api, cache, address, entry, tip)),
        )
        .await;
        for record in scanned {
            match record {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
    }

    debug!(addresses = addresses.len(), records = records.len(), skipped, tip, "history scanned");
    Ok(records)
}

async fn scan_record(
    api: &dyn ElectrumApi,
    cache: &RawTxCache,
    address: &Address,
    entry: &HistoryEntry,
    tip: u32,
) -> Option<WalletTransaction> {
    let tx = match cache.fetch(api, &entry.tx_hash).await {
        Ok(tx) => tx,
        Err(e) => {
            warn!(txid = %entry.tx_hash, error = %e, "skipping history record");
            return None;
        }
    };

    let received = received_by(&tx, address);
    let spent = spent_by(api, cache, &tx, address).await;
    let net = i128::from(received) - i128::from(spent);
    if net == 0 {
        return None;
    }

    let direction = if net > 0 {
        Direction::Received
    } else {
        Direction::Sent
    };
    let amount = u64::try_from(net.unsigned_abs()).ok()?;

    Some(WalletTransaction {
        txid: entry.tx_hash,
        address: address.clone(),
        direction,
        amount,
        time: block_time(api, entry.height).await,
        height: entry.height,
        confirmations: confirmations(tip, entry.height),
    })
}

/// Value of the outputs of `tx` paying `address`.
pub fn received_by(tx: &Transaction, address: &Address) -> u64 {
    let script = address.script_pubkey();
    tx.output
        .iter()
        .filter(|o| o.script_pubkey == script)
        .map(|o| o.value.to_sat())
        .fold(0u64, u64::saturating_add)
}

/// Value `address` contributed to the inputs of `tx`. Previous outputs that
/// cannot be resolved count as zero.
async fn spent_by(api: &dyn ElectrumApi, cache: &RawTxCache, tx: &Transaction, address: &Address) -> u64 {
    let script = address.script_pubkey();
    let prevouts = join_all(tx.input.iter().map(|input| previous_value(api, cache, input, &script))).await;
    prevouts.into_iter().flatten().fold(0u64, u64::saturating_add)
}

async fn previous_value(
    api: &dyn ElectrumApi,
    cache: &RawTxCache,
    input: &TxIn,
    script: &bitcoin::Script,
) -> Option<u64> {
    if input.previous_output.is_null() {
        return None;
    }
    let parent = cache.fetch(api, &input.previous_output.txid).await.ok()?;
    let output = parent.output.get(input.previous_output.vout as usize)?;
    (output.script_pubkey.as_script() == script).then(|| output.value.to_sat())
}

/// Block timestamp at `height`, 0 for mempool records or a missing header.
async fn block_time(api: &dyn ElectrumApi, height: i64) -> u32 {
    let Ok(height) = u32::try_from(height) else {
        return 0;
    };
    if height == 0 {
        return 0;
    }
    match api.get_block_header(height).await {
        Ok(header) => block_time_from_header(&header).unwrap_or(0),
        Err(e) => {
            debug!(height, error = %e, "block header unavailable");
            0
        }
    }
}
