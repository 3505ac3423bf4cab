use bitcoin::consensus::encode::serialize_hex;
use futures::future::{join_all, try_join_all};
use tracing::{debug, warn};

use crate::address::Address;
use crate::cache::RawTxCache;
use crate::electrum::types::confirmations;
use crate::electrum::{ElectrumApi, UnspentEntry};
use crate::error::CoreError;
use crate::types::Utxo;

/// Every unspent output of `addresses`, with confirmations from the current
/// tip and the previous transaction attached when it can be fetched.
///
/// A failed `listunspent` fails the whole call. A parent that cannot be
/// fetched or decoded only leaves `raw_tx_hex` empty.
pub async fn collect_utxos(
    api: &dyn ElectrumApi,
    addresses: &[Address],
    cache: &RawTxCache,
) -> Result<Vec<Utxo>, CoreError> {
    let tip = api.get_height().await?;

    let listings = try_join_all(addresses.iter().map(|address| async move {
        let entries = api.get_utxos(address).await?;
        Ok::<_, CoreError>((address, entries))
    }))
    .await?;

    let pending: Vec<(&Address, UnspentEntry)> = listings
        .into_iter()
        .flat_map(|(address, entries)| entries.into_iter().map(move |e| (address, e)))
        .collect();

    let utxos = join_all(pending.into_iter().map(|(address, entry)| async move {
        let raw_tx_hex = match cache.fetch(api, &entry.tx_hash).await {
            Ok(tx) => Some(serialize_hex(tx.as_ref())),
            Err(e) => {
                warn!(txid = %entry.tx_hash, error = %e, "previous transaction unavailable");
                None
            }
        };
        Utxo {
            txid: entry.tx_hash,
            vout: entry.tx_pos,
            value: entry.value,
            address: address.clone(),
            raw_tx_hex,
            confirmations: confirmations(tip, i64::from(entry.height)),
        }
    }))
    .await;

    debug!(addresses = addresses.len(), utxos = utxos.len(), tip, "utxos collected");
    Ok(utxos)
}
