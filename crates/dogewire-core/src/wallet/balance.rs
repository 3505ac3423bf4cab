use futures::future::try_join_all;
use serde::Serialize;

use crate::address::Address;
use crate::electrum::{Balance, ElectrumApi};
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBalance {
    pub address: Address,
    #[serde(flatten)]
    pub balance: Balance,
}

/// Balance of each address, in input order.
pub async fn address_balances(api: &dyn ElectrumApi, addresses: &[Address]) -> Result<Vec<AddressBalance>, CoreError> {
    try_join_all(addresses.iter().map(|address| async move {
        let balance = api.get_balance(address).await?;
        Ok(AddressBalance {
            address: address.clone(),
            balance,
        })
    }))
    .await
}

/// Sum of the confirmed balances of `addresses`.
pub async fn total_confirmed(api: &dyn ElectrumApi, addresses: &[Address]) -> Result<u64, CoreError> {
    let balances = address_balances(api, addresses).await?;
    balances
        .iter()
        .try_fold(0u64, |acc, b| acc.checked_add(b.balance.confirmed))
        .ok_or_else(|| CoreError::FeeCalculation("confirmed balance overflows".to_owned()))
}
