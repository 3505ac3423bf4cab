use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use dogewire_core::electrum::{ConnectionTarget, HistoryEntry, Transport};
use dogewire_core::types::{Utxo, WalletTransaction};
use dogewire_core::wallet::{self, AddressBalance};
use dogewire_core::Address;

use super::error::AppError;
use super::SharedState;

/// Fallback confirmation target for `/estimatefee`.
const DEFAULT_FEE_BLOCKS: u16 = 6;

// ==============================================================================
// Query Parameters
// ==============================================================================

/// Optional per-request upstream override. Missing fields fall back to the
/// configured server.
#[derive(Debug, Default, Deserialize)]
pub(super) struct UpstreamQuery {
    host: Option<String>,
    port: Option<u16>,
    transport: Option<String>,
}

impl UpstreamQuery {
    fn target(&self, default: &ConnectionTarget) -> Result<Option<ConnectionTarget>, AppError> {
        if self.host.is_none() && self.port.is_none() && self.transport.is_none() {
            return Ok(None);
        }
        let transport = match &self.transport {
            Some(raw) => raw.parse::<Transport>().map_err(AppError::BadRequest)?,
            None => default.transport,
        };
        Ok(Some(ConnectionTarget::new(
            self.host.clone().unwrap_or_else(|| default.host.clone()),
            self.port.unwrap_or(default.port),
            transport,
        )))
    }
}

/// Point the shared client at the requested server. Requests without an
/// override go back to the configured one.
pub(super) async fn apply_upstream(state: &SharedState, upstream: &UpstreamQuery) -> Result<(), AppError> {
    let target = upstream
        .target(&state.default_target)?
        .unwrap_or_else(|| state.default_target.clone());
    state.electrum.retarget(&target).await?;
    Ok(())
}

#[derive(Deserialize)]
pub(super) struct AddressQuery {
    address: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct AddressListQuery {
    /// Comma-separated.
    addresses: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct FeeQuery {
    blocks: Option<u16>,
}

#[derive(Deserialize)]
pub(super) struct TxidQuery {
    txid: Option<String>,
}

pub(super) fn parse_address(state: &SharedState, raw: &str) -> Result<Address, AppError> {
    Ok(Address::parse(raw.trim(), state.electrum.network())?)
}

fn single_address(state: &SharedState, query: &AddressQuery) -> Result<Address, AppError> {
    match query.address.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_address(state, raw),
        _ => Err(AppError::BadRequest("address is required".to_string())),
    }
}

fn address_list(state: &SharedState, query: &AddressListQuery) -> Result<Vec<Address>, AppError> {
    let raw = query
        .addresses
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("addresses is required".to_string()))?;
    let addresses = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_address(state, s))
        .collect::<Result<Vec<_>, _>>()?;
    if addresses.is_empty() {
        return Err(AppError::BadRequest("no valid addresses".to_string()));
    }
    Ok(addresses)
}

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Serialize)]
pub(super) struct BalancesResponse {
    balances: Vec<AddressBalance>,
}

#[derive(Serialize)]
pub(super) struct TotalResponse {
    addresses: Vec<Address>,
    confirmed: u64,
}

#[derive(Serialize)]
pub(super) struct UtxosResponse {
    utxos: Vec<Utxo>,
}

#[derive(Serialize)]
pub(super) struct HistoryResponse {
    address: Address,
    txs: Vec<HistoryEntry>,
}

#[derive(Serialize)]
pub(super) struct ScanResponse {
    addresses: Vec<Address>,
    txs: Vec<WalletTransaction>,
}

#[derive(Serialize)]
pub(super) struct HeightResponse {
    height: u32,
}

#[derive(Serialize)]
pub(super) struct FeeResponse {
    blocks: u16,
    /// Satoshis per 1000 bytes; `null` when the server has no estimate.
    fee_per_kb: Option<u64>,
}

#[derive(Serialize)]
pub(super) struct RawTxResponse {
    txid: Txid,
    raw_tx: String,
}

#[derive(Deserialize)]
pub(super) struct BroadcastRequest {
    tx_hex: String,
}

#[derive(Serialize)]
pub(super) struct BroadcastResponse {
    txid: Txid,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn get_balance(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<AddressBalance>, AppError> {
    let address = single_address(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let balance = state.electrum.get_balance(&address).await?;
    Ok(Json(AddressBalance { address, balance }))
}

pub(super) async fn get_balances(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressListQuery>,
) -> Result<Json<BalancesResponse>, AppError> {
    let addresses = address_list(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let balances = wallet::address_balances(state.electrum.as_ref(), &addresses).await?;
    Ok(Json(BalancesResponse { balances }))
}

pub(super) async fn get_total_balance(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressListQuery>,
) -> Result<Json<TotalResponse>, AppError> {
    let addresses = address_list(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let confirmed = wallet::total_confirmed(state.electrum.as_ref(), &addresses).await?;
    Ok(Json(TotalResponse { addresses, confirmed }))
}

pub(super) async fn get_utxos(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressListQuery>,
) -> Result<Json<UtxosResponse>, AppError> {
    let addresses = address_list(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let utxos = wallet::collect_utxos(state.electrum.as_ref(), &addresses, &state.cache).await?;
    Ok(Json(UtxosResponse { utxos }))
}

pub(super) async fn get_history(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let address = single_address(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let txs = state.electrum.get_history(&address).await?;
    Ok(Json(HistoryResponse { address, txs }))
}

pub(super) async fn scan_history(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<AddressListQuery>,
) -> Result<Json<ScanResponse>, AppError> {
    let addresses = address_list(&state, &query)?;
    apply_upstream(&state, &upstream).await?;
    let txs = wallet::scan_history(state.electrum.as_ref(), &addresses, &state.cache).await?;
    Ok(Json(ScanResponse { addresses, txs }))
}

pub(super) async fn get_height(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
) -> Result<Json<HeightResponse>, AppError> {
    apply_upstream(&state, &upstream).await?;
    let height = state.electrum.get_height().await?;
    Ok(Json(HeightResponse { height }))
}

pub(super) async fn estimate_fee(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<FeeQuery>,
) -> Result<Json<FeeResponse>, AppError> {
    let blocks = query.blocks.unwrap_or(DEFAULT_FEE_BLOCKS);
    if blocks == 0 {
        return Err(AppError::BadRequest("blocks must be at least 1".to_string()));
    }
    apply_upstream(&state, &upstream).await?;
    let rate = state.electrum.estimate_fee(blocks).await?;
    Ok(Json(FeeResponse {
        blocks,
        fee_per_kb: rate.map(|r| r.sat_per_kb()),
    }))
}

pub(super) async fn get_raw_tx(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    Query(query): Query<TxidQuery>,
) -> Result<Json<RawTxResponse>, AppError> {
    let raw = query
        .txid
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("txid is required".to_string()))?;
    let txid: Txid = raw
        .trim()
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid txid: {e}")))?;
    apply_upstream(&state, &upstream).await?;
    let raw_tx = state.electrum.get_raw_tx(&txid).await?;
    Ok(Json(RawTxResponse { txid, raw_tx }))
}

pub(super) async fn broadcast(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let tx_hex = request.tx_hex.trim();
    if tx_hex.is_empty() {
        return Err(AppError::BadRequest("tx_hex is required".to_string()));
    }
    apply_upstream(&state, &upstream).await?;
    let txid = state.electrum.broadcast(tx_hex).await?;
    tracing::info!(%txid, "transaction broadcast");
    Ok(Json(BroadcastResponse { txid }))
}
