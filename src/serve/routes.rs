use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::script::expand;
use crate::serve::AppState;
use crate::serve::address::decode_address;
use crate::serve::error::ServeError;
use crate::serve::utils::{display_hash, koinu_decimal};
use crate::store::{Balance, Store, StoreError};

/// Confirmation depth used for the available/incoming split.
const BALANCE_CONFIRMATIONS: u64 = 6;

#[derive(Debug, Deserialize)]
pub struct AddressParam {
    #[serde(default)]
    address: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_resume_point() {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "error", "reason": err.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct BalanceResponse {
    incoming: String,
    available: String,
    outgoing: String,
    current: String,
}

pub async fn balance(
    State(state): State<AppState>,
    Query(param): Query<AddressParam>,
) -> Result<impl IntoResponse, ServeError> {
    if param.address.is_empty() {
        return Err(ServeError::bad_request("missing 'address' in the URL"));
    }

    let (kind, hash) = decode_address(&param.address)?;

    let mut balance = match state.store.get_balance(kind, &hash, BALANCE_CONFIRMATIONS) {
        Ok(balance) => balance,
        // an address the index knows nothing about has an empty balance
        Err(StoreError::NotFound) => Balance::default(),
        Err(err) => return Err(err.into()),
    };
    balance.current = balance.available + balance.incoming;

    Ok(Json(BalanceResponse {
        incoming: koinu_decimal(balance.incoming),
        available: koinu_decimal(balance.available),
        outgoing: koinu_decimal(balance.outgoing),
        current: koinu_decimal(balance.current),
    }))
}

#[derive(Serialize)]
struct UtxoResponse {
    utxo: Vec<UtxoItem>,
}

#[derive(Serialize)]
struct UtxoItem {
    /// hex-encoded transaction hash, display (byte-reversed) order
    tx: String,
    vout: u32,
    /// value to 8 decimal places, as a decimal string
    value: String,
    /// script class; tells a wallet what it needs to sign
    #[serde(rename = "type")]
    kind: &'static str,
    /// hex of the full reconstructed locking script
    script: String,
}

pub async fn utxo(
    State(state): State<AppState>,
    Query(param): Query<AddressParam>,
) -> Result<impl IntoResponse, ServeError> {
    if param.address.is_empty() {
        return Err(ServeError::bad_request("missing 'address' in the URL"));
    }

    let (kind, hash) = decode_address(&param.address)?;

    let records = match state.store.find_utxos(kind, &hash) {
        Ok(records) => records,
        Err(StoreError::NotFound) => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    let utxo = records
        .into_iter()
        .map(|record| UtxoItem {
            tx: display_hash(&record.tx_hash),
            vout: record.vout,
            value: koinu_decimal(record.value),
            kind: record.kind.name(),
            script: hex::encode(expand(record.kind, &record.script)),
        })
        .collect();

    Ok(Json(UtxoResponse { utxo }))
}

pub async fn height(State(state): State<AppState>) -> Result<impl IntoResponse, ServeError> {
    let height = state.store.get_current_height()?;

    Ok(Json(json!({ "height": height })))
}

pub async fn blocks(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "blocks": state.history.snapshot() }))
}
