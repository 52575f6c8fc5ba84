//! Lava payment webhooks
//!
//! - `POST /payment`: first payment; carries `clientUtm` attribution which is
//!   remembered under `contractId` and forwarded to SaleBot.
//! - `POST /regular_pay`: recurring payment; carries only `parentContractId`,
//!   so attribution is looked up from the first payment.

use axum::{body::Bytes, extract::State, Json};
use lavarelay_shared::TouchOutcome;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{ApiError, ApiResult},
    extractor::{build_outbound_params, subscription_days, OutboundParams},
    state::AppState,
};

/// Successful relay response
#[derive(Debug, Serialize)]
pub struct ForwardedResponse {
    pub status: &'static str,
    pub chatter_status: u16,
}

/// Handle a first (non-recurring) payment
pub async fn new_payment(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ForwardedResponse>> {
    tracing::info!("New payment received");
    let payload = parse_payload(&body)?;

    let client_utm = payload
        .get("clientUtm")
        .and_then(Value::as_object)
        .filter(|utm| !utm.is_empty())
        .ok_or_else(|| ApiError::Validation("clientUtm is required".to_string()))?;

    let source = text_field(client_utm, "utm_source").ok_or_else(|| {
        ApiError::Validation("clientUtm.utm_source is required".to_string())
    })?;
    let content = text_field(client_utm, "utm_content").unwrap_or_default();
    let contract_id = text_field(&payload, "contractId");

    if let Some(contract_id) = contract_id.as_deref() {
        // A failed write is logged and the payment is still forwarded; the
        // matching recurring payment will then fail its attribution lookup.
        match state.store.put(contract_id, &source, &content).await {
            Ok(()) => {
                tracing::info!(contract_id = %contract_id, "Stored UTM attribution");
            }
            Err(e) => {
                tracing::error!(
                    contract_id = %contract_id,
                    error = %e,
                    "Failed to store UTM attribution, continuing"
                );
            }
        }
    }

    let params = build_outbound_params(
        &state.config.message_tokens,
        &content,
        &source,
        contract_id.as_deref().unwrap_or(""),
        false,
        None,
    )?;

    forward(&state, &params).await
}

/// Handle a recurring payment referencing an earlier contract
pub async fn regular_pay(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ForwardedResponse>> {
    tracing::info!("New recurring payment received");
    let payload = parse_payload(&body)?;

    let parent_contract_id = text_field(&payload, "parentContractId")
        .ok_or_else(|| ApiError::Validation("parentContractId is required".to_string()))?;

    let not_found = || {
        ApiError::Validation(format!(
            "No UTM metrics found for parent contract {}",
            parent_contract_id
        ))
    };

    let record = match state.store.get(&parent_contract_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(not_found()),
        Err(e) => {
            tracing::warn!(
                parent_contract_id = %parent_contract_id,
                error = %e,
                "Failed to read UTM attribution, treating as absent"
            );
            return Err(not_found());
        }
    };

    match state.store.touch(&parent_contract_id).await {
        Ok(TouchOutcome::Updated) => {
            tracing::debug!(parent_contract_id = %parent_contract_id, "Touched attribution");
        }
        Ok(TouchOutcome::NotFound) => {
            tracing::warn!(
                parent_contract_id = %parent_contract_id,
                "Attribution disappeared before it could be touched"
            );
        }
        Err(e) => {
            tracing::warn!(
                parent_contract_id = %parent_contract_id,
                error = %e,
                "Failed to update timestamp for parent contract"
            );
        }
    }

    if record.source.is_empty() {
        return Err(ApiError::Validation(
            "No utm_source found in stored UTM metrics".to_string(),
        ));
    }

    let contract_id = text_field(&payload, "contractId").unwrap_or_default();
    let days_add = subscription_days(&record.content);

    let params = build_outbound_params(
        &state.config.message_tokens,
        &record.content,
        &record.source,
        &contract_id,
        true,
        Some(days_add),
    )?;

    forward(&state, &params).await
}

async fn forward(state: &AppState, params: &OutboundParams) -> ApiResult<Json<ForwardedResponse>> {
    let response = state
        .forwarder
        .forward(params)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    if response.is_error() {
        return Err(ApiError::BadGateway(format!(
            "Chatter API returned {}: {}",
            response.status, response.body
        )));
    }

    Ok(Json(ForwardedResponse {
        status: "forwarded",
        chatter_status: response.status,
    }))
}

/// Decode a webhook body. An empty body reads as an empty object.
fn parse_payload(body: &[u8]) -> ApiResult<Map<String, Value>> {
    if body.is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("Cannot decode JSON: {}", e)))?;
    tracing::debug!(payload = %value, "Webhook body");

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::Validation(
            "Webhook body must be a JSON object".to_string(),
        )),
    }
}

/// Non-empty text value of `key`; numeric ids are rendered as decimal text
fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
