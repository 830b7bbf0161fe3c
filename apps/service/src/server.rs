//! HTTP surface: carrier webhooks, internal call-data endpoints, tenant
//! administration, and retention operations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::calls::service::{CallLifecycleManager, CallServiceError, CallerRegistry};
use crate::calls::store::{CallStore, CallStoreError};
use crate::calls::types::{
    CallerRow, NewExtractionInput, NewTranscriptInput, Sentiment, TelephonyProvider,
    TranscriptRole,
};
use crate::config::Config;
use crate::directory::{
    AgentConfigRow, DirectoryStore, DirectoryStoreError, PhoneNumberRow, TenantRow,
};
use crate::retention::RetentionReaper;
use crate::vault::{CredentialVault, VaultError};
use crate::webhooks::{self, dedup::DedupCache};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<dyn DirectoryStore>,
    pub calls: Arc<dyn CallStore>,
    pub registry: Arc<CallerRegistry>,
    pub lifecycle: Arc<CallLifecycleManager>,
    pub vault: Arc<CredentialVault>,
    pub dedup: Arc<DedupCache>,
    pub reaper: Arc<RetentionReaper>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Configuration(String),
    NotFound,
    Conflict(String),
    InvalidRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "unauthorized", message),
            Self::Configuration(message) => {
                tracing::error!(reason = message, "request failed on server configuration");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration",
                    "server configuration error".to_string(),
                )
            }
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "resource not found".to_string(),
            ),
            Self::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            Self::InvalidRequest(message) => (StatusCode::BAD_REQUEST, "invalid_request", message),
            Self::Internal(message) => {
                tracing::error!(reason = message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<CallServiceError> for ApiError {
    fn from(error: CallServiceError) -> Self {
        match error {
            CallServiceError::NotFound(_) => Self::NotFound,
            CallServiceError::Conflict(message) => Self::Conflict(message),
            CallServiceError::Store(message) => Self::Internal(message),
        }
    }
}

impl From<CallStoreError> for ApiError {
    fn from(error: CallStoreError) -> Self {
        match error {
            CallStoreError::NotFound(_) => Self::NotFound,
            CallStoreError::Conflict(message) => Self::Conflict(message),
            CallStoreError::Db(message) => Self::Internal(message),
        }
    }
}

impl From<DirectoryStoreError> for ApiError {
    fn from(error: DirectoryStoreError) -> Self {
        match error {
            DirectoryStoreError::NotFound(_) => Self::NotFound,
            DirectoryStoreError::Db(message) => Self::Internal(message),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        Self::Internal(error.to_string())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/webhooks/:provider/incoming", post(webhooks::incoming))
        .route("/webhooks/:provider/status", post(webhooks::status))
        .route("/api/internal/tenants/:tenant_id", put(upsert_tenant))
        .route(
            "/api/internal/tenants/:tenant_id/agent-config",
            put(put_agent_config).get(get_agent_config),
        )
        .route(
            "/api/internal/phone-numbers/:phone_number_id",
            put(upsert_phone_number),
        )
        .route("/api/internal/callers/:caller_id", get(get_caller))
        .route("/api/internal/callers/:caller_id/save", post(save_caller))
        .route(
            "/api/internal/callers/:caller_id/unsave",
            post(unsave_caller),
        )
        .route(
            "/api/internal/calls/:call_id/transcript",
            post(append_transcript),
        )
        .route(
            "/api/internal/calls/:call_id/extraction",
            post(append_extraction),
        )
        .route("/api/internal/calls/:call_id/complete", post(complete_call))
        .route("/api/internal/calls/:call_id/transfer", post(transfer_call))
        .route("/api/internal/calls/:call_id", get(get_call))
        .route("/api/internal/outbound-calls", post(trigger_outbound_call))
        .route("/internal/v1/retention/preview", get(retention_preview))
        .route("/internal/v1/retention/run", post(retention_run))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "build": state.config.build_sha,
    }))
}

async fn readyz(State(state): State<AppState>) -> Json<Value> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();
    Json(json!({ "status": "ok", "uptimeSecs": uptime_secs }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertTenantRequest {
    name: String,
    data_retention_days: Option<i32>,
    save_call_recordings: Option<bool>,
}

async fn upsert_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<UpsertTenantRequest>,
) -> Result<Json<TenantRow>, ApiError> {
    let data_retention_days = request
        .data_retention_days
        .unwrap_or(state.config.default_retention_days);
    if !(1..=365).contains(&data_retention_days) {
        return Err(ApiError::InvalidRequest(format!(
            "dataRetentionDays must be between 1 and 365, got {data_retention_days}"
        )));
    }
    let row = TenantRow {
        tenant_id,
        name: request.name,
        data_retention_days,
        save_call_recordings: request.save_call_recordings.unwrap_or(false),
    };
    state.directory.put_tenant(row.clone()).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertPhoneNumberRequest {
    tenant_id: String,
    number: String,
    provider: String,
    active: Option<bool>,
}

async fn upsert_phone_number(
    State(state): State<AppState>,
    Path(phone_number_id): Path<String>,
    Json(request): Json<UpsertPhoneNumberRequest>,
) -> Result<Json<PhoneNumberRow>, ApiError> {
    let provider = parse_provider_field(&request.provider)?;
    state
        .directory
        .get_tenant(&request.tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let row = PhoneNumberRow {
        phone_number_id,
        tenant_id: request.tenant_id,
        number: request.number,
        provider,
        active: request.active.unwrap_or(true),
    };
    state.directory.put_phone_number(row.clone()).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutAgentConfigRequest {
    stt_provider: Option<String>,
    tts_provider: Option<String>,
    llm_provider: Option<String>,
    telephony_provider: String,
    enable_recording: Option<bool>,
    /// Plaintext provider credentials; sealed by the vault before they
    /// touch the store.
    provider_keys: Option<Value>,
}

async fn put_agent_config(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<PutAgentConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .directory
        .get_tenant(&tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let telephony_provider = parse_provider_field(&request.telephony_provider)?;

    let encrypted_provider_keys = request
        .provider_keys
        .as_ref()
        .map(|keys| state.vault.encrypt_object(keys))
        .transpose()?;

    let row = AgentConfigRow {
        tenant_id: tenant_id.clone(),
        stt_provider: request.stt_provider,
        tts_provider: request.tts_provider,
        llm_provider: request.llm_provider,
        telephony_provider,
        enable_recording: request.enable_recording.unwrap_or(false),
        encrypted_provider_keys,
        updated_at: Utc::now(),
    };
    state.directory.upsert_agent_config(row.clone()).await?;
    Ok(Json(json!({
        "tenantId": tenant_id,
        "telephonyProvider": row.telephony_provider,
        "enableRecording": row.enable_recording,
        "hasProviderKeys": row.encrypted_provider_keys.is_some(),
        "updatedAt": row.updated_at,
    })))
}

/// Internal consumers (the voice-AI runtime) need usable credentials, so
/// this returns the decrypted key object. The stored token never leaves the
/// service.
async fn get_agent_config(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state
        .directory
        .get_agent_config(&tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let provider_keys = row
        .encrypted_provider_keys
        .as_deref()
        .map(|token| state.vault.decrypt_object(token))
        .transpose()?;
    Ok(Json(json!({
        "tenantId": row.tenant_id,
        "sttProvider": row.stt_provider,
        "ttsProvider": row.tts_provider,
        "llmProvider": row.llm_provider,
        "telephonyProvider": row.telephony_provider,
        "enableRecording": row.enable_recording,
        "providerKeys": provider_keys,
        "updatedAt": row.updated_at,
    })))
}

async fn get_caller(
    State(state): State<AppState>,
    Path(caller_id): Path<String>,
) -> Result<Json<CallerRow>, ApiError> {
    let row = state
        .calls
        .get_caller(&caller_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(row))
}

async fn save_caller(
    State(state): State<AppState>,
    Path(caller_id): Path<String>,
) -> Result<Json<CallerRow>, ApiError> {
    Ok(Json(state.registry.save(&caller_id).await?))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UnsaveCallerRequest {
    retention_days: Option<i32>,
}

async fn unsave_caller(
    State(state): State<AppState>,
    Path(caller_id): Path<String>,
    request: Option<Json<UnsaveCallerRequest>>,
) -> Result<Json<CallerRow>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let retention_days = match request.retention_days {
        Some(days) => days,
        None => {
            // Default to the owning tenant's policy.
            let caller = state
                .calls
                .get_caller(&caller_id)
                .await?
                .ok_or(ApiError::NotFound)?;
            state
                .directory
                .get_tenant(&caller.tenant_id)
                .await?
                .map_or(state.config.default_retention_days, |t| {
                    t.data_retention_days
                })
        }
    };
    if !(1..=365).contains(&retention_days) {
        return Err(ApiError::InvalidRequest(format!(
            "retentionDays must be between 1 and 365, got {retention_days}"
        )));
    }
    Ok(Json(state.registry.unsave(&caller_id, retention_days).await?))
}

async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let call = state.lifecycle.get_call(&call_id).await?;
    Ok(Json(serde_json::to_value(call).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendTranscriptRequest {
    role: String,
    content: String,
    confidence: Option<f64>,
}

async fn append_transcript(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<AppendTranscriptRequest>,
) -> Result<Json<Value>, ApiError> {
    let role = TranscriptRole::parse(&request.role.to_uppercase()).ok_or_else(|| {
        ApiError::InvalidRequest(format!("unknown transcript role {}", request.role))
    })?;
    let row = state
        .lifecycle
        .append_transcript(NewTranscriptInput {
            call_id,
            role,
            content: request.content,
            confidence: request.confidence,
        })
        .await?;
    Ok(Json(json!({
        "transcriptId": row.transcript_id,
        "callId": row.call_id,
        "seq": row.seq,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendExtractionRequest {
    /// Wire name is `type`; `kind` internally to keep the keyword out of
    /// the row types.
    #[serde(rename = "type")]
    kind: String,
    data: Value,
    confidence: Option<f64>,
}

async fn append_extraction(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<AppendExtractionRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.kind.trim().is_empty() {
        return Err(ApiError::InvalidRequest("kind must not be empty".to_string()));
    }
    let row = state
        .lifecycle
        .append_extraction(NewExtractionInput {
            call_id,
            kind: request.kind,
            data: request.data,
            confidence: request.confidence,
        })
        .await?;
    Ok(Json(json!({
        "extractionId": row.extraction_id,
        "callId": row.call_id,
        "type": row.kind,
    })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CompleteCallRequest {
    summary: Option<String>,
    sentiment: Option<String>,
}

async fn complete_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    request: Option<Json<CompleteCallRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let sentiment = request
        .sentiment
        .as_deref()
        .map(|value| {
            Sentiment::parse(&value.to_uppercase())
                .ok_or_else(|| ApiError::InvalidRequest(format!("unknown sentiment {value}")))
        })
        .transpose()?;
    let call = state
        .lifecycle
        .complete_call(&call_id, request.summary, sentiment)
        .await?;
    Ok(Json(json!({
        "callId": call.call_id,
        "status": call.status,
        "endedAt": call.ended_at,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferCallRequest {
    transfer_to: String,
}

async fn transfer_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<TransferCallRequest>,
) -> Result<Json<Value>, ApiError> {
    let call = state
        .lifecycle
        .transfer_call(&call_id, &request.transfer_to)
        .await?;
    Ok(Json(json!({
        "callId": call.call_id,
        "status": call.status,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerOutboundRequest {
    tenant_id: String,
    phone_number_id: String,
    to_number: String,
}

async fn trigger_outbound_call(
    State(state): State<AppState>,
    Json(request): Json<TriggerOutboundRequest>,
) -> Result<Json<Value>, ApiError> {
    let (call, caller) = state
        .lifecycle
        .trigger_outbound_call(
            &request.tenant_id,
            &request.phone_number_id,
            &request.to_number,
        )
        .await?;
    Ok(Json(json!({
        "callId": call.call_id,
        "externalId": call.external_id,
        "status": call.status,
        "callerId": caller.caller_id,
    })))
}

async fn retention_preview(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let preview = state.reaper.preview().await?;
    Ok(Json(serde_json::to_value(preview).map_err(|e| ApiError::Internal(e.to_string()))?))
}

async fn retention_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.reaper.run().await;
    Ok(Json(serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))?))
}

fn parse_provider_field(value: &str) -> Result<TelephonyProvider, ApiError> {
    TelephonyProvider::parse(&value.to_uppercase())
        .ok_or_else(|| ApiError::InvalidRequest(format!("unknown telephony provider {value}")))
}
