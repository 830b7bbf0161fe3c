//! Carrier webhook gateway: an ordered filter pipeline (deduplicate, then
//! authenticate) in front of the call lifecycle handlers. The gateway itself
//! performs no business logic.

pub mod dedup;
pub mod signature;


use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::calls::service::CallServiceError;
use crate::calls::types::{
    CallDirection, CallStatus, NewCallInput, NewRecordingInput, StatusUpdate, TelephonyProvider,
};
use crate::server::{ApiError, AppState};

pub const WEBHOOK_ID_HEADER: &str = "x-webhook-id";

#[derive(Clone, Copy, Debug)]
enum EventKind {
    Incoming,
    Status,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Status => "status",
        }
    }
}

/// Normalized view of a carrier payload. Field names differ per provider
/// (`CallSid` vs `CallUUID` and so on); everything downstream works on this.
#[derive(Debug, Default)]
struct CarrierEvent {
    external_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    status: Option<String>,
    duration_secs: Option<i32>,
    recording_url: Option<String>,
}

pub async fn incoming(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let payload = parse_payload(&body);
    let event = extract_event(provider, &payload);

    if let Some(ack) = gate(&state, provider, EventKind::Incoming, &headers, &body, &event).await? {
        return Ok(ack);
    }

    let external_id = event
        .external_id
        .ok_or_else(|| ApiError::InvalidRequest("missing carrier call id".to_string()))?;
    let from = event
        .from
        .ok_or_else(|| ApiError::InvalidRequest("missing caller number".to_string()))?;
    let to = event
        .to
        .ok_or_else(|| ApiError::InvalidRequest("missing called number".to_string()))?;

    // Replays that slipped past the dedup cache (restart, eviction) are
    // acknowledged against the already-created call.
    if let Some(existing) = state.lifecycle.get_call_by_external_id(&external_id).await? {
        return Ok(Json(json!({ "status": "ok", "callId": existing.call_id })));
    }

    let phone_number = state
        .directory
        .find_active_phone_number(&to, provider)
        .await?
        .ok_or(ApiError::NotFound)?;
    let tenant = state
        .directory
        .get_tenant(&phone_number.tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let (caller, created) = state.registry.find_or_create(&tenant, &from).await?;
    let caller = if created {
        caller
    } else {
        state.registry.record_call(&caller.caller_id).await?
    };

    let call = match state
        .lifecycle
        .create_call(NewCallInput {
            external_id: external_id.clone(),
            tenant_id: tenant.tenant_id.clone(),
            phone_number_id: phone_number.phone_number_id.clone(),
            caller_id: caller.caller_id.clone(),
            direction: CallDirection::Inbound,
            initial_status: CallStatus::Ringing,
        })
        .await
    {
        Ok(call) => call,
        // A concurrent duplicate delivery won the external-id race; answer
        // for the row it created.
        Err(CallServiceError::Conflict(_)) => state
            .lifecycle
            .get_call_by_external_id(&external_id)
            .await?
            .ok_or(ApiError::NotFound)?,
        Err(error) => return Err(error.into()),
    };

    tracing::info!(
        provider = provider.as_str(),
        external_id,
        call_id = call.call_id,
        tenant_id = tenant.tenant_id,
        "inbound call created from carrier webhook"
    );
    Ok(Json(json!({ "status": "ok", "callId": call.call_id })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let payload = parse_payload(&body);
    let event = extract_event(provider, &payload);

    if let Some(ack) = gate(&state, provider, EventKind::Status, &headers, &body, &event).await? {
        return Ok(ack);
    }

    let external_id = event
        .external_id
        .ok_or_else(|| ApiError::InvalidRequest("missing carrier call id".to_string()))?;
    let Some(raw_status) = event.status else {
        return Ok(Json(json!({ "status": "ignored", "reason": "missing_status" })));
    };
    let Some(new_status) = map_carrier_status(&raw_status) else {
        tracing::debug!(
            provider = provider.as_str(),
            external_id,
            raw_status,
            "ignoring unmapped carrier status"
        );
        return Ok(Json(json!({ "status": "ignored", "reason": "unmapped_status" })));
    };

    let call = state
        .lifecycle
        .get_call_by_external_id(&external_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let was_terminal = call.status.is_terminal();
    let updated = state
        .lifecycle
        .update_status(
            &call.call_id,
            StatusUpdate {
                status: new_status,
                duration_secs: event.duration_secs,
                ended_at: None,
            },
        )
        .await?;

    // A redelivery that slips past the dedup cache (restart, eviction) must
    // not grow a terminal call's subtree.
    let recording_url = event.recording_url.filter(|_| !was_terminal);
    if let Some(url) = recording_url {
        maybe_attach_recording(&state, &updated.tenant_id, &updated.call_id, url, event.duration_secs)
            .await?;
    }

    Ok(Json(json!({ "status": "ok", "callId": updated.call_id, "callStatus": updated.status })))
}

/// Runs the gateway filters in order. Returns the acknowledgment to send
/// when the delivery is a duplicate; `None` means the request may proceed.
async fn gate(
    state: &AppState,
    provider: TelephonyProvider,
    kind: EventKind,
    headers: &HeaderMap,
    body: &[u8],
    event: &CarrierEvent,
) -> Result<Option<Json<Value>>, ApiError> {
    let key = derive_dedup_key(provider, kind, headers, body, event);
    if state.dedup.check_and_insert(&key).await {
        tracing::info!(
            provider = provider.as_str(),
            kind = kind.as_str(),
            dedup_key = key,
            "duplicate webhook delivery ignored"
        );
        return Ok(Some(Json(
            json!({ "status": "ignored", "reason": "duplicate_delivery" }),
        )));
    }

    authenticate(state, provider, headers, body)?;
    Ok(None)
}

fn authenticate(
    state: &AppState,
    provider: TelephonyProvider,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let secret = match provider {
        TelephonyProvider::Exotel => state.config.exotel_webhook_secret.as_deref(),
        TelephonyProvider::Plivo => state.config.plivo_webhook_secret.as_deref(),
        TelephonyProvider::Twilio | TelephonyProvider::Vonage => None,
    };

    match secret {
        Some(secret) => {
            let result = match provider {
                TelephonyProvider::Exotel => signature::verify_exotel(secret, headers, body),
                TelephonyProvider::Plivo => signature::verify_plivo(secret, headers, body),
                TelephonyProvider::Twilio | TelephonyProvider::Vonage => Ok(()),
            };
            result.map_err(|error| {
                ApiError::Unauthorized(format!(
                    "{} webhook rejected: {error}",
                    provider.as_str()
                ))
            })
        }
        None if state.config.environment.is_permissive() => {
            tracing::warn!(
                provider = provider.as_str(),
                "webhook signature verification SKIPPED: no secret configured in permissive mode"
            );
            Ok(())
        }
        None => Err(ApiError::Configuration(format!(
            "{} webhook secret is required outside development",
            provider.as_str()
        ))),
    }
}

/// Dedup key derivation, in priority order: explicit delivery id header,
/// carrier call-session id scoped by event kind and the status the
/// extractor normalized (so a progressing call is not mistaken for a
/// retry), then a hash of the raw body. A session id without any status
/// field also falls through to the body hash: byte-identical redeliveries
/// still collide there, distinct events for the same session never do. A
/// randomly salted fallback would never collide with a genuine retry, so
/// the stable payload hash is used instead. Derivation cannot fail; dedup
/// is fail-open by construction.
fn derive_dedup_key(
    provider: TelephonyProvider,
    kind: EventKind,
    headers: &HeaderMap,
    body: &[u8],
    event: &CarrierEvent,
) -> String {
    if let Some(id) = headers
        .get(WEBHOOK_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        return format!("hdr:{id}");
    }

    if let (Some(session_id), Some(status)) = (&event.external_id, &event.status) {
        return format!(
            "{}:{}:{session_id}:{status}",
            provider.as_str(),
            kind.as_str()
        );
    }

    format!("body:{}", STANDARD.encode(Sha256::digest(body)))
}

fn parse_provider(value: &str) -> Result<TelephonyProvider, ApiError> {
    match value.to_lowercase().as_str() {
        "exotel" => Ok(TelephonyProvider::Exotel),
        "plivo" => Ok(TelephonyProvider::Plivo),
        _ => Err(ApiError::NotFound),
    }
}

fn parse_payload(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn extract_event(provider: TelephonyProvider, payload: &Value) -> CarrierEvent {
    let text = |field: &str| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|value| !value.is_empty())
    };
    // Carriers are inconsistent about numeric fields; accept both forms.
    let number = |field: &str| {
        payload.get(field).and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
                .map(|n| n as i32)
        })
    };

    match provider {
        TelephonyProvider::Exotel => CarrierEvent {
            external_id: text("CallSid"),
            from: text("From"),
            to: text("To"),
            status: text("CallStatus").or_else(|| text("Status")),
            duration_secs: number("Duration"),
            recording_url: text("RecordingUrl"),
        },
        TelephonyProvider::Plivo => CarrierEvent {
            external_id: text("CallUUID"),
            from: text("From"),
            to: text("To"),
            status: text("CallStatus").or_else(|| text("Event")),
            duration_secs: number("Duration"),
            recording_url: text("RecordingUrl").or_else(|| text("RecordUrl")),
        },
        TelephonyProvider::Twilio | TelephonyProvider::Vonage => CarrierEvent::default(),
    }
}

fn map_carrier_status(raw: &str) -> Option<CallStatus> {
    match raw.to_lowercase().replace('_', "-").as_str() {
        "ringing" => Some(CallStatus::Ringing),
        "connecting" | "initiated" => Some(CallStatus::Connecting),
        "in-progress" | "answered" => Some(CallStatus::InProgress),
        "completed" | "hangup" => Some(CallStatus::Completed),
        "failed" | "busy" => Some(CallStatus::Failed),
        "no-answer" | "noanswer" => Some(CallStatus::NoAnswer),
        _ => None,
    }
}

/// Recordings are persisted only when both the tenant-level
/// `save_call_recordings` flag and the agent config's `enable_recording`
/// allow it.
async fn maybe_attach_recording(
    state: &AppState,
    tenant_id: &str,
    call_id: &str,
    url: String,
    duration_secs: Option<i32>,
) -> Result<(), ApiError> {
    let tenant = state.directory.get_tenant(tenant_id).await?;
    if !tenant.is_some_and(|t| t.save_call_recordings) {
        return Ok(());
    }
    let enabled = state
        .directory
        .get_agent_config(tenant_id)
        .await?
        .is_some_and(|config| config.enable_recording);
    if !enabled {
        return Ok(());
    }
    state
        .lifecycle
        .attach_recording(NewRecordingInput {
            call_id: call_id.to_string(),
            url,
            duration_secs,
        })
        .await?;
    Ok(())
}
