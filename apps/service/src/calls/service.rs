use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::calls::store::{CallStore, CallStoreError};
use crate::calls::types::{
    CallDirection, CallRow, CallStatus, CallerRow, ExtractionRow, NewCallInput, NewExtractionInput,
    NewRecordingInput, NewTranscriptInput, RecordingRow, Sentiment, StatusUpdate, TranscriptRow,
    new_id,
};
use crate::directory::{DirectoryStore, DirectoryStoreError, TenantRow};

#[derive(Debug, thiserror::Error)]
pub enum CallServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<CallStoreError> for CallServiceError {
    fn from(error: CallStoreError) -> Self {
        match error {
            CallStoreError::Conflict(message) => Self::Conflict(message),
            CallStoreError::NotFound(message) => Self::NotFound(message),
            CallStoreError::Db(message) => Self::Store(message),
        }
    }
}

impl From<DirectoryStoreError> for CallServiceError {
    fn from(error: DirectoryStoreError) -> Self {
        match error {
            DirectoryStoreError::NotFound(message) => Self::NotFound(message),
            DirectoryStoreError::Db(message) => Self::Store(message),
        }
    }
}

/// Identity resolution and retention-flag lifecycle for a phone number within
/// a tenant.
pub struct CallerRegistry {
    store: Arc<dyn CallStore>,
}

impl CallerRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self { store }
    }

    /// Returns the caller for (tenant, phone number), creating it on first
    /// contact with `total_calls = 1` and a retention expiry seeded from the
    /// tenant's policy. The bool reports whether this call created the row.
    pub async fn find_or_create(
        &self,
        tenant: &TenantRow,
        phone_number: &str,
    ) -> Result<(CallerRow, bool), CallServiceError> {
        let now = Utc::now();
        let expires_at = now + Duration::days(i64::from(tenant.data_retention_days));
        let (caller, created) = self
            .store
            .find_or_create_caller(&tenant.tenant_id, phone_number, expires_at, now)
            .await?;
        Ok((caller, created))
    }

    /// Bumps `total_calls` and `last_call_at`; retention flags are untouched.
    pub async fn record_call(&self, caller_id: &str) -> Result<CallerRow, CallServiceError> {
        Ok(self.store.record_call(caller_id, Utc::now()).await?)
    }

    /// Opts the caller out of retention deletion entirely.
    pub async fn save(&self, caller_id: &str) -> Result<CallerRow, CallServiceError> {
        Ok(self.store.save_caller(caller_id).await?)
    }

    /// Re-enrols the caller into the purge cycle, counting from now rather
    /// than from the last call.
    pub async fn unsave(
        &self,
        caller_id: &str,
        retention_days: i32,
    ) -> Result<CallerRow, CallServiceError> {
        let expires_at = Utc::now() + Duration::days(i64::from(retention_days));
        Ok(self.store.unsave_caller(caller_id, expires_at).await?)
    }
}

/// The call state machine: creation, status transitions, timestamps, and
/// outbound-call initiation.
///
/// Transitions: `RINGING -> CONNECTING -> IN_PROGRESS` and from any live
/// state into one of the terminal states. Updates against a terminal call
/// are accepted and ignored so duplicate carrier callbacks stay idempotent.
pub struct CallLifecycleManager {
    calls: Arc<dyn CallStore>,
    directory: Arc<dyn DirectoryStore>,
    registry: Arc<CallerRegistry>,
}

impl CallLifecycleManager {
    #[must_use]
    pub fn new(
        calls: Arc<dyn CallStore>,
        directory: Arc<dyn DirectoryStore>,
        registry: Arc<CallerRegistry>,
    ) -> Self {
        Self {
            calls,
            directory,
            registry,
        }
    }

    pub async fn create_call(&self, input: NewCallInput) -> Result<CallRow, CallServiceError> {
        let call = CallRow {
            call_id: new_id("call"),
            external_id: input.external_id,
            tenant_id: input.tenant_id,
            phone_number_id: input.phone_number_id,
            caller_id: input.caller_id,
            direction: input.direction,
            status: input.initial_status,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_secs: None,
            summary: None,
            sentiment: None,
        };
        Ok(self.calls.create_call(call).await?)
    }

    pub async fn get_call(&self, call_id: &str) -> Result<CallRow, CallServiceError> {
        self.calls
            .get_call(call_id)
            .await?
            .ok_or_else(|| CallServiceError::NotFound("call".to_string()))
    }

    pub async fn get_call_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CallRow>, CallServiceError> {
        Ok(self.calls.get_call_by_external_id(external_id).await?)
    }

    /// Applies a status transition and its side effects. A call already in a
    /// terminal state is returned unchanged: carriers redeliver status
    /// callbacks, and rejecting the duplicate would only trigger a retry
    /// storm.
    pub async fn update_status(
        &self,
        call_id: &str,
        update: StatusUpdate,
    ) -> Result<CallRow, CallServiceError> {
        let mut call = self.get_call(call_id).await?;
        if call.status.is_terminal() {
            tracing::debug!(
                call_id,
                status = call.status.as_str(),
                requested = update.status.as_str(),
                "ignoring status update for terminal call"
            );
            return Ok(call);
        }

        let now = Utc::now();
        call.status = update.status;
        match update.status {
            CallStatus::InProgress => {
                if call.answered_at.is_none() {
                    call.answered_at = Some(now);
                }
            }
            CallStatus::Completed | CallStatus::Transferred => {
                if call.ended_at.is_none() {
                    call.ended_at = Some(update.ended_at.unwrap_or(now));
                }
            }
            CallStatus::Ringing
            | CallStatus::Connecting
            | CallStatus::Failed
            | CallStatus::NoAnswer => {}
        }
        if let Some(duration_secs) = update.duration_secs {
            // Supplied by the carrier or the voice-AI service; stored
            // verbatim, never recomputed from timestamps.
            call.duration_secs = Some(duration_secs);
        }

        self.calls.persist_call_update(&call).await?;
        Ok(call)
    }

    pub async fn complete_call(
        &self,
        call_id: &str,
        summary: Option<String>,
        sentiment: Option<Sentiment>,
    ) -> Result<CallRow, CallServiceError> {
        let mut call = self
            .update_status(call_id, StatusUpdate::new(CallStatus::Completed))
            .await?;
        if summary.is_some() || sentiment.is_some() {
            if summary.is_some() {
                call.summary = summary;
            }
            if sentiment.is_some() {
                call.sentiment = sentiment;
            }
            self.calls.persist_call_update(&call).await?;
        }
        Ok(call)
    }

    /// Marks the call transferred. Executing the transfer against the
    /// carrier belongs to the telephony integration; this is its hook point.
    pub async fn transfer_call(
        &self,
        call_id: &str,
        transfer_to: &str,
    ) -> Result<CallRow, CallServiceError> {
        let call = self
            .update_status(call_id, StatusUpdate::new(CallStatus::Transferred))
            .await?;
        tracing::info!(
            call_id,
            transfer_to,
            "transfer recorded; carrier execution delegated to the telephony integration"
        );
        Ok(call)
    }

    pub async fn append_transcript(
        &self,
        input: NewTranscriptInput,
    ) -> Result<TranscriptRow, CallServiceError> {
        Ok(self.calls.append_transcript(input).await?)
    }

    pub async fn append_extraction(
        &self,
        input: NewExtractionInput,
    ) -> Result<ExtractionRow, CallServiceError> {
        Ok(self.calls.append_extraction(input).await?)
    }

    /// Persists a recording reference. Callers gate this on the tenant and
    /// agent-config recording flags; the manager does not re-check them.
    pub async fn attach_recording(
        &self,
        input: NewRecordingInput,
    ) -> Result<RecordingRow, CallServiceError> {
        Ok(self.calls.add_recording(input).await?)
    }

    /// Starts an outbound call: resolves the tenant-owned phone number,
    /// resolves-or-creates the destination caller with a policy-seeded
    /// expiry, and creates the call in `RINGING` under a locally generated
    /// external id.
    pub async fn trigger_outbound_call(
        &self,
        tenant_id: &str,
        phone_number_id: &str,
        to_number: &str,
    ) -> Result<(CallRow, CallerRow), CallServiceError> {
        let tenant = self
            .directory
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CallServiceError::NotFound("tenant".to_string()))?;
        let phone_number = self
            .directory
            .get_phone_number(phone_number_id)
            .await?
            .filter(|row| row.tenant_id == tenant_id)
            .ok_or_else(|| CallServiceError::NotFound("phone number".to_string()))?;

        let (caller, created) = self.registry.find_or_create(&tenant, to_number).await?;
        let caller = if created {
            caller
        } else {
            self.registry.record_call(&caller.caller_id).await?
        };

        let external_id = format!(
            "outbound-{}-{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let call = self
            .create_call(NewCallInput {
                external_id,
                tenant_id: tenant.tenant_id.clone(),
                phone_number_id: phone_number.phone_number_id.clone(),
                caller_id: caller.caller_id.clone(),
                direction: CallDirection::Outbound,
                initial_status: CallStatus::Ringing,
            })
            .await?;
        Ok((call, caller))
    }
}
