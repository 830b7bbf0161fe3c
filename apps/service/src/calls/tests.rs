#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::calls::service::{CallLifecycleManager, CallServiceError, CallerRegistry};
use crate::calls::store::{self, CallStore};
use crate::calls::types::{
    CallDirection, CallStatus, NewCallInput, NewTranscriptInput, Sentiment, StatusUpdate,
    TelephonyProvider, TranscriptRole,
};
use crate::directory::{self, DirectoryStore, PhoneNumberRow, TenantRow};

struct Fixture {
    calls: Arc<dyn CallStore>,
    registry: Arc<CallerRegistry>,
    lifecycle: CallLifecycleManager,
    tenant: TenantRow,
}

async fn fixture() -> Fixture {
    let calls = store::memory();
    let dir: Arc<dyn DirectoryStore> = directory::memory();
    let tenant = TenantRow {
        tenant_id: "tnt_acme".to_string(),
        name: "Acme Clinics".to_string(),
        data_retention_days: 15,
        save_call_recordings: true,
    };
    dir.put_tenant(tenant.clone()).await.unwrap();
    dir.put_phone_number(PhoneNumberRow {
        phone_number_id: "pn_1".to_string(),
        tenant_id: tenant.tenant_id.clone(),
        number: "+914012345678".to_string(),
        provider: TelephonyProvider::Exotel,
        active: true,
    })
    .await
    .unwrap();

    let registry = Arc::new(CallerRegistry::new(calls.clone()));
    let lifecycle = CallLifecycleManager::new(calls.clone(), dir, registry.clone());
    Fixture {
        calls,
        registry,
        lifecycle,
        tenant,
    }
}

async fn make_call(fx: &Fixture, external_id: &str) -> (String, String) {
    let (caller, created) = fx
        .registry
        .find_or_create(&fx.tenant, "+919876543210")
        .await
        .unwrap();
    let caller = if created {
        caller
    } else {
        fx.registry.record_call(&caller.caller_id).await.unwrap()
    };
    let call = fx
        .lifecycle
        .create_call(NewCallInput {
            external_id: external_id.to_string(),
            tenant_id: fx.tenant.tenant_id.clone(),
            phone_number_id: "pn_1".to_string(),
            caller_id: caller.caller_id.clone(),
            direction: CallDirection::Inbound,
            initial_status: CallStatus::Ringing,
        })
        .await
        .unwrap();
    (call.call_id, caller.caller_id)
}

#[tokio::test]
async fn new_caller_starts_unsaved_with_tenant_policy_expiry() {
    let fx = fixture().await;
    let (caller, created) = fx
        .registry
        .find_or_create(&fx.tenant, "+919876543210")
        .await
        .unwrap();

    assert!(created);
    assert!(!caller.is_saved);
    assert_eq!(caller.total_calls, 1);
    let expires_at = caller.expires_at.unwrap();
    let expected = Utc::now() + Duration::days(15);
    assert!((expires_at - expected).num_seconds().abs() < 5);
}

#[tokio::test]
async fn repeat_caller_is_resolved_not_duplicated() {
    let fx = fixture().await;
    let (first, created) = fx
        .registry
        .find_or_create(&fx.tenant, "+919876543210")
        .await
        .unwrap();
    assert!(created);

    let (second, created) = fx
        .registry
        .find_or_create(&fx.tenant, "+919876543210")
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.caller_id, first.caller_id);

    let bumped = fx.registry.record_call(&second.caller_id).await.unwrap();
    assert_eq!(bumped.total_calls, 2);
    assert!(bumped.last_call_at.is_some());
}

#[tokio::test]
async fn save_clears_expiry_and_unsave_restarts_the_clock() {
    let fx = fixture().await;
    let (caller, _) = fx
        .registry
        .find_or_create(&fx.tenant, "+919876543210")
        .await
        .unwrap();

    let saved = fx.registry.save(&caller.caller_id).await.unwrap();
    assert!(saved.is_saved);
    assert!(saved.expires_at.is_none());

    let unsaved = fx.registry.unsave(&caller.caller_id, 15).await.unwrap();
    assert!(!unsaved.is_saved);
    let expires_at = unsaved.expires_at.unwrap();
    let expected = Utc::now() + Duration::days(15);
    assert!((expires_at - expected).num_seconds().abs() < 5);
}

#[tokio::test]
async fn duplicate_external_id_is_a_conflict() {
    let fx = fixture().await;
    let (_, caller_id) = make_call(&fx, "exo-call-1").await;

    let result = fx
        .lifecycle
        .create_call(NewCallInput {
            external_id: "exo-call-1".to_string(),
            tenant_id: fx.tenant.tenant_id.clone(),
            phone_number_id: "pn_1".to_string(),
            caller_id,
            direction: CallDirection::Inbound,
            initial_status: CallStatus::Ringing,
        })
        .await;
    assert!(matches!(result, Err(CallServiceError::Conflict(_))));
}

#[tokio::test]
async fn in_progress_sets_answered_at_once() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    let call = fx
        .lifecycle
        .update_status(&call_id, StatusUpdate::new(CallStatus::InProgress))
        .await
        .unwrap();
    let answered_at = call.answered_at.unwrap();

    // A second IN_PROGRESS update keeps the original answer timestamp.
    let call = fx
        .lifecycle
        .update_status(&call_id, StatusUpdate::new(CallStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(call.answered_at.unwrap(), answered_at);
}

#[tokio::test]
async fn completed_sets_ended_at_and_stores_duration_verbatim() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    fx.lifecycle
        .update_status(&call_id, StatusUpdate::new(CallStatus::InProgress))
        .await
        .unwrap();
    let call = fx
        .lifecycle
        .update_status(
            &call_id,
            StatusUpdate {
                status: CallStatus::Completed,
                duration_secs: Some(125),
                ended_at: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(call.status, CallStatus::Completed);
    assert!(call.ended_at.is_some());
    assert_eq!(call.duration_secs, Some(125));
}

#[tokio::test]
async fn terminal_calls_ignore_further_updates() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    let completed = fx
        .lifecycle
        .update_status(
            &call_id,
            StatusUpdate {
                status: CallStatus::Completed,
                duration_secs: Some(60),
                ended_at: None,
            },
        )
        .await
        .unwrap();

    let after = fx
        .lifecycle
        .update_status(
            &call_id,
            StatusUpdate {
                status: CallStatus::Failed,
                duration_secs: Some(999),
                ended_at: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(after.status, CallStatus::Completed);
    assert_eq!(after.ended_at, completed.ended_at);
    assert_eq!(after.duration_secs, Some(60));
}

#[tokio::test]
async fn complete_call_attaches_summary_and_sentiment() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    let call = fx
        .lifecycle
        .complete_call(
            &call_id,
            Some("caller asked to reschedule".to_string()),
            Some(Sentiment::Positive),
        )
        .await
        .unwrap();

    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.summary.as_deref(), Some("caller asked to reschedule"));
    assert_eq!(call.sentiment, Some(Sentiment::Positive));

    let stored = fx.lifecycle.get_call(&call_id).await.unwrap();
    assert_eq!(stored.summary, call.summary);
}

#[tokio::test]
async fn transfer_marks_the_call_terminal() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    let call = fx
        .lifecycle
        .transfer_call(&call_id, "+911140001234")
        .await
        .unwrap();
    assert_eq!(call.status, CallStatus::Transferred);
    assert!(call.ended_at.is_some());
}

#[tokio::test]
async fn transcripts_are_sequenced_per_call() {
    let fx = fixture().await;
    let (call_id, _) = make_call(&fx, "exo-call-1").await;

    for (role, content) in [
        (TranscriptRole::Agent, "hello, how can I help"),
        (TranscriptRole::Caller, "I want to book an appointment"),
    ] {
        fx.lifecycle
            .append_transcript(NewTranscriptInput {
                call_id: call_id.clone(),
                role,
                content: content.to_string(),
                confidence: Some(0.9),
            })
            .await
            .unwrap();
    }

    let third = fx
        .lifecycle
        .append_transcript(NewTranscriptInput {
            call_id: call_id.clone(),
            role: TranscriptRole::Agent,
            content: "which day works for you".to_string(),
            confidence: None,
        })
        .await
        .unwrap();
    assert_eq!(third.seq, 3);
}

#[tokio::test]
async fn outbound_trigger_creates_ringing_call_with_local_external_id() {
    let fx = fixture().await;
    let (call, caller) = fx
        .lifecycle
        .trigger_outbound_call("tnt_acme", "pn_1", "+919811112222")
        .await
        .unwrap();

    assert!(call.external_id.starts_with("outbound-"));
    assert_eq!(call.status, CallStatus::Ringing);
    assert_eq!(call.direction, CallDirection::Outbound);
    assert_eq!(call.caller_id, caller.caller_id);
    assert!(!caller.is_saved);
    assert!(caller.expires_at.is_some());

    // The destination is tracked like any other caller.
    let (_, second_caller) = fx
        .lifecycle
        .trigger_outbound_call("tnt_acme", "pn_1", "+919811112222")
        .await
        .unwrap();
    assert_eq!(second_caller.caller_id, caller.caller_id);
    assert_eq!(second_caller.total_calls, 2);
}

#[tokio::test]
async fn outbound_trigger_rejects_foreign_phone_number() {
    let fx = fixture().await;
    let result = fx
        .lifecycle
        .trigger_outbound_call("tnt_acme", "pn_missing", "+919811112222")
        .await;
    assert!(matches!(result, Err(CallServiceError::NotFound(_))));
}

#[tokio::test]
async fn expired_caller_listing_skips_saved_callers() {
    let fx = fixture().await;
    let (expired, _) = fx
        .registry
        .find_or_create(&fx.tenant, "+911111111111")
        .await
        .unwrap();
    let (kept, _) = fx
        .registry
        .find_or_create(&fx.tenant, "+912222222222")
        .await
        .unwrap();

    // Force both past their expiry, then save one.
    let past = Utc::now() - Duration::days(1);
    fx.calls.unsave_caller(&expired.caller_id, past).await.unwrap();
    fx.calls.unsave_caller(&kept.caller_id, past).await.unwrap();
    fx.registry.save(&kept.caller_id).await.unwrap();

    let listed = fx
        .calls
        .list_expired_callers(Utc::now(), None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].caller_id, expired.caller_id);
    assert_eq!(
        fx.calls.count_expired_callers(Utc::now()).await.unwrap(),
        1
    );
}
