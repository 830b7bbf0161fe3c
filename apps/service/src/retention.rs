//! Data-retention reaper: finds unsaved callers whose retention window has
//! lapsed and removes each one's entire subtree (transcripts, extractions,
//! recordings, calls, then the caller row). Saved callers are never touched.
//!
//! Each caller purges atomically on its own; a failure mid-sweep leaves that
//! caller intact for the next run and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::calls::store::{CallStore, CallStoreError};

/// Callers shown in a preview. The count is always exact; the sample is
/// capped so an operator peeking at a huge backlog doesn't pull every row.
const PREVIEW_SAMPLE_LIMIT: i64 = 100;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPreview {
    pub expired_count: i64,
    pub sample: Vec<RetentionPreviewEntry>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPreviewEntry {
    pub caller_id: String,
    pub tenant_id: String,
    pub phone_number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub call_count: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRunReport {
    pub success: bool,
    pub skipped: bool,
    pub deleted_callers: u64,
    pub deleted_calls: u64,
    pub deleted_transcripts: u64,
    pub deleted_extractions: u64,
    pub deleted_recordings: u64,
    pub errors: Vec<String>,
}

pub struct RetentionReaper {
    store: Arc<dyn CallStore>,
    run_guard: Mutex<()>,
    timeout: Duration,
}

impl RetentionReaper {
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>, timeout: Duration) -> Self {
        Self {
            store,
            run_guard: Mutex::new(()),
            timeout,
        }
    }

    /// Read-only dry run: how many callers the next sweep would purge, plus
    /// a capped sample with per-caller call counts. Mutates nothing.
    pub async fn preview(&self) -> Result<RetentionPreview, CallStoreError> {
        let now = Utc::now();
        let expired_count = self.store.count_expired_callers(now).await?;
        let rows = self
            .store
            .list_expired_callers(now, Some(PREVIEW_SAMPLE_LIMIT))
            .await?;

        let mut sample = Vec::with_capacity(rows.len());
        for row in rows {
            let call_count = self.store.count_calls_for_caller(&row.caller_id).await?;
            sample.push(RetentionPreviewEntry {
                caller_id: row.caller_id,
                tenant_id: row.tenant_id,
                phone_number: row.phone_number,
                expires_at: row.expires_at,
                call_count,
            });
        }
        Ok(RetentionPreview {
            expired_count,
            sample,
        })
    }

    /// Executes one sweep. Overlapping invocations (manual trigger racing
    /// the scheduled worker) are skipped rather than queued, and the whole
    /// sweep runs under a deadline so a stuck sweep cannot pin the store
    /// forever.
    pub async fn run(&self) -> RetentionRunReport {
        let Ok(_guard) = self.run_guard.try_lock() else {
            tracing::info!("retention sweep already running, skipping this trigger");
            return RetentionRunReport {
                success: true,
                skipped: true,
                ..RetentionRunReport::default()
            };
        };

        match tokio::time::timeout(self.timeout, self.sweep()).await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "retention sweep exceeded its deadline"
                );
                RetentionRunReport {
                    success: false,
                    errors: vec!["sweep exceeded deadline".to_string()],
                    ..RetentionRunReport::default()
                }
            }
        }
    }

    async fn sweep(&self) -> RetentionRunReport {
        let mut report = RetentionRunReport {
            success: true,
            ..RetentionRunReport::default()
        };

        let expired = match self.store.list_expired_callers(Utc::now(), None).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::error!(reason = %error, "retention sweep failed to list expired callers");
                report.success = false;
                report.errors.push(error.to_string());
                return report;
            }
        };

        for caller in expired {
            match self.store.purge_caller(&caller.caller_id).await {
                Ok(counts) => {
                    report.deleted_callers += 1;
                    report.deleted_calls += counts.calls;
                    report.deleted_transcripts += counts.transcripts;
                    report.deleted_extractions += counts.extractions;
                    report.deleted_recordings += counts.recordings;
                    tracing::info!(
                        caller_id = caller.caller_id,
                        tenant_id = caller.tenant_id,
                        calls = counts.calls,
                        "purged expired caller"
                    );
                }
                Err(error) => {
                    // Leave this caller for the next sweep; keep going.
                    tracing::error!(
                        caller_id = caller.caller_id,
                        reason = %error,
                        "failed to purge expired caller"
                    );
                    report
                        .errors
                        .push(format!("{}: {error}", caller.caller_id));
                }
            }
        }

        tracing::info!(
            deleted_callers = report.deleted_callers,
            deleted_calls = report.deleted_calls,
            errors = report.errors.len(),
            "retention sweep finished"
        );
        report
    }
}

/// Spawns the scheduled sweep loop. An interval of zero disables it; the
/// manual trigger endpoint stays available either way.
pub fn spawn_retention_worker(reaper: Arc<RetentionReaper>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::info!("retention worker disabled, manual triggers only");
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup isn't a sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = reaper.run().await;
            if !report.success {
                tracing::warn!(errors = report.errors.len(), "scheduled retention sweep failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::calls::store;
    use crate::calls::types::{
        CallDirection, CallRow, CallStatus, CallerRow, ExtractionRow, NewExtractionInput,
        NewRecordingInput, NewTranscriptInput, PurgeCounts, RecordingRow, TranscriptRow,
        TranscriptRole, new_id,
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    async fn seed_caller_with_history(
        calls: &Arc<dyn CallStore>,
        phone: &str,
        expired: bool,
    ) -> String {
        let now = Utc::now();
        let expires_at = if expired {
            now - ChronoDuration::days(1)
        } else {
            now + ChronoDuration::days(15)
        };
        let (caller, _) = calls
            .find_or_create_caller("tnt_acme", phone, expires_at, now)
            .await
            .unwrap();

        for n in 0..2 {
            let call = CallRow {
                call_id: new_id("call"),
                external_id: format!("ext-{phone}-{n}"),
                tenant_id: "tnt_acme".to_string(),
                phone_number_id: "pn_1".to_string(),
                caller_id: caller.caller_id.clone(),
                direction: CallDirection::Inbound,
                status: CallStatus::Completed,
                started_at: now,
                answered_at: Some(now),
                ended_at: Some(now),
                duration_secs: Some(60),
                summary: None,
                sentiment: None,
            };
            let call = calls.create_call(call).await.unwrap();
            calls
                .append_transcript(NewTranscriptInput {
                    call_id: call.call_id.clone(),
                    role: TranscriptRole::Caller,
                    content: "hello".to_string(),
                    confidence: None,
                })
                .await
                .unwrap();
            calls
                .append_extraction(NewExtractionInput {
                    call_id: call.call_id.clone(),
                    kind: "appointment".to_string(),
                    data: json!({"date": "2026-09-01"}),
                    confidence: Some(0.8),
                })
                .await
                .unwrap();
        }

        // One recording on the first call only.
        let first = calls
            .get_call_by_external_id(&format!("ext-{phone}-0"))
            .await
            .unwrap()
            .unwrap();
        calls
            .add_recording(NewRecordingInput {
                call_id: first.call_id,
                url: "https://recordings.example/a.mp3".to_string(),
                duration_secs: Some(60),
            })
            .await
            .unwrap();

        caller.caller_id
    }

    #[tokio::test]
    async fn sweep_purges_expired_caller_and_everything_it_owns() {
        let calls = store::memory();
        let caller_id = seed_caller_with_history(&calls, "+911111111111", true).await;
        let reaper = RetentionReaper::new(calls.clone(), Duration::from_secs(30));

        let report = reaper.run().await;
        assert!(report.success);
        assert!(!report.skipped);
        assert_eq!(report.deleted_callers, 1);
        assert_eq!(report.deleted_calls, 2);
        assert_eq!(report.deleted_transcripts, 2);
        assert_eq!(report.deleted_extractions, 2);
        assert_eq!(report.deleted_recordings, 1);
        assert!(report.errors.is_empty());

        assert!(calls.get_caller(&caller_id).await.unwrap().is_none());
        assert!(
            calls
                .get_call_by_external_id("ext-+911111111111-0")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sweep_leaves_saved_and_unexpired_callers_alone() {
        let calls = store::memory();
        let expired_saved = seed_caller_with_history(&calls, "+911111111111", true).await;
        let unexpired = seed_caller_with_history(&calls, "+912222222222", false).await;
        calls.save_caller(&expired_saved).await.unwrap();

        let reaper = RetentionReaper::new(calls.clone(), Duration::from_secs(30));
        let report = reaper.run().await;

        assert!(report.success);
        assert_eq!(report.deleted_callers, 0);
        assert!(calls.get_caller(&expired_saved).await.unwrap().is_some());
        assert!(calls.get_caller(&unexpired).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn preview_reports_without_mutating() {
        let calls = store::memory();
        let caller_id = seed_caller_with_history(&calls, "+911111111111", true).await;
        seed_caller_with_history(&calls, "+912222222222", false).await;

        let reaper = RetentionReaper::new(calls.clone(), Duration::from_secs(30));
        let preview = reaper.preview().await.unwrap();

        assert_eq!(preview.expired_count, 1);
        assert_eq!(preview.sample.len(), 1);
        assert_eq!(preview.sample[0].caller_id, caller_id);
        assert_eq!(preview.sample[0].call_count, 2);

        assert!(calls.get_caller(&caller_id).await.unwrap().is_some());
    }

    /// Delegating store whose expiry listing stalls, to exercise the sweep
    /// deadline.
    struct SlowListStore {
        inner: Arc<dyn CallStore>,
        delay: Duration,
    }

    #[async_trait]
    impl CallStore for SlowListStore {
        async fn find_or_create_caller(
            &self,
            tenant_id: &str,
            phone_number: &str,
            expires_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<(CallerRow, bool), CallStoreError> {
            self.inner
                .find_or_create_caller(tenant_id, phone_number, expires_at, now)
                .await
        }

        async fn get_caller(&self, caller_id: &str) -> Result<Option<CallerRow>, CallStoreError> {
            self.inner.get_caller(caller_id).await
        }

        async fn record_call(
            &self,
            caller_id: &str,
            now: DateTime<Utc>,
        ) -> Result<CallerRow, CallStoreError> {
            self.inner.record_call(caller_id, now).await
        }

        async fn save_caller(&self, caller_id: &str) -> Result<CallerRow, CallStoreError> {
            self.inner.save_caller(caller_id).await
        }

        async fn unsave_caller(
            &self,
            caller_id: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<CallerRow, CallStoreError> {
            self.inner.unsave_caller(caller_id, expires_at).await
        }

        async fn count_expired_callers(&self, now: DateTime<Utc>) -> Result<i64, CallStoreError> {
            self.inner.count_expired_callers(now).await
        }

        async fn list_expired_callers(
            &self,
            now: DateTime<Utc>,
            limit: Option<i64>,
        ) -> Result<Vec<CallerRow>, CallStoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_expired_callers(now, limit).await
        }

        async fn count_calls_for_caller(&self, caller_id: &str) -> Result<i64, CallStoreError> {
            self.inner.count_calls_for_caller(caller_id).await
        }

        async fn create_call(&self, call: CallRow) -> Result<CallRow, CallStoreError> {
            self.inner.create_call(call).await
        }

        async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>, CallStoreError> {
            self.inner.get_call(call_id).await
        }

        async fn get_call_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<CallRow>, CallStoreError> {
            self.inner.get_call_by_external_id(external_id).await
        }

        async fn persist_call_update(&self, call: &CallRow) -> Result<(), CallStoreError> {
            self.inner.persist_call_update(call).await
        }

        async fn append_transcript(
            &self,
            input: NewTranscriptInput,
        ) -> Result<TranscriptRow, CallStoreError> {
            self.inner.append_transcript(input).await
        }

        async fn append_extraction(
            &self,
            input: NewExtractionInput,
        ) -> Result<ExtractionRow, CallStoreError> {
            self.inner.append_extraction(input).await
        }

        async fn add_recording(
            &self,
            input: NewRecordingInput,
        ) -> Result<RecordingRow, CallStoreError> {
            self.inner.add_recording(input).await
        }

        async fn purge_caller(&self, caller_id: &str) -> Result<PurgeCounts, CallStoreError> {
            self.inner.purge_caller(caller_id).await
        }
    }

    #[tokio::test]
    async fn run_fails_when_the_sweep_exceeds_its_deadline() {
        let slow: Arc<dyn CallStore> = Arc::new(SlowListStore {
            inner: store::memory(),
            delay: Duration::from_millis(200),
        });
        let reaper = RetentionReaper::new(slow, Duration::from_millis(10));

        let report = reaper.run().await;
        assert!(!report.success);
        assert!(!report.skipped);
        assert_eq!(report.deleted_callers, 0);
        assert_eq!(report.errors, vec!["sweep exceeded deadline".to_string()]);
    }

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let calls = store::memory();
        let reaper = Arc::new(RetentionReaper::new(calls, Duration::from_secs(30)));

        let guard = reaper.run_guard.lock().await;
        let report = reaper.run().await;
        drop(guard);

        assert!(report.skipped);
        assert!(report.success);
        assert_eq!(report.deleted_callers, 0);
    }
}
