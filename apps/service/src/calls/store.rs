use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::calls::types::{
    CallDirection, CallRow, CallStatus, CallerRow, ExtractionRow, NewExtractionInput,
    NewRecordingInput, NewTranscriptInput, PurgeCounts, RecordingRow, Sentiment, TranscriptRow,
    new_id,
};
use crate::db::CallkeeperDb;

#[derive(Debug, thiserror::Error)]
pub enum CallStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Persistence seam for callers, calls, and everything a call owns.
///
/// Caller uniqueness on (tenant_id, phone_number) is enforced here, not in
/// the services: the postgres backend leans on a unique index and re-fetches
/// when a concurrent insert wins, so `find_or_create_caller` never produces
/// duplicate callers under concurrent outbound triggers.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Returns the caller and whether this invocation created it. A freshly
    /// created caller starts unsaved with `total_calls = 1`.
    async fn find_or_create_caller(
        &self,
        tenant_id: &str,
        phone_number: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(CallerRow, bool), CallStoreError>;

    async fn get_caller(&self, caller_id: &str) -> Result<Option<CallerRow>, CallStoreError>;

    async fn record_call(
        &self,
        caller_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError>;

    async fn save_caller(&self, caller_id: &str) -> Result<CallerRow, CallStoreError>;

    async fn unsave_caller(
        &self,
        caller_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError>;

    async fn count_expired_callers(&self, now: DateTime<Utc>) -> Result<i64, CallStoreError>;

    async fn list_expired_callers(
        &self,
        now: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<CallerRow>, CallStoreError>;

    async fn count_calls_for_caller(&self, caller_id: &str) -> Result<i64, CallStoreError>;

    /// Fails with `Conflict` when the external id is already taken; never
    /// creates a second row for the same carrier call.
    async fn create_call(&self, call: CallRow) -> Result<CallRow, CallStoreError>;

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>, CallStoreError>;

    async fn get_call_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CallRow>, CallStoreError>;

    /// Persists the mutable lifecycle fields of an existing call row.
    async fn persist_call_update(&self, call: &CallRow) -> Result<(), CallStoreError>;

    async fn append_transcript(
        &self,
        input: NewTranscriptInput,
    ) -> Result<TranscriptRow, CallStoreError>;

    async fn append_extraction(
        &self,
        input: NewExtractionInput,
    ) -> Result<ExtractionRow, CallStoreError>;

    async fn add_recording(
        &self,
        input: NewRecordingInput,
    ) -> Result<RecordingRow, CallStoreError>;

    /// Deletes one caller's whole subtree (transcripts, extractions,
    /// recordings, calls, then the caller) inside a single atomic scope. A
    /// failure leaves the caller untouched for the next sweep.
    async fn purge_caller(&self, caller_id: &str) -> Result<PurgeCounts, CallStoreError>;
}

#[must_use]
pub fn memory() -> Arc<dyn CallStore> {
    Arc::new(MemoryCallStore::default())
}

#[must_use]
pub fn postgres(db: Arc<CallkeeperDb>) -> Arc<dyn CallStore> {
    Arc::new(PostgresCallStore { db })
}

#[derive(Default)]
struct MemoryCallStore {
    inner: Mutex<MemoryCallStoreInner>,
}

#[derive(Default)]
struct MemoryCallStoreInner {
    callers: HashMap<String, CallerRow>,
    caller_ids_by_key: HashMap<(String, String), String>,
    calls: HashMap<String, CallRow>,
    call_ids_by_external: HashMap<String, String>,
    transcripts: HashMap<String, Vec<TranscriptRow>>,
    extractions: HashMap<String, Vec<ExtractionRow>>,
    recordings: HashMap<String, Vec<RecordingRow>>,
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn find_or_create_caller(
        &self,
        tenant_id: &str,
        phone_number: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(CallerRow, bool), CallStoreError> {
        let mut inner = self.inner.lock().await;
        let key = (tenant_id.to_string(), phone_number.to_string());
        if let Some(caller_id) = inner.caller_ids_by_key.get(&key) {
            let row = inner
                .callers
                .get(caller_id)
                .cloned()
                .ok_or_else(|| CallStoreError::Db("caller index out of sync".to_string()))?;
            return Ok((row, false));
        }
        let row = CallerRow {
            caller_id: new_id("clr"),
            tenant_id: tenant_id.to_string(),
            phone_number: phone_number.to_string(),
            is_saved: false,
            expires_at: Some(expires_at),
            total_calls: 1,
            last_call_at: Some(now),
            created_at: now,
        };
        inner.caller_ids_by_key.insert(key, row.caller_id.clone());
        inner.callers.insert(row.caller_id.clone(), row.clone());
        Ok((row, true))
    }

    async fn get_caller(&self, caller_id: &str) -> Result<Option<CallerRow>, CallStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.callers.get(caller_id).cloned())
    }

    async fn record_call(
        &self,
        caller_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.callers.get_mut(caller_id) else {
            return Err(CallStoreError::NotFound("caller".to_string()));
        };
        row.total_calls += 1;
        row.last_call_at = Some(now);
        Ok(row.clone())
    }

    async fn save_caller(&self, caller_id: &str) -> Result<CallerRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.callers.get_mut(caller_id) else {
            return Err(CallStoreError::NotFound("caller".to_string()));
        };
        row.is_saved = true;
        row.expires_at = None;
        Ok(row.clone())
    }

    async fn unsave_caller(
        &self,
        caller_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.callers.get_mut(caller_id) else {
            return Err(CallStoreError::NotFound("caller".to_string()));
        };
        row.is_saved = false;
        row.expires_at = Some(expires_at);
        Ok(row.clone())
    }

    async fn count_expired_callers(&self, now: DateTime<Utc>) -> Result<i64, CallStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .callers
            .values()
            .filter(|row| is_expired(row, now))
            .count() as i64)
    }

    async fn list_expired_callers(
        &self,
        now: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<CallerRow>, CallStoreError> {
        let inner = self.inner.lock().await;
        let mut rows = inner
            .callers
            .values()
            .filter(|row| is_expired(row, now))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by_key(|row| row.expires_at);
        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn count_calls_for_caller(&self, caller_id: &str) -> Result<i64, CallStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .calls
            .values()
            .filter(|call| call.caller_id == caller_id)
            .count() as i64)
    }

    async fn create_call(&self, call: CallRow) -> Result<CallRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.call_ids_by_external.contains_key(&call.external_id) {
            return Err(CallStoreError::Conflict(format!(
                "call with external id {} already exists",
                call.external_id
            )));
        }
        inner
            .call_ids_by_external
            .insert(call.external_id.clone(), call.call_id.clone());
        inner.calls.insert(call.call_id.clone(), call.clone());
        Ok(call)
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>, CallStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.calls.get(call_id).cloned())
    }

    async fn get_call_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CallRow>, CallStoreError> {
        let inner = self.inner.lock().await;
        let Some(call_id) = inner.call_ids_by_external.get(external_id) else {
            return Ok(None);
        };
        Ok(inner.calls.get(call_id).cloned())
    }

    async fn persist_call_update(&self, call: &CallRow) -> Result<(), CallStoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.calls.contains_key(&call.call_id) {
            return Err(CallStoreError::NotFound("call".to_string()));
        }
        inner.calls.insert(call.call_id.clone(), call.clone());
        Ok(())
    }

    async fn append_transcript(
        &self,
        input: NewTranscriptInput,
    ) -> Result<TranscriptRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.calls.contains_key(&input.call_id) {
            return Err(CallStoreError::NotFound("call".to_string()));
        }
        let entries = inner.transcripts.entry(input.call_id.clone()).or_default();
        let row = TranscriptRow {
            transcript_id: new_id("trn"),
            call_id: input.call_id,
            seq: entries.len() as i32 + 1,
            role: input.role,
            content: input.content,
            confidence: input.confidence,
            created_at: Utc::now(),
        };
        entries.push(row.clone());
        Ok(row)
    }

    async fn append_extraction(
        &self,
        input: NewExtractionInput,
    ) -> Result<ExtractionRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.calls.contains_key(&input.call_id) {
            return Err(CallStoreError::NotFound("call".to_string()));
        }
        let row = ExtractionRow {
            extraction_id: new_id("ext"),
            call_id: input.call_id.clone(),
            kind: input.kind,
            data: input.data,
            confidence: input.confidence,
            created_at: Utc::now(),
        };
        inner
            .extractions
            .entry(input.call_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn add_recording(
        &self,
        input: NewRecordingInput,
    ) -> Result<RecordingRow, CallStoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.calls.contains_key(&input.call_id) {
            return Err(CallStoreError::NotFound("call".to_string()));
        }
        let row = RecordingRow {
            recording_id: new_id("rec"),
            call_id: input.call_id.clone(),
            url: input.url,
            duration_secs: input.duration_secs,
            created_at: Utc::now(),
        };
        inner
            .recordings
            .entry(input.call_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn purge_caller(&self, caller_id: &str) -> Result<PurgeCounts, CallStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(caller) = inner.callers.get(caller_id).cloned() else {
            return Err(CallStoreError::NotFound("caller".to_string()));
        };

        let call_ids = inner
            .calls
            .values()
            .filter(|call| call.caller_id == caller_id)
            .map(|call| call.call_id.clone())
            .collect::<Vec<_>>();

        let mut counts = PurgeCounts::default();
        for call_id in &call_ids {
            counts.transcripts += inner
                .transcripts
                .remove(call_id)
                .map_or(0, |rows| rows.len() as u64);
            counts.extractions += inner
                .extractions
                .remove(call_id)
                .map_or(0, |rows| rows.len() as u64);
            counts.recordings += inner
                .recordings
                .remove(call_id)
                .map_or(0, |rows| rows.len() as u64);
            if let Some(call) = inner.calls.remove(call_id) {
                inner.call_ids_by_external.remove(&call.external_id);
                counts.calls += 1;
            }
        }

        inner.callers.remove(caller_id);
        inner
            .caller_ids_by_key
            .remove(&(caller.tenant_id, caller.phone_number));
        Ok(counts)
    }
}

fn is_expired(row: &CallerRow, now: DateTime<Utc>) -> bool {
    !row.is_saved && row.expires_at.is_some_and(|expires_at| expires_at < now)
}

struct PostgresCallStore {
    db: Arc<CallkeeperDb>,
}

const CALLER_COLUMNS: &str = "caller_id, tenant_id, phone_number, is_saved, expires_at, \
     total_calls, last_call_at, created_at";

const CALL_COLUMNS: &str = "call_id, external_id, tenant_id, phone_number_id, caller_id, \
     direction, status, started_at, answered_at, ended_at, duration_secs, summary, sentiment";

#[async_trait]
impl CallStore for PostgresCallStore {
    async fn find_or_create_caller(
        &self,
        tenant_id: &str,
        phone_number: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(CallerRow, bool), CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        let select = format!(
            "SELECT {CALLER_COLUMNS} FROM callkeeper.callers \
              WHERE tenant_id = $1 AND phone_number = $2"
        );
        if let Some(row) = tx
            .query_opt(select.as_str(), &[&tenant_id, &phone_number])
            .await
            .map_err(db_error)?
        {
            let out = map_caller_row(&row).map_err(CallStoreError::Db)?;
            tx.commit().await.map_err(db_error)?;
            return Ok((out, false));
        }

        let caller_id = new_id("clr");
        let inserted = tx
            .execute(
                "INSERT INTO callkeeper.callers ( \
                     caller_id, tenant_id, phone_number, is_saved, expires_at, \
                     total_calls, last_call_at, created_at \
                 ) VALUES ($1, $2, $3, FALSE, $4, 1, $5, $5) \
                 ON CONFLICT (tenant_id, phone_number) DO NOTHING",
                &[&caller_id, &tenant_id, &phone_number, &expires_at, &now],
            )
            .await
            .map_err(db_error)?;

        // Zero rows means a concurrent insert won the unique index; treat it
        // as "someone else just created it" and re-fetch.
        let row = tx
            .query_opt(select.as_str(), &[&tenant_id, &phone_number])
            .await
            .map_err(db_error)?
            .ok_or_else(|| CallStoreError::Db("caller vanished after insert".to_string()))?;
        let out = map_caller_row(&row).map_err(CallStoreError::Db)?;
        tx.commit().await.map_err(db_error)?;
        Ok((out, inserted == 1))
    }

    async fn get_caller(&self, caller_id: &str) -> Result<Option<CallerRow>, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!("SELECT {CALLER_COLUMNS} FROM callkeeper.callers WHERE caller_id = $1");
        let row = client
            .query_opt(query.as_str(), &[&caller_id])
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_caller_row)
            .transpose()
            .map_err(CallStoreError::Db)
    }

    async fn record_call(
        &self,
        caller_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!(
            "UPDATE callkeeper.callers \
                SET total_calls = total_calls + 1, last_call_at = $2 \
              WHERE caller_id = $1 \
          RETURNING {CALLER_COLUMNS}"
        );
        let row = client
            .query_opt(query.as_str(), &[&caller_id, &now])
            .await
            .map_err(db_error)?
            .ok_or_else(|| CallStoreError::NotFound("caller".to_string()))?;
        map_caller_row(&row).map_err(CallStoreError::Db)
    }

    async fn save_caller(&self, caller_id: &str) -> Result<CallerRow, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!(
            "UPDATE callkeeper.callers \
                SET is_saved = TRUE, expires_at = NULL \
              WHERE caller_id = $1 \
          RETURNING {CALLER_COLUMNS}"
        );
        let row = client
            .query_opt(query.as_str(), &[&caller_id])
            .await
            .map_err(db_error)?
            .ok_or_else(|| CallStoreError::NotFound("caller".to_string()))?;
        map_caller_row(&row).map_err(CallStoreError::Db)
    }

    async fn unsave_caller(
        &self,
        caller_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CallerRow, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!(
            "UPDATE callkeeper.callers \
                SET is_saved = FALSE, expires_at = $2 \
              WHERE caller_id = $1 \
          RETURNING {CALLER_COLUMNS}"
        );
        let row = client
            .query_opt(query.as_str(), &[&caller_id, &expires_at])
            .await
            .map_err(db_error)?
            .ok_or_else(|| CallStoreError::NotFound("caller".to_string()))?;
        map_caller_row(&row).map_err(CallStoreError::Db)
    }

    async fn count_expired_callers(&self, now: DateTime<Utc>) -> Result<i64, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM callkeeper.callers \
                  WHERE is_saved = FALSE AND expires_at < $1",
                &[&now],
            )
            .await
            .map_err(db_error)?;
        Ok(row.get(0))
    }

    async fn list_expired_callers(
        &self,
        now: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<CallerRow>, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = match limit {
            Some(limit) => {
                let query = format!(
                    "SELECT {CALLER_COLUMNS} FROM callkeeper.callers \
                      WHERE is_saved = FALSE AND expires_at < $1 \
                   ORDER BY expires_at ASC \
                      LIMIT $2"
                );
                client
                    .query(query.as_str(), &[&now, &limit])
                    .await
                    .map_err(db_error)?
            }
            None => {
                let query = format!(
                    "SELECT {CALLER_COLUMNS} FROM callkeeper.callers \
                      WHERE is_saved = FALSE AND expires_at < $1 \
                   ORDER BY expires_at ASC"
                );
                client
                    .query(query.as_str(), &[&now])
                    .await
                    .map_err(db_error)?
            }
        };
        rows.iter()
            .map(map_caller_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CallStoreError::Db)
    }

    async fn count_calls_for_caller(&self, caller_id: &str) -> Result<i64, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM callkeeper.calls WHERE caller_id = $1",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        Ok(row.get(0))
    }

    async fn create_call(&self, call: CallRow) -> Result<CallRow, CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        let existing = tx
            .query_opt(
                "SELECT call_id FROM callkeeper.calls WHERE external_id = $1",
                &[&call.external_id],
            )
            .await
            .map_err(db_error)?;
        if existing.is_some() {
            return Err(CallStoreError::Conflict(format!(
                "call with external id {} already exists",
                call.external_id
            )));
        }

        tx.execute(
            "INSERT INTO callkeeper.calls ( \
                 call_id, external_id, tenant_id, phone_number_id, caller_id, \
                 direction, status, started_at, answered_at, ended_at, \
                 duration_secs, summary, sentiment \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
            &[
                &call.call_id,
                &call.external_id,
                &call.tenant_id,
                &call.phone_number_id,
                &call.caller_id,
                &call.direction.as_str(),
                &call.status.as_str(),
                &call.started_at,
                &call.answered_at,
                &call.ended_at,
                &call.duration_secs,
                &call.summary,
                &call.sentiment.map(|s| s.as_str()),
            ],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(call)
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRow>, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!("SELECT {CALL_COLUMNS} FROM callkeeper.calls WHERE call_id = $1");
        let row = client
            .query_opt(query.as_str(), &[&call_id])
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_call_row)
            .transpose()
            .map_err(CallStoreError::Db)
    }

    async fn get_call_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CallRow>, CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let query = format!("SELECT {CALL_COLUMNS} FROM callkeeper.calls WHERE external_id = $1");
        let row = client
            .query_opt(query.as_str(), &[&external_id])
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_call_row)
            .transpose()
            .map_err(CallStoreError::Db)
    }

    async fn persist_call_update(&self, call: &CallRow) -> Result<(), CallStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let updated = client
            .execute(
                "UPDATE callkeeper.calls \
                    SET status = $2, answered_at = $3, ended_at = $4, \
                        duration_secs = $5, summary = $6, sentiment = $7 \
                  WHERE call_id = $1",
                &[
                    &call.call_id,
                    &call.status.as_str(),
                    &call.answered_at,
                    &call.ended_at,
                    &call.duration_secs,
                    &call.summary,
                    &call.sentiment.map(|s| s.as_str()),
                ],
            )
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(CallStoreError::NotFound("call".to_string()));
        }
        Ok(())
    }

    async fn append_transcript(
        &self,
        input: NewTranscriptInput,
    ) -> Result<TranscriptRow, CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        ensure_call_exists(&tx, &input.call_id).await?;
        let seq_row = tx
            .query_one(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM callkeeper.transcripts WHERE call_id = $1",
                &[&input.call_id],
            )
            .await
            .map_err(db_error)?;
        let seq: i32 = seq_row.get(0);

        let row = TranscriptRow {
            transcript_id: new_id("trn"),
            call_id: input.call_id,
            seq,
            role: input.role,
            content: input.content,
            confidence: input.confidence,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO callkeeper.transcripts ( \
                 transcript_id, call_id, seq, role, content, confidence, created_at \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7)",
            &[
                &row.transcript_id,
                &row.call_id,
                &row.seq,
                &row.role.as_str(),
                &row.content,
                &row.confidence,
                &row.created_at,
            ],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(row)
    }

    async fn append_extraction(
        &self,
        input: NewExtractionInput,
    ) -> Result<ExtractionRow, CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        ensure_call_exists(&tx, &input.call_id).await?;
        let row = ExtractionRow {
            extraction_id: new_id("ext"),
            call_id: input.call_id,
            kind: input.kind,
            data: input.data,
            confidence: input.confidence,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO callkeeper.extractions ( \
                 extraction_id, call_id, kind, data, confidence, created_at \
             ) VALUES ($1,$2,$3,$4,$5,$6)",
            &[
                &row.extraction_id,
                &row.call_id,
                &row.kind,
                &row.data,
                &row.confidence,
                &row.created_at,
            ],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(row)
    }

    async fn add_recording(
        &self,
        input: NewRecordingInput,
    ) -> Result<RecordingRow, CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        ensure_call_exists(&tx, &input.call_id).await?;
        let row = RecordingRow {
            recording_id: new_id("rec"),
            call_id: input.call_id,
            url: input.url,
            duration_secs: input.duration_secs,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO callkeeper.recordings ( \
                 recording_id, call_id, url, duration_secs, created_at \
             ) VALUES ($1,$2,$3,$4,$5)",
            &[
                &row.recording_id,
                &row.call_id,
                &row.url,
                &row.duration_secs,
                &row.created_at,
            ],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(row)
    }

    async fn purge_caller(&self, caller_id: &str) -> Result<PurgeCounts, CallStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;

        let exists = tx
            .query_opt(
                "SELECT caller_id FROM callkeeper.callers WHERE caller_id = $1",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(CallStoreError::NotFound("caller".to_string()));
        }

        let transcripts = tx
            .execute(
                "DELETE FROM callkeeper.transcripts \
                  WHERE call_id IN (SELECT call_id FROM callkeeper.calls WHERE caller_id = $1)",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        let extractions = tx
            .execute(
                "DELETE FROM callkeeper.extractions \
                  WHERE call_id IN (SELECT call_id FROM callkeeper.calls WHERE caller_id = $1)",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        let recordings = tx
            .execute(
                "DELETE FROM callkeeper.recordings \
                  WHERE call_id IN (SELECT call_id FROM callkeeper.calls WHERE caller_id = $1)",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        let calls = tx
            .execute(
                "DELETE FROM callkeeper.calls WHERE caller_id = $1",
                &[&caller_id],
            )
            .await
            .map_err(db_error)?;
        tx.execute(
            "DELETE FROM callkeeper.callers WHERE caller_id = $1",
            &[&caller_id],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(PurgeCounts {
            calls,
            transcripts,
            extractions,
            recordings,
        })
    }
}

async fn ensure_call_exists(
    tx: &tokio_postgres::Transaction<'_>,
    call_id: &str,
) -> Result<(), CallStoreError> {
    let exists = tx
        .query_opt(
            "SELECT call_id FROM callkeeper.calls WHERE call_id = $1",
            &[&call_id],
        )
        .await
        .map_err(db_error)?;
    if exists.is_none() {
        return Err(CallStoreError::NotFound("call".to_string()));
    }
    Ok(())
}

fn db_error(error: tokio_postgres::Error) -> CallStoreError {
    CallStoreError::Db(error.to_string())
}

fn map_caller_row(row: &tokio_postgres::Row) -> Result<CallerRow, String> {
    Ok(CallerRow {
        caller_id: row.try_get("caller_id").map_err(|e| e.to_string())?,
        tenant_id: row.try_get("tenant_id").map_err(|e| e.to_string())?,
        phone_number: row.try_get("phone_number").map_err(|e| e.to_string())?,
        is_saved: row.try_get("is_saved").map_err(|e| e.to_string())?,
        expires_at: row.try_get("expires_at").map_err(|e| e.to_string())?,
        total_calls: row.try_get("total_calls").map_err(|e| e.to_string())?,
        last_call_at: row.try_get("last_call_at").map_err(|e| e.to_string())?,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
    })
}

fn map_call_row(row: &tokio_postgres::Row) -> Result<CallRow, String> {
    let direction: String = row.try_get("direction").map_err(|e| e.to_string())?;
    let status: String = row.try_get("status").map_err(|e| e.to_string())?;
    let sentiment: Option<String> = row.try_get("sentiment").map_err(|e| e.to_string())?;
    Ok(CallRow {
        call_id: row.try_get("call_id").map_err(|e| e.to_string())?,
        external_id: row.try_get("external_id").map_err(|e| e.to_string())?,
        tenant_id: row.try_get("tenant_id").map_err(|e| e.to_string())?,
        phone_number_id: row.try_get("phone_number_id").map_err(|e| e.to_string())?,
        caller_id: row.try_get("caller_id").map_err(|e| e.to_string())?,
        direction: CallDirection::parse(&direction)
            .ok_or_else(|| format!("unknown call direction {direction}"))?,
        status: CallStatus::parse(&status).ok_or_else(|| format!("unknown call status {status}"))?,
        started_at: row.try_get("started_at").map_err(|e| e.to_string())?,
        answered_at: row.try_get("answered_at").map_err(|e| e.to_string())?,
        ended_at: row.try_get("ended_at").map_err(|e| e.to_string())?,
        duration_secs: row.try_get("duration_secs").map_err(|e| e.to_string())?,
        summary: row.try_get("summary").map_err(|e| e.to_string())?,
        sentiment: sentiment
            .map(|value| {
                Sentiment::parse(&value).ok_or_else(|| format!("unknown sentiment {value}"))
            })
            .transpose()?,
    })
}
