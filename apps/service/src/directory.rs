//! Tenant directory: tenants, their carrier-assigned phone numbers, and the
//! per-tenant agent configuration (provider selection plus the encrypted
//! provider-key blob). CRUD here is deliberately thin; the interesting
//! governance logic lives in `calls` and `retention`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::calls::types::TelephonyProvider;
use crate::db::CallkeeperDb;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Tenant identity plus the knobs that govern retention math for its callers.
#[derive(Clone, Debug, Serialize)]
pub struct TenantRow {
    pub tenant_id: String,
    pub name: String,
    pub data_retention_days: i32,
    pub save_call_recordings: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PhoneNumberRow {
    pub phone_number_id: String,
    pub tenant_id: String,
    pub number: String,
    pub provider: TelephonyProvider,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentConfigRow {
    pub tenant_id: String,
    pub stt_provider: Option<String>,
    pub tts_provider: Option<String>,
    pub llm_provider: Option<String>,
    pub telephony_provider: TelephonyProvider,
    pub enable_recording: bool,
    /// Vault token (`b64(iv):b64(tag):b64(ciphertext)`); never plaintext.
    pub encrypted_provider_keys: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn put_tenant(&self, tenant: TenantRow) -> Result<(), DirectoryStoreError>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRow>, DirectoryStoreError>;

    async fn put_phone_number(&self, number: PhoneNumberRow) -> Result<(), DirectoryStoreError>;

    async fn get_phone_number(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError>;

    /// Resolves an active phone number by its E.164 value and provider; this
    /// is how an inbound webhook finds the owning tenant.
    async fn find_active_phone_number(
        &self,
        number: &str,
        provider: TelephonyProvider,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError>;

    async fn upsert_agent_config(
        &self,
        config: AgentConfigRow,
    ) -> Result<(), DirectoryStoreError>;

    async fn get_agent_config(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AgentConfigRow>, DirectoryStoreError>;
}

#[must_use]
pub fn memory() -> Arc<dyn DirectoryStore> {
    Arc::new(MemoryDirectoryStore::default())
}

#[must_use]
pub fn postgres(db: Arc<CallkeeperDb>) -> Arc<dyn DirectoryStore> {
    Arc::new(PostgresDirectoryStore { db })
}

#[derive(Default)]
struct MemoryDirectoryStore {
    inner: Mutex<MemoryDirectoryInner>,
}

#[derive(Default)]
struct MemoryDirectoryInner {
    tenants: HashMap<String, TenantRow>,
    phone_numbers: HashMap<String, PhoneNumberRow>,
    agent_configs: HashMap<String, AgentConfigRow>,
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn put_tenant(&self, tenant: TenantRow) -> Result<(), DirectoryStoreError> {
        let mut inner = self.inner.lock().await;
        inner.tenants.insert(tenant.tenant_id.clone(), tenant);
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRow>, DirectoryStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.tenants.get(tenant_id).cloned())
    }

    async fn put_phone_number(&self, number: PhoneNumberRow) -> Result<(), DirectoryStoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .phone_numbers
            .insert(number.phone_number_id.clone(), number);
        Ok(())
    }

    async fn get_phone_number(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.phone_numbers.get(phone_number_id).cloned())
    }

    async fn find_active_phone_number(
        &self,
        number: &str,
        provider: TelephonyProvider,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .phone_numbers
            .values()
            .find(|row| row.number == number && row.provider == provider && row.active)
            .cloned())
    }

    async fn upsert_agent_config(
        &self,
        config: AgentConfigRow,
    ) -> Result<(), DirectoryStoreError> {
        let mut inner = self.inner.lock().await;
        inner.agent_configs.insert(config.tenant_id.clone(), config);
        Ok(())
    }

    async fn get_agent_config(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AgentConfigRow>, DirectoryStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.agent_configs.get(tenant_id).cloned())
    }
}

struct PostgresDirectoryStore {
    db: Arc<CallkeeperDb>,
}

#[async_trait]
impl DirectoryStore for PostgresDirectoryStore {
    async fn put_tenant(&self, tenant: TenantRow) -> Result<(), DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                "INSERT INTO callkeeper.tenants ( \
                     tenant_id, name, data_retention_days, save_call_recordings \
                 ) VALUES ($1,$2,$3,$4) \
                 ON CONFLICT (tenant_id) DO UPDATE \
                    SET name = $2, data_retention_days = $3, save_call_recordings = $4",
                &[
                    &tenant.tenant_id,
                    &tenant.name,
                    &tenant.data_retention_days,
                    &tenant.save_call_recordings,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRow>, DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT tenant_id, name, data_retention_days, save_call_recordings \
                   FROM callkeeper.tenants WHERE tenant_id = $1",
                &[&tenant_id],
            )
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_tenant_row)
            .transpose()
            .map_err(DirectoryStoreError::Db)
    }

    async fn put_phone_number(&self, number: PhoneNumberRow) -> Result<(), DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                "INSERT INTO callkeeper.phone_numbers ( \
                     phone_number_id, tenant_id, number, provider, active \
                 ) VALUES ($1,$2,$3,$4,$5) \
                 ON CONFLICT (phone_number_id) DO UPDATE \
                    SET tenant_id = $2, number = $3, provider = $4, active = $5",
                &[
                    &number.phone_number_id,
                    &number.tenant_id,
                    &number.number,
                    &number.provider.as_str(),
                    &number.active,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_phone_number(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT phone_number_id, tenant_id, number, provider, active \
                   FROM callkeeper.phone_numbers WHERE phone_number_id = $1",
                &[&phone_number_id],
            )
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_phone_number_row)
            .transpose()
            .map_err(DirectoryStoreError::Db)
    }

    async fn find_active_phone_number(
        &self,
        number: &str,
        provider: TelephonyProvider,
    ) -> Result<Option<PhoneNumberRow>, DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT phone_number_id, tenant_id, number, provider, active \
                   FROM callkeeper.phone_numbers \
                  WHERE number = $1 AND provider = $2 AND active = TRUE",
                &[&number, &provider.as_str()],
            )
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_phone_number_row)
            .transpose()
            .map_err(DirectoryStoreError::Db)
    }

    async fn upsert_agent_config(
        &self,
        config: AgentConfigRow,
    ) -> Result<(), DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                "INSERT INTO callkeeper.agent_configs ( \
                     tenant_id, stt_provider, tts_provider, llm_provider, \
                     telephony_provider, enable_recording, encrypted_provider_keys, updated_at \
                 ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
                 ON CONFLICT (tenant_id) DO UPDATE \
                    SET stt_provider = $2, tts_provider = $3, llm_provider = $4, \
                        telephony_provider = $5, enable_recording = $6, \
                        encrypted_provider_keys = $7, updated_at = $8",
                &[
                    &config.tenant_id,
                    &config.stt_provider,
                    &config.tts_provider,
                    &config.llm_provider,
                    &config.telephony_provider.as_str(),
                    &config.enable_recording,
                    &config.encrypted_provider_keys,
                    &config.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_agent_config(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AgentConfigRow>, DirectoryStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT tenant_id, stt_provider, tts_provider, llm_provider, \
                        telephony_provider, enable_recording, encrypted_provider_keys, updated_at \
                   FROM callkeeper.agent_configs WHERE tenant_id = $1",
                &[&tenant_id],
            )
            .await
            .map_err(db_error)?;
        row.as_ref()
            .map(map_agent_config_row)
            .transpose()
            .map_err(DirectoryStoreError::Db)
    }
}

fn db_error(error: tokio_postgres::Error) -> DirectoryStoreError {
    DirectoryStoreError::Db(error.to_string())
}

fn map_tenant_row(row: &tokio_postgres::Row) -> Result<TenantRow, String> {
    Ok(TenantRow {
        tenant_id: row.try_get("tenant_id").map_err(|e| e.to_string())?,
        name: row.try_get("name").map_err(|e| e.to_string())?,
        data_retention_days: row
            .try_get("data_retention_days")
            .map_err(|e| e.to_string())?,
        save_call_recordings: row
            .try_get("save_call_recordings")
            .map_err(|e| e.to_string())?,
    })
}

fn map_phone_number_row(row: &tokio_postgres::Row) -> Result<PhoneNumberRow, String> {
    let provider: String = row.try_get("provider").map_err(|e| e.to_string())?;
    Ok(PhoneNumberRow {
        phone_number_id: row.try_get("phone_number_id").map_err(|e| e.to_string())?,
        tenant_id: row.try_get("tenant_id").map_err(|e| e.to_string())?,
        number: row.try_get("number").map_err(|e| e.to_string())?,
        provider: TelephonyProvider::parse(&provider)
            .ok_or_else(|| format!("unknown telephony provider {provider}"))?,
        active: row.try_get("active").map_err(|e| e.to_string())?,
    })
}

fn map_agent_config_row(row: &tokio_postgres::Row) -> Result<AgentConfigRow, String> {
    let provider: String = row
        .try_get("telephony_provider")
        .map_err(|e| e.to_string())?;
    Ok(AgentConfigRow {
        tenant_id: row.try_get("tenant_id").map_err(|e| e.to_string())?,
        stt_provider: row.try_get("stt_provider").map_err(|e| e.to_string())?,
        tts_provider: row.try_get("tts_provider").map_err(|e| e.to_string())?,
        llm_provider: row.try_get("llm_provider").map_err(|e| e.to_string())?,
        telephony_provider: TelephonyProvider::parse(&provider)
            .ok_or_else(|| format!("unknown telephony provider {provider}"))?,
        enable_recording: row.try_get("enable_recording").map_err(|e| e.to_string())?,
        encrypted_provider_keys: row
            .try_get("encrypted_provider_keys")
            .map_err(|e| e.to_string())?,
        updated_at: row.try_get("updated_at").map_err(|e| e.to_string())?,
    })
}
