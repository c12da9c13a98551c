//! libSQL backend for `TenantStore`.
//!
//! Supports local file and in-memory databases. The write helpers exist for
//! seeding and for the settings flows that live outside the core; the core
//! itself only reads.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::TenantStore;
use crate::tenant::{BusinessProfile, IntegrationRecord, META_PROVIDER, TenantId};

/// libSQL tenant store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Tenant store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Highest applied schema version.
    pub async fn schema_version(&self) -> Result<i64, DatabaseError> {
        migrations::get_current_version(self.conn()).await
    }

    /// Insert or replace the tenant's Meta integration.
    pub async fn upsert_integration(
        &self,
        tenant: &TenantId,
        access_token: &SecretString,
        ad_account_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO integrations
                    (tenant_id, provider, access_token, ad_account_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(tenant_id, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    ad_account_id = excluded.ad_account_id,
                    updated_at = excluded.updated_at",
                params![
                    tenant.as_str(),
                    META_PROVIDER,
                    access_token.expose_secret(),
                    opt_text(ad_account_id),
                    now,
                ],
            )
            .await
            .map_err(|e| query_error("upsert_integration", e))?;

        debug!(tenant = %tenant, "Integration stored");
        Ok(())
    }

    /// Remove the tenant's Meta integration. Returns whether a row existed.
    pub async fn delete_integration(&self, tenant: &TenantId) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM integrations WHERE tenant_id = ?1 AND provider = ?2",
                params![tenant.as_str(), META_PROVIDER],
            )
            .await
            .map_err(|e| query_error("delete_integration", e))?;
        Ok(affected > 0)
    }

    /// Insert or replace the tenant's business profile.
    pub async fn upsert_profile(
        &self,
        tenant: &TenantId,
        profile: &BusinessProfile,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let constraints = serde_json::to_string(&profile.constraints)
            .map_err(|e| DatabaseError::Serialization(format!("constraints: {e}")))?;
        let attributes = serde_json::to_string(&profile.attributes)
            .map_err(|e| DatabaseError::Serialization(format!("attributes: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO business_profiles
                    (tenant_id, business_name, objective, website_url, brand_voice,
                     constraints, attributes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    business_name = excluded.business_name,
                    objective = excluded.objective,
                    website_url = excluded.website_url,
                    brand_voice = excluded.brand_voice,
                    constraints = excluded.constraints,
                    attributes = excluded.attributes,
                    updated_at = excluded.updated_at",
                params![
                    tenant.as_str(),
                    profile.business_name.as_str(),
                    profile.objective.as_str(),
                    opt_text(profile.website_url.as_deref()),
                    opt_text(profile.brand_voice.as_deref()),
                    constraints,
                    attributes,
                    now,
                ],
            )
            .await
            .map_err(|e| query_error("upsert_profile", e))?;

        debug!(tenant = %tenant, "Business profile stored");
        Ok(())
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Lock contention is the only failure worth retrying locally.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("database is locked") || lowered.contains("busy") {
        DatabaseError::Unavailable(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

#[async_trait]
impl TenantStore for LibSqlStore {
    async fn load_integration(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<IntegrationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT provider, access_token, ad_account_id
                 FROM integrations WHERE tenant_id = ?1 AND provider = ?2",
                params![tenant.as_str(), META_PROVIDER],
            )
            .await
            .map_err(|e| query_error("load_integration", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let provider: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Serialization(format!("provider: {e}")))?;
                let access_token: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Serialization(format!("access_token: {e}")))?;
                let ad_account_id: Option<String> = row.get(2).ok();
                Ok(Some(IntegrationRecord {
                    provider,
                    access_token: SecretString::from(access_token),
                    ad_account_id,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("load_integration", e)),
        }
    }

    async fn load_profile(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<BusinessProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT business_name, objective, website_url, brand_voice, constraints, attributes
                 FROM business_profiles WHERE tenant_id = ?1",
                params![tenant.as_str()],
            )
            .await
            .map_err(|e| query_error("load_profile", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let constraints: String = row.get(4).unwrap_or_else(|_| "[]".to_string());
                let attributes: String = row.get(5).unwrap_or_else(|_| "{}".to_string());
                Ok(Some(BusinessProfile {
                    business_name: row.get(0).unwrap_or_default(),
                    objective: row.get(1).unwrap_or_default(),
                    website_url: row.get(2).ok(),
                    brand_voice: row.get(3).ok(),
                    constraints: serde_json::from_str(&constraints)
                        .map_err(|e| DatabaseError::Serialization(format!("constraints: {e}")))?,
                    attributes: serde_json::from_str(&attributes)
                        .map_err(|e| DatabaseError::Serialization(format!("attributes: {e}")))?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("load_profile", e)),
        }
    }
}
