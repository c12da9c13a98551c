//! In-memory `TenantStore` for tests and local demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::store::traits::TenantStore;
use crate::tenant::{BusinessProfile, IntegrationRecord, META_PROVIDER, TenantId};

/// HashMap-backed tenant store.
///
/// `fail_next_loads` makes the next N integration loads return a transient
/// error, to exercise the vault's retry path.
#[derive(Default)]
pub struct InMemoryStore {
    integrations: RwLock<HashMap<TenantId, IntegrationRecord>>,
    profiles: RwLock<HashMap<TenantId, BusinessProfile>>,
    transient_failures: AtomicU32,
    integration_loads: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_integration(
        &self,
        tenant: &TenantId,
        access_token: &str,
        ad_account_id: Option<&str>,
    ) {
        self.integrations.write().await.insert(
            tenant.clone(),
            IntegrationRecord {
                provider: META_PROVIDER.to_string(),
                access_token: SecretString::from(access_token.to_string()),
                ad_account_id: ad_account_id.map(String::from),
            },
        );
    }

    pub async fn remove_integration(&self, tenant: &TenantId) {
        self.integrations.write().await.remove(tenant);
    }

    pub async fn put_profile(&self, tenant: &TenantId, profile: BusinessProfile) {
        self.profiles.write().await.insert(tenant.clone(), profile);
    }

    /// Seed a complete tenant in one call.
    pub async fn put_tenant(
        &self,
        tenant: &TenantId,
        access_token: &str,
        ad_account_id: &str,
        profile: BusinessProfile,
    ) {
        self.put_integration(tenant, access_token, Some(ad_account_id))
            .await;
        self.put_profile(tenant, profile).await;
    }

    pub fn fail_next_loads(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `load_integration` calls served so far (including failures).
    pub fn integration_loads(&self) -> u32 {
        self.integration_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn load_integration(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<IntegrationRecord>, DatabaseError> {
        self.integration_loads.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DatabaseError::Unavailable("injected failure".to_string()));
        }

        Ok(self.integrations.read().await.get(tenant).cloned())
    }

    async fn load_profile(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<BusinessProfile>, DatabaseError> {
        Ok(self.profiles.read().await.get(tenant).cloned())
    }
}
