//! Credential vault — loads and shape-checks a tenant's integration and
//! business profile for session setup.
//!
//! Nothing is cached here: every call reads the store, and the returned
//! credential is moved straight into the new session's bound tools.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::error::{DatabaseError, Error};
use crate::retry::RetryPolicy;
use crate::store::TenantStore;
use crate::tenant::{
    BusinessProfile, IntegrationCredential, IntegrationRecord, TenantId, normalize_ad_account_id,
};

/// Everything session setup needs from persistence.
#[derive(Debug)]
pub struct TenantContext {
    pub credential: IntegrationCredential,
    pub profile: BusinessProfile,
}

/// Reads tenant records through the persistence collaborator.
pub struct CredentialVault {
    store: Arc<dyn TenantStore>,
    retry: RetryPolicy,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn TenantStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Load and validate the tenant's credential and profile.
    ///
    /// Absent integration is `CredentialMissing` and is never retried; only
    /// transient storage errors are. An absent profile comes back empty.
    pub async fn load(&self, tenant: &TenantId) -> Result<TenantContext, Error> {
        let record = self
            .retry
            .execute("load_integration", DatabaseError::is_transient, || {
                self.store.load_integration(tenant)
            })
            .await
            .map_err(|source| Error::Storage {
                tenant: tenant.clone(),
                source,
            })?
            .ok_or_else(|| Error::CredentialMissing {
                tenant: tenant.clone(),
            })?;

        let credential = validate_credential(tenant, record)?;

        let profile = self
            .retry
            .execute("load_profile", DatabaseError::is_transient, || {
                self.store.load_profile(tenant)
            })
            .await
            .map_err(|source| Error::Storage {
                tenant: tenant.clone(),
                source,
            })?
            .unwrap_or_default();

        tracing::debug!(
            tenant = %tenant,
            ad_account = credential.ad_account_id(),
            "Loaded tenant integration"
        );

        Ok(TenantContext {
            credential,
            profile,
        })
    }
}

/// Required fields present and well-formed.
fn validate_credential(
    tenant: &TenantId,
    record: IntegrationRecord,
) -> Result<IntegrationCredential, Error> {
    let invalid = |reason: &str| Error::CredentialInvalid {
        tenant: tenant.clone(),
        reason: reason.to_string(),
    };

    if record.access_token.expose_secret().trim().is_empty() {
        return Err(invalid("access token is empty"));
    }

    let raw_account = record
        .ad_account_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| invalid("no ad account selected"))?;

    let ad_account_id = normalize_ad_account_id(raw_account)
        .ok_or_else(|| invalid("ad account id is not of the form act_<digits>"))?;

    Ok(IntegrationCredential::new(
        record.access_token,
        ad_account_id,
    ))
}
