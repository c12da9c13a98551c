//! `TenantStore` trait, the read-only interface to the persistence
//! collaborator.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::tenant::{BusinessProfile, IntegrationRecord, TenantId};

/// Read access to per-tenant integration and profile records.
///
/// Implementations return `Ok(None)` for absent records and reserve
/// `DatabaseError::Unavailable` for failures worth retrying.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Load the tenant's ad-platform integration, if any.
    async fn load_integration(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<IntegrationRecord>, DatabaseError>;

    /// Load the tenant's business profile, if any.
    async fn load_profile(&self, tenant: &TenantId)
    -> Result<Option<BusinessProfile>, DatabaseError>;
}
