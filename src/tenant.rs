//! Tenant identity, integration credentials, and business profile.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Provider key for the Meta Ads integration in the store.
pub const META_PROVIDER: &str = "meta";

/// Verified tenant identifier, produced by the upstream auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a raw identifier (e.g. a header value). Blank input is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Integration record exactly as the persistence collaborator returns it.
///
/// Nothing here is validated yet; the vault checks its shape before a
/// credential is built from it.
#[derive(Debug, Clone)]
pub struct IntegrationRecord {
    pub provider: String,
    pub access_token: SecretString,
    /// The tenant's selected ad account, if one has been chosen.
    pub ad_account_id: Option<String>,
}

/// A validated platform credential for one tenant.
///
/// Not `Clone` and not `Serialize`: it is moved into a session's bound tools
/// and dropped with them. `Debug` never prints the token.
pub struct IntegrationCredential {
    access_token: SecretString,
    ad_account_id: String,
}

impl IntegrationCredential {
    /// Build a credential. `ad_account_id` must already be normalized
    /// to the `act_<digits>` form.
    pub(crate) fn new(access_token: SecretString, ad_account_id: String) -> Self {
        Self {
            access_token,
            ad_account_id,
        }
    }

    /// The platform access token. Callers must `expose_secret()` explicitly.
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Ad account in `act_<digits>` form.
    pub fn ad_account_id(&self) -> &str {
        &self.ad_account_id
    }
}

impl fmt::Debug for IntegrationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationCredential")
            .field("access_token", &"[REDACTED]")
            .field("ad_account_id", &self.ad_account_id)
            .finish()
    }
}

/// Normalize an ad-account id to the `act_<digits>` form.
///
/// Returns `None` if the id is blank or not numeric after the prefix.
pub fn normalize_ad_account_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("act_").unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("act_{digits}"))
}

/// Free-form description of a tenant's business, injected into every
/// agent preamble for that tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProfile {
    #[serde(default)]
    pub business_name: String,
    /// Primary advertising objective, e.g. "leads" or "online sales".
    #[serde(default)]
    pub objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_voice: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    /// Anything else the tenant told us. Sorted so the preamble is stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl BusinessProfile {
    pub fn new(business_name: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            business_name: business_name.into(),
            objective: objective.into(),
            ..Default::default()
        }
    }

    /// Required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.business_name.trim().is_empty() {
            missing.push("business_name");
        }
        if self.objective.trim().is_empty() {
            missing.push("objective");
        }
        missing
    }

    /// Render the profile as a preamble section.
    pub fn to_preamble_section(&self) -> String {
        let mut parts = vec!["# Business Profile".to_string()];

        parts.push(format!("- **Business:** {}", self.business_name.trim()));
        parts.push(format!("- **Advertising objective:** {}", self.objective.trim()));

        if let Some(ref url) = self.website_url {
            parts.push(format!("- **Website:** {}", url.trim()));
        }

        if let Some(ref voice) = self.brand_voice {
            parts.push(format!("- **Brand voice:** {}", voice.trim()));
        }

        if !self.constraints.is_empty() {
            parts.push("- **Constraints:**".to_string());
            for constraint in &self.constraints {
                parts.push(format!("  - {}", constraint.trim()));
            }
        }

        for (key, value) in &self.attributes {
            parts.push(format!("- **{}:** {}", key.trim(), value.trim()));
        }

        parts.join("\n")
    }
}
