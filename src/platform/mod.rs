//! Advertising-platform collaborator.
//!
//! The core talks to the platform only through [`AdPlatform`]. Each call
//! carries the credential of the bound tool that issued it; nothing here
//! stores credentials.

pub mod meta;

pub use meta::MetaGraphClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::tenant::IntegrationCredential;

/// Campaign delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Case-insensitive parse.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "PAUSED" => Some(Self::Paused),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Reporting window for an insights query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightsRange {
    /// A named platform preset such as `yesterday` or `last_7d`.
    Preset(&'static str),
    /// One calendar day.
    Day(NaiveDate),
}

/// One platform operation. Every bound tool maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformRequest {
    AccountInsights {
        range: InsightsRange,
    },
    ListCampaigns {
        status: Option<CampaignStatus>,
        limit: u32,
    },
    CampaignInsights {
        campaign_id: String,
        range: InsightsRange,
    },
    UpdateCampaignStatus {
        campaign_id: String,
        status: CampaignStatus,
    },
}

impl PlatformRequest {
    /// Whether the request changes state on the platform.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::UpdateCampaignStatus { .. })
    }
}

/// Reaches the tenant's advertising account.
#[async_trait]
pub trait AdPlatform: Send + Sync {
    /// Short platform name for logs.
    fn name(&self) -> &str;

    /// Execute one request on behalf of the credential's owner.
    async fn call(
        &self,
        credential: &IntegrationCredential,
        request: &PlatformRequest,
    ) -> Result<serde_json::Value, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_parse_is_case_insensitive() {
        assert_eq!(CampaignStatus::parse("paused"), Some(CampaignStatus::Paused));
        assert_eq!(CampaignStatus::parse(" Active "), Some(CampaignStatus::Active));
        assert_eq!(CampaignStatus::parse("deleted"), None);
    }

    #[test]
    fn only_status_update_mutates() {
        assert!(
            PlatformRequest::UpdateCampaignStatus {
                campaign_id: "1".into(),
                status: CampaignStatus::Paused,
            }
            .is_mutation()
        );
        assert!(
            !PlatformRequest::AccountInsights {
                range: InsightsRange::Preset("yesterday"),
            }
            .is_mutation()
        );
    }
}
