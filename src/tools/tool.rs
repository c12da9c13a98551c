//! The ad-platform tool catalogue.
//!
//! Tools are a closed set. Each variant owns its JSON schema and a typed
//! argument struct; arguments are parsed and validated into a
//! [`PlatformRequest`] before anything touches the network. No schema has a
//! credential parameter.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::platform::{CampaignStatus, InsightsRange, PlatformRequest};

/// Date presets accepted by the insights tools.
pub const DATE_PRESETS: &[&str] = &[
    "today",
    "yesterday",
    "this_week_mon_today",
    "last_week_mon_sun",
    "this_month",
    "last_month",
    "last_3d",
    "last_7d",
    "last_14d",
    "last_28d",
    "last_30d",
    "last_90d",
    "maximum",
];

const DEFAULT_PRESET: &str = "last_7d";
const DEFAULT_CAMPAIGN_LIMIT: u32 = 25;
const MAX_CAMPAIGN_LIMIT: u32 = 100;

/// Every tool the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdTool {
    GetMetrics,
    ListCampaigns,
    GetCampaignInsights,
    UpdateCampaignStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetMetricsArgs {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_preset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListCampaignsArgs {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CampaignInsightsArgs {
    campaign_id: String,
    #[serde(default)]
    date_preset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateStatusArgs {
    campaign_id: String,
    status: String,
}

impl AdTool {
    pub const ALL: [AdTool; 4] = [
        AdTool::GetMetrics,
        AdTool::ListCampaigns,
        AdTool::GetCampaignInsights,
        AdTool::UpdateCampaignStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetMetrics => "get_metrics",
            Self::ListCampaigns => "list_campaigns",
            Self::GetCampaignInsights => "get_campaign_insights",
            Self::UpdateCampaignStatus => "update_campaign_status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::GetMetrics => {
                "Get account-level performance metrics (spend, impressions, clicks, reach, \
                 CTR, CPC, CPM, actions) for the connected ad account. Use `date` for a single \
                 day (`today`, `yesterday` or YYYY-MM-DD) or `date_preset` for a range."
            }
            Self::ListCampaigns => {
                "List campaigns in the connected ad account with their status, objective and \
                 daily budget. Optionally filter by status."
            }
            Self::GetCampaignInsights => {
                "Get performance metrics for one campaign, identified by its numeric id."
            }
            Self::UpdateCampaignStatus => {
                "Pause or activate a campaign. Only call this after the user has explicitly \
                 asked for the change."
            }
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            Self::GetMetrics => json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "A single day: 'today', 'yesterday' or YYYY-MM-DD"
                    },
                    "date_preset": {
                        "type": "string",
                        "enum": DATE_PRESETS,
                        "description": "Reporting range, used when `date` is not given"
                    }
                },
                "additionalProperties": false
            }),
            Self::ListCampaigns => json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["ACTIVE", "PAUSED", "ARCHIVED"]
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_CAMPAIGN_LIMIT,
                        "description": "Maximum campaigns to return (default 25)"
                    }
                },
                "additionalProperties": false
            }),
            Self::GetCampaignInsights => json!({
                "type": "object",
                "properties": {
                    "campaign_id": {
                        "type": "string",
                        "description": "Numeric campaign id"
                    },
                    "date_preset": {
                        "type": "string",
                        "enum": DATE_PRESETS
                    }
                },
                "required": ["campaign_id"],
                "additionalProperties": false
            }),
            Self::UpdateCampaignStatus => json!({
                "type": "object",
                "properties": {
                    "campaign_id": {
                        "type": "string",
                        "description": "Numeric campaign id"
                    },
                    "status": {
                        "type": "string",
                        "enum": ["ACTIVE", "PAUSED"]
                    }
                },
                "required": ["campaign_id", "status"],
                "additionalProperties": false
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Parse and validate raw arguments into a platform request.
    pub fn parse_request(&self, arguments: &Value) -> Result<PlatformRequest, ToolError> {
        match self {
            Self::GetMetrics => {
                let args: GetMetricsArgs = self.deserialize(arguments)?;
                let range = match (args.date, args.date_preset) {
                    (Some(_), Some(_)) => {
                        return Err(self.invalid("pass either `date` or `date_preset`, not both"));
                    }
                    (Some(date), None) => self.parse_day(&date)?,
                    (None, Some(preset)) => self.parse_preset(&preset)?,
                    (None, None) => InsightsRange::Preset(DEFAULT_PRESET),
                };
                Ok(PlatformRequest::AccountInsights { range })
            }
            Self::ListCampaigns => {
                let args: ListCampaignsArgs = self.deserialize(arguments)?;
                let status = args
                    .status
                    .map(|raw| {
                        CampaignStatus::parse(&raw)
                            .ok_or_else(|| self.invalid(&format!("unknown status {raw:?}")))
                    })
                    .transpose()?;
                let limit = args.limit.unwrap_or(DEFAULT_CAMPAIGN_LIMIT);
                if !(1..=MAX_CAMPAIGN_LIMIT).contains(&limit) {
                    return Err(self.invalid(&format!(
                        "limit must be between 1 and {MAX_CAMPAIGN_LIMIT}, got {limit}"
                    )));
                }
                Ok(PlatformRequest::ListCampaigns { status, limit })
            }
            Self::GetCampaignInsights => {
                let args: CampaignInsightsArgs = self.deserialize(arguments)?;
                let campaign_id = self.parse_campaign_id(&args.campaign_id)?;
                let range = match args.date_preset {
                    Some(preset) => self.parse_preset(&preset)?,
                    None => InsightsRange::Preset(DEFAULT_PRESET),
                };
                Ok(PlatformRequest::CampaignInsights { campaign_id, range })
            }
            Self::UpdateCampaignStatus => {
                let args: UpdateStatusArgs = self.deserialize(arguments)?;
                let campaign_id = self.parse_campaign_id(&args.campaign_id)?;
                let status = match CampaignStatus::parse(&args.status) {
                    Some(status @ (CampaignStatus::Active | CampaignStatus::Paused)) => status,
                    _ => {
                        return Err(self.invalid(&format!(
                            "status must be ACTIVE or PAUSED, got {:?}",
                            args.status
                        )));
                    }
                };
                Ok(PlatformRequest::UpdateCampaignStatus {
                    campaign_id,
                    status,
                })
            }
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, arguments: &Value) -> Result<T, ToolError> {
        // Models sometimes send `null` for a tool with no required fields.
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments.clone()
        };
        serde_json::from_value(arguments).map_err(|e| self.invalid(&e.to_string()))
    }

    fn parse_day(&self, raw: &str) -> Result<InsightsRange, ToolError> {
        let raw = raw.trim();
        match raw {
            "today" => Ok(InsightsRange::Preset("today")),
            "yesterday" => Ok(InsightsRange::Preset("yesterday")),
            _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(InsightsRange::Day)
                .map_err(|_| {
                    self.invalid(&format!(
                        "date must be 'today', 'yesterday' or YYYY-MM-DD, got {raw:?}"
                    ))
                }),
        }
    }

    fn parse_preset(&self, raw: &str) -> Result<InsightsRange, ToolError> {
        let raw = raw.trim();
        DATE_PRESETS
            .iter()
            .copied()
            .find(|preset| *preset == raw)
            .map(InsightsRange::Preset)
            .ok_or_else(|| self.invalid(&format!("unknown date_preset {raw:?}")))
    }

    fn parse_campaign_id(&self, raw: &str) -> Result<String, ToolError> {
        let id = raw.trim();
        if id.is_empty() || id.len() > 32 || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(self.invalid(&format!("campaign_id must be numeric, got {raw:?}")));
        }
        Ok(id.to_string())
    }

    fn invalid(&self, reason: &str) -> ToolError {
        ToolError::InvalidArgs {
            name: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for tool in AdTool::ALL {
            assert_eq!(AdTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(AdTool::from_name("delete_account"), None);
    }

    #[test]
    fn no_schema_exposes_a_credential_parameter() {
        for tool in AdTool::ALL {
            let schema = tool.parameters_schema().to_string();
            assert!(!schema.contains("token"), "{} schema mentions a token", tool.name());
            assert!(!schema.contains("ad_account"), "{} schema mentions the account", tool.name());
        }
    }

    #[test]
    fn get_metrics_yesterday() {
        let request = AdTool::GetMetrics
            .parse_request(&json!({"date": "yesterday"}))
            .unwrap();
        assert_eq!(
            request,
            PlatformRequest::AccountInsights {
                range: InsightsRange::Preset("yesterday")
            }
        );
    }

    #[test]
    fn get_metrics_explicit_day() {
        let request = AdTool::GetMetrics
            .parse_request(&json!({"date": "2024-05-01"}))
            .unwrap();
        assert_eq!(
            request,
            PlatformRequest::AccountInsights {
                range: InsightsRange::Day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            }
        );
    }

    #[test]
    fn get_metrics_defaults_and_null_args() {
        let request = AdTool::GetMetrics.parse_request(&Value::Null).unwrap();
        assert_eq!(
            request,
            PlatformRequest::AccountInsights {
                range: InsightsRange::Preset("last_7d")
            }
        );
    }

    #[test]
    fn get_metrics_rejects_bad_input() {
        for args in [
            json!({"date": "last tuesday"}),
            json!({"date": "yesterday", "date_preset": "last_7d"}),
            json!({"date_preset": "forever"}),
            json!({"date": "yesterday", "access_token": "x"}),
        ] {
            let err = AdTool::GetMetrics.parse_request(&args).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArgs { .. }), "{args}");
        }
    }

    #[test]
    fn list_campaigns_limit_bounds() {
        assert_eq!(
            AdTool::ListCampaigns
                .parse_request(&json!({"status": "paused"}))
                .unwrap(),
            PlatformRequest::ListCampaigns {
                status: Some(CampaignStatus::Paused),
                limit: 25
            }
        );
        assert!(
            AdTool::ListCampaigns
                .parse_request(&json!({"limit": 0}))
                .is_err()
        );
        assert!(
            AdTool::ListCampaigns
                .parse_request(&json!({"limit": 101}))
                .is_err()
        );
    }

    #[test]
    fn campaign_id_must_be_numeric() {
        let err = AdTool::GetCampaignInsights
            .parse_request(&json!({"campaign_id": "../act_2"}))
            .unwrap_err();
        assert!(err.to_string().contains("campaign_id"));
    }

    #[test]
    fn update_status_refuses_archive() {
        assert!(
            AdTool::UpdateCampaignStatus
                .parse_request(&json!({"campaign_id": "123", "status": "ARCHIVED"}))
                .is_err()
        );
        assert_eq!(
            AdTool::UpdateCampaignStatus
                .parse_request(&json!({"campaign_id": "123", "status": "paused"}))
                .unwrap(),
            PlatformRequest::UpdateCampaignStatus {
                campaign_id: "123".into(),
                status: CampaignStatus::Paused
            }
        );
    }

    #[test]
    fn update_status_requires_fields() {
        assert!(
            AdTool::UpdateCampaignStatus
                .parse_request(&json!({"campaign_id": "123"}))
                .is_err()
        );
    }
}
