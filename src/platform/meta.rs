//! Meta Graph API client.
//!
//! The access token is sent as a bearer header, never in the query string.
//! Error bodies are classified into unauthorized, transient and rejected so
//! the bound tools know what may be retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::error::{ConfigError, PlatformError};
use crate::platform::{AdPlatform, InsightsRange, PlatformRequest};
use crate::tenant::IntegrationCredential;

/// Graph API version the original integration was written against.
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v20.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const INSIGHTS_FIELDS: &str = "spend,impressions,clicks,reach,ctr,cpc,cpm,actions";
const CAMPAIGN_FIELDS: &str = "id,name,status,effective_status,objective,daily_budget";

/// Metrics the Graph API returns as decimal strings.
const NUMERIC_FIELDS: &[&str] = &["spend", "impressions", "clicks", "reach", "ctr", "cpc", "cpm"];

/// Graph error codes for expired, revoked or otherwise invalid tokens.
const AUTH_ERROR_CODES: &[i64] = &[102, 190];

/// Graph throttling codes.
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613, 80004];

/// An HTTP call against the Graph API, before the token is attached.
#[derive(Debug, PartialEq)]
struct GraphCall {
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    form: Vec<(&'static str, String)>,
}

/// Reqwest-backed [`AdPlatform`] for Meta Ads.
pub struct MetaGraphClient {
    base_url: String,
    client: reqwest::Client,
}

impl MetaGraphClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "META_GRAPH_API_BASE".to_string(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn send(
        &self,
        credential: &IntegrationCredential,
        call: GraphCall,
    ) -> Result<Value, PlatformError> {
        let url = format!("{}/{}", self.base_url, call.path);
        let mut request = self
            .client
            .request(call.method, &url)
            .bearer_auth(credential.access_token().expose_secret());
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if !call.form.is_empty() {
            request = request.form(&call.form);
        }

        let response = request.send().await.map_err(|e| PlatformError::Transient {
            status: None,
            reason: e.without_url().to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PlatformError::Transient {
            status: Some(status.as_u16()),
            reason: format!("Failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| PlatformError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AdPlatform for MetaGraphClient {
    fn name(&self) -> &str {
        "meta"
    }

    async fn call(
        &self,
        credential: &IntegrationCredential,
        request: &PlatformRequest,
    ) -> Result<Value, PlatformError> {
        let call = build_call(credential.ad_account_id(), request);
        tracing::debug!(
            path = %call.path,
            method = %call.method,
            "Calling Graph API"
        );
        let body = self.send(credential, call).await?;
        shape_response(request, body)
    }
}

fn build_call(ad_account_id: &str, request: &PlatformRequest) -> GraphCall {
    match request {
        PlatformRequest::AccountInsights { range } => {
            let mut query = vec![
                ("fields", INSIGHTS_FIELDS.to_string()),
                ("level", "account".to_string()),
            ];
            query.push(range_param(range));
            GraphCall {
                method: Method::GET,
                path: format!("{ad_account_id}/insights"),
                query,
                form: Vec::new(),
            }
        }
        PlatformRequest::ListCampaigns { status, limit } => {
            let mut query = vec![
                ("fields", CAMPAIGN_FIELDS.to_string()),
                ("limit", limit.to_string()),
            ];
            if let Some(status) = status {
                query.push(("effective_status", json!([status.as_str()]).to_string()));
            }
            GraphCall {
                method: Method::GET,
                path: format!("{ad_account_id}/campaigns"),
                query,
                form: Vec::new(),
            }
        }
        PlatformRequest::CampaignInsights { campaign_id, range } => {
            let mut query = vec![(
                "fields",
                format!("campaign_id,campaign_name,{INSIGHTS_FIELDS}"),
            )];
            query.push(range_param(range));
            GraphCall {
                method: Method::GET,
                path: format!("{campaign_id}/insights"),
                query,
                form: Vec::new(),
            }
        }
        PlatformRequest::UpdateCampaignStatus {
            campaign_id,
            status,
        } => GraphCall {
            method: Method::POST,
            path: campaign_id.clone(),
            query: Vec::new(),
            form: vec![("status", status.as_str().to_string())],
        },
    }
}

fn range_param(range: &InsightsRange) -> (&'static str, String) {
    match range {
        InsightsRange::Preset(preset) => ("date_preset", (*preset).to_string()),
        InsightsRange::Day(day) => {
            let day = day.format("%Y-%m-%d").to_string();
            ("time_range", json!({ "since": day, "until": day }).to_string())
        }
    }
}

/// Turn a raw Graph body into the tool result the agent sees.
fn shape_response(request: &PlatformRequest, body: Value) -> Result<Value, PlatformError> {
    match request {
        PlatformRequest::AccountInsights { .. } | PlatformRequest::CampaignInsights { .. } => {
            let rows = data_rows(&body)?;
            Ok(match rows.first() {
                Some(row) => normalize_metrics(row),
                None => json!({ "no_data": true }),
            })
        }
        PlatformRequest::ListCampaigns { .. } => {
            let rows = data_rows(&body)?;
            Ok(json!({ "count": rows.len(), "campaigns": rows }))
        }
        PlatformRequest::UpdateCampaignStatus {
            campaign_id,
            status,
        } => Ok(json!({
            "campaign_id": campaign_id,
            "status": status.as_str(),
            "success": body.get("success").and_then(Value::as_bool).unwrap_or(false),
        })),
    }
}

fn data_rows(body: &Value) -> Result<Vec<Value>, PlatformError> {
    body.get("data")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| PlatformError::InvalidResponse("missing `data` array".to_string()))
}

/// Convert the decimal-string metrics in an insights row to JSON numbers.
fn normalize_metrics(row: &Value) -> Value {
    let Some(object) = row.as_object() else {
        return row.clone();
    };
    let mut out = object.clone();
    for field in NUMERIC_FIELDS {
        let Some(Value::String(raw)) = out.get(*field) else {
            continue;
        };
        let number = if let Ok(int) = raw.parse::<i64>() {
            Some(Value::from(int))
        } else {
            raw.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        };
        if let Some(number) = number {
            out.insert((*field).to_string(), number);
        }
    }
    Value::Object(out)
}

/// Map a non-2xx Graph response to a [`PlatformError`].
fn classify_error(status: u16, body: &str) -> PlatformError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == 401 || code.is_some_and(|c| AUTH_ERROR_CODES.contains(&c)) {
        return PlatformError::Unauthorized { reason: message };
    }
    if status == 429 || status >= 500 || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c)) {
        return PlatformError::Transient {
            status: Some(status),
            reason: message,
        };
    }
    PlatformError::Rejected {
        status,
        reason: message,
    }
}
