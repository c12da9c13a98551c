//! Binds the tool catalogue to one tenant's credential.
//!
//! A [`ToolSet`] is built once per session. Every [`BoundTool`] in it holds
//! the same `Arc<IntegrationCredential>`; callers pass only the model's
//! arguments, so a call can never reach another tenant's account.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{PlatformError, ToolError};
use crate::llm::ToolDefinition;
use crate::platform::AdPlatform;
use crate::retry::RetryPolicy;
use crate::safety::LeakDetector;
use crate::tenant::IntegrationCredential;
use crate::tools::tool::AdTool;

/// Produces per-session tool sets.
pub struct ToolBinder {
    platform: Arc<dyn AdPlatform>,
    retry: RetryPolicy,
}

impl ToolBinder {
    pub fn new(platform: Arc<dyn AdPlatform>, retry: RetryPolicy) -> Self {
        Self { platform, retry }
    }

    /// Close every tool over `credential`. The credential is moved in and
    /// dropped with the returned set.
    pub fn bind(&self, credential: IntegrationCredential) -> ToolSet {
        let leak = Arc::new(LeakDetector::new().with_secret(credential.access_token()));
        let ad_account_id = credential.ad_account_id().to_string();
        let credential = Arc::new(credential);

        let tools = AdTool::ALL
            .into_iter()
            .map(|kind| BoundTool {
                kind,
                credential: Arc::clone(&credential),
                platform: Arc::clone(&self.platform),
                retry: self.retry.clone(),
                leak: Arc::clone(&leak),
            })
            .collect();

        ToolSet {
            tools,
            ad_account_id,
            leak,
        }
    }
}

/// One tool with its credential captured.
pub struct BoundTool {
    kind: AdTool,
    credential: Arc<IntegrationCredential>,
    platform: Arc<dyn AdPlatform>,
    retry: RetryPolicy,
    leak: Arc<LeakDetector>,
}

impl BoundTool {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn definition(&self) -> ToolDefinition {
        self.kind.definition()
    }

    /// Validate arguments, call the platform with bounded retries, and scrub
    /// the outcome.
    pub async fn execute(&self, arguments: &Value) -> Result<Value, ToolError> {
        let name = self.kind.name();
        let request = self.kind.parse_request(arguments)?;
        if request.is_mutation() {
            tracing::info!(
                tool = name,
                ad_account = self.credential.ad_account_id(),
                request = ?request,
                "Applying change to ad account"
            );
        }

        let request = &request;
        let result = self
            .retry
            .execute(name, PlatformError::is_transient, || async move {
                self.platform
                    .call(&self.credential, request)
                    .await
                    .map_err(|e| self.scrub_error(e))
            })
            .await;

        match result {
            Ok(value) => Ok(self.leak.scrub_json(&value)),
            Err(PlatformError::Unauthorized { reason }) => {
                tracing::warn!(
                    tool = name,
                    platform = self.platform.name(),
                    reason = %reason,
                    "Platform rejected credential"
                );
                Err(ToolError::CredentialExpired {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(ToolError::ExecutionFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn scrub_error(&self, error: PlatformError) -> PlatformError {
        match error {
            PlatformError::Unauthorized { reason } => PlatformError::Unauthorized {
                reason: self.leak.scrub(&reason),
            },
            PlatformError::Transient { status, reason } => PlatformError::Transient {
                status,
                reason: self.leak.scrub(&reason),
            },
            PlatformError::Rejected { status, reason } => PlatformError::Rejected {
                status,
                reason: self.leak.scrub(&reason),
            },
            PlatformError::InvalidResponse(reason) => {
                PlatformError::InvalidResponse(self.leak.scrub(&reason))
            }
        }
    }
}

/// The closed set of tools bound for one session.
pub struct ToolSet {
    tools: Vec<BoundTool>,
    ad_account_id: String,
    leak: Arc<LeakDetector>,
}

impl ToolSet {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(BoundTool::definition).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(BoundTool::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&BoundTool> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Ad account every tool in this set is bound to.
    pub fn ad_account_id(&self) -> &str {
        &self.ad_account_id
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        match self.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => Err(ToolError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }

    /// Scrub this session's secret (and generic token shapes) from text.
    pub fn scrub(&self, text: &str) -> String {
        self.leak.scrub(text)
    }

    pub fn scrub_json(&self, value: &Value) -> Value {
        self.leak.scrub_json(value)
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("ad_account_id", &self.ad_account_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{InsightsRange, PlatformRequest};
    use crate::testing::{RecordingPlatform, credential};
    use serde_json::json;
    use std::time::Duration;

    fn binder(platform: Arc<RecordingPlatform>) -> ToolBinder {
        ToolBinder::new(platform, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn bind_exposes_full_catalogue() {
        let platform = Arc::new(RecordingPlatform::new());
        let set = binder(platform).bind(credential("tok-a", "act_1"));
        assert_eq!(set.len(), AdTool::ALL.len());
        assert_eq!(set.ad_account_id(), "act_1");
        assert!(set.get("get_metrics").is_some());
        let dbg = format!("{set:?}");
        assert!(!dbg.contains("tok-a"));
    }

    #[tokio::test]
    async fn tools_use_only_their_own_credential() {
        let platform = Arc::new(RecordingPlatform::new());
        let binder = binder(Arc::clone(&platform));

        // Interleave creation and invocation across tenants.
        let set_a = binder.bind(credential("tok-a", "act_1"));
        let set_b = binder.bind(credential("tok-b", "act_2"));
        set_b
            .execute("get_metrics", &json!({"date": "yesterday"}))
            .await
            .unwrap();
        let set_c = binder.bind(credential("tok-c", "act_3"));
        set_a
            .execute("list_campaigns", &json!({}))
            .await
            .unwrap();
        set_c
            .execute("get_metrics", &json!({"date": "today"}))
            .await
            .unwrap();
        set_a
            .execute("get_metrics", &json!({"date": "today"}))
            .await
            .unwrap();

        let calls = platform.calls();
        assert_eq!(calls.len(), 4);
        for call in &calls {
            let expected = match call.ad_account_id.as_str() {
                "act_1" => "tok-a",
                "act_2" => "tok-b",
                "act_3" => "tok-c",
                other => panic!("unexpected account {other}"),
            };
            assert_eq!(call.token, expected);
        }
        assert_eq!(calls[0].ad_account_id, "act_2");
        assert_eq!(calls[1].ad_account_id, "act_1");
    }

    #[tokio::test]
    async fn invalid_args_never_reach_the_platform() {
        let platform = Arc::new(RecordingPlatform::new());
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));

        let err = set
            .execute("get_metrics", &json!({"date": "someday"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
        assert_eq!(platform.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let platform = Arc::new(RecordingPlatform::new());
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));
        let err = set.execute("drop_table", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
        assert_eq!(platform.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_succeed() {
        let platform = Arc::new(RecordingPlatform::new());
        platform.fail_next([
            PlatformError::Transient {
                status: Some(503),
                reason: "unavailable".into(),
            },
            PlatformError::Transient {
                status: None,
                reason: "timeout".into(),
            },
        ]);
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));

        let value = set
            .execute("get_metrics", &json!({"date": "yesterday"}))
            .await
            .unwrap();
        assert_eq!(value["clicks"], 42);
        assert_eq!(platform.call_count(), 3);
    }

    #[tokio::test]
    async fn transient_retries_are_bounded() {
        let platform = Arc::new(RecordingPlatform::new());
        platform.fail_next((0..10).map(|_| PlatformError::Transient {
            status: Some(500),
            reason: "boom".into(),
        }));
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));

        let err = set
            .execute("get_metrics", &json!({"date": "yesterday"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert_eq!(platform.call_count(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let platform = Arc::new(RecordingPlatform::new());
        platform.fail_next([PlatformError::Unauthorized {
            reason: "Session has expired".into(),
        }]);
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));

        let err = set
            .execute("get_metrics", &json!({"date": "yesterday"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CredentialExpired { .. }));
        assert!(err.is_terminal());
        assert_eq!(platform.call_count(), 1);
    }

    #[tokio::test]
    async fn results_and_errors_are_scrubbed() {
        let platform = Arc::new(RecordingPlatform::with_responder(|token, _request| {
            Ok(json!({"echo": format!("called with {token}")}))
        }));
        let set = binder(Arc::clone(&platform)).bind(credential("tok-secret-1", "act_1"));
        let value = set.execute("list_campaigns", &json!({})).await.unwrap();
        assert_eq!(value["echo"], "called with [REDACTED]");

        platform.fail_next([PlatformError::Rejected {
            status: 400,
            reason: "bad request for tok-secret-1".into(),
        }]);
        let err = set.execute("list_campaigns", &json!({})).await.unwrap_err();
        assert!(!err.to_string().contains("tok-secret-1"));
    }

    #[tokio::test]
    async fn platform_receives_typed_request() {
        let platform = Arc::new(RecordingPlatform::new());
        let set = binder(Arc::clone(&platform)).bind(credential("tok", "act_1"));
        set.execute("get_metrics", &json!({"date": "yesterday"}))
            .await
            .unwrap();
        assert_eq!(
            platform.calls()[0].request,
            PlatformRequest::AccountInsights {
                range: InsightsRange::Preset("yesterday")
            }
        );
    }
}
