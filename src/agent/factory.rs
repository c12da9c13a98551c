//! Agent factory — builds a tenant-scoped agent from a business profile and
//! a bound tool set.

use std::sync::Arc;

use crate::error::{Error, LlmError};
use crate::llm::{ChatMessage, LlmProvider, StepRequest, StepResponse, ToolDefinition};
use crate::tenant::{BusinessProfile, TenantId};
use crate::tools::ToolSet;

const BASE_INSTRUCTIONS: &str = "\
You are AdGenius, an expert Meta Ads assistant working for one business.
You can read performance data and manage campaigns in the business's connected ad account using the tools provided.";

const GUIDELINES: &str = "\
# Guidelines
- Use tools to look up numbers; never invent metrics.
- Quote the figures you relied on and the date range they cover.
- Only change a campaign's status when the user has explicitly asked for it, and confirm what you changed.
- If a tool reports an error, explain it briefly and suggest a next step.
- Keep answers concise and tailored to the business profile above.";

/// Model sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// A configured, memory-less agent for one tenant.
pub struct Agent {
    tenant: TenantId,
    preamble: String,
    tools: Vec<ToolDefinition>,
    llm: Arc<dyn LlmProvider>,
    sampling: Sampling,
}

impl Agent {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Ask the model for the next step given a window of conversation.
    pub async fn next_step(&self, messages: &[ChatMessage]) -> Result<StepResponse, LlmError> {
        self.llm
            .next_step(StepRequest {
                preamble: &self.preamble,
                messages,
                tools: &self.tools,
                temperature: self.sampling.temperature,
                max_tokens: self.sampling.max_tokens,
            })
            .await
    }
}

/// Creates agents that share one language-model provider.
pub struct AgentFactory {
    llm: Arc<dyn LlmProvider>,
    sampling: Sampling,
}

impl AgentFactory {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            sampling: Sampling::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Build an agent for `tenant`. Fails if the profile lacks a business
    /// name or objective.
    pub fn create(
        &self,
        tenant: &TenantId,
        profile: &BusinessProfile,
        tools: &ToolSet,
    ) -> Result<Agent, Error> {
        let missing = profile.missing_fields();
        if !missing.is_empty() {
            return Err(Error::ProfileIncomplete {
                tenant: tenant.clone(),
                missing,
            });
        }

        Ok(Agent {
            tenant: tenant.clone(),
            preamble: build_preamble(profile, tools.ad_account_id()),
            tools: tools.definitions(),
            llm: Arc::clone(&self.llm),
            sampling: self.sampling,
        })
    }
}

/// Render the system preamble. Identical inputs give byte-identical output.
pub fn build_preamble(profile: &BusinessProfile, ad_account_id: &str) -> String {
    [
        BASE_INSTRUCTIONS.to_string(),
        profile.to_preamble_section(),
        format!("# Ad Account\nAll tools operate on ad account {ad_account_id}."),
        GUIDELINES.to_string(),
    ]
    .join("\n\n")
}
