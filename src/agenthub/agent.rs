//! The agent behind a conversation: prompt, LLM, tools, condenser.
//!
//! An [`Agent`] owns no conversation state. It renders views into provider
//! requests, parses responses into message or action prototypes, and runs
//! individual tool executions. The surrounding event service decides when to
//! step, appends the resulting events, and enforces confirmation mode; the
//! split keeps everything here testable without a log or a step loop.

use crate::agenthub::condenser::Condenser;
use crate::agenthub::event::ContentBlock;
use crate::agenthub::llm::{view_to_messages, LlmClient, LlmError, LlmResponse};
use crate::agenthub::models::AgentSpec;
use crate::agenthub::retry::{retry_llm_call, RetryPolicy};
use crate::agenthub::state::SecurityRisk;
use crate::agenthub::tool::{Action, Observation, ToolDefinition, ToolError, ToolRegistry};
use crate::agenthub::view::View;
use crate::agenthub::workspace::Workspace;
use std::sync::Arc;

/// An action parsed from an LLM response, before it has been assigned an
/// event id. The event service turns these into `ActionEvent`s at append
/// time so ids stay monotonic under concurrent user input.
#[derive(Debug, Clone)]
pub struct ProtoAction {
    pub thought: Vec<ContentBlock>,
    pub reasoning_content: Option<String>,
    pub thinking_blocks: Vec<serde_json::Value>,
    pub action: Action,
    pub tool_name: String,
    pub tool_call_id: String,
    pub llm_response_id: String,
    pub security_risk: SecurityRisk,
}

/// What one LLM response asks the runtime to do next.
#[derive(Debug, Clone)]
pub enum ParsedResponse {
    /// Terminal assistant message with no tool calls.
    Message { content: Vec<ContentBlock> },
    /// One or more tool calls sharing the response id.
    Actions(Vec<ProtoAction>),
}

/// LLM-driven policy core shared by every step of one conversation.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    tool_names: Vec<String>,
    system_prompt: String,
    condenser: Option<Arc<dyn Condenser>>,
    retry_policy: RetryPolicy,
}

impl Agent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, spec: &AgentSpec) -> Self {
        Self {
            llm,
            tools,
            tool_names: spec.tools.clone(),
            system_prompt: spec.system_prompt.clone(),
            retry_policy: RetryPolicy::default(),
            condenser: None,
        }
    }

    /// Attach a condenser (builder pattern).
    pub fn with_condenser(mut self, condenser: Arc<dyn Condenser>) -> Self {
        self.condenser = Some(condenser);
        self
    }

    /// Override the LLM retry policy (builder pattern).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn condenser(&self) -> Option<&Arc<dyn Condenser>> {
        self.condenser.as_ref()
    }

    /// Tool schemas advertised to the LLM. An empty tool list on the agent
    /// spec means every registered tool.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        if self.tool_names.is_empty() {
            self.tools.definitions()
        } else {
            self.tools.definitions_for(&self.tool_names)
        }
    }

    /// One LLM round trip for the given view, with retry and backoff applied
    /// to transient failures.
    pub async fn complete(&self, view: &View) -> Result<LlmResponse, LlmError> {
        let messages = view_to_messages(view);
        let tools = self.tool_definitions();
        log::debug!(
            "requesting completion from {} ({} messages, {} tools)",
            self.llm.model_name(),
            messages.len(),
            tools.len()
        );
        retry_llm_call(&self.retry_policy, || self.llm.complete(&messages, &tools)).await
    }

    /// Interpret an LLM response as either a terminal message or a batch of
    /// actions.
    ///
    /// Tool arguments that fail to parse for a known tool degrade to
    /// [`Action::Custom`], so the failure surfaces as an error observation
    /// on execution instead of aborting the whole batch.
    pub fn parse_response(&self, response: &LlmResponse) -> ParsedResponse {
        if response.tool_calls.is_empty() {
            return ParsedResponse::Message {
                content: response.content.clone(),
            };
        }

        let mut protos = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let (arguments, security_risk) = split_security_risk(call.arguments.clone());
            let action = match Action::from_tool_call(&call.name, arguments.clone()) {
                Ok(action) => action,
                Err(err) => {
                    log::warn!(
                        "arguments for tool call {} ({}) did not parse: {}",
                        call.id,
                        call.name,
                        err
                    );
                    Action::Custom {
                        tool: call.name.clone(),
                        args: arguments,
                    }
                }
            };
            // The response's thought and reasoning are preserved on every
            // action of the batch; only the risk assessment is per call.
            protos.push(ProtoAction {
                thought: response.content.clone(),
                reasoning_content: response.reasoning_content.clone(),
                thinking_blocks: response.thinking_blocks.clone(),
                action,
                tool_name: call.name.clone(),
                tool_call_id: call.id.clone(),
                llm_response_id: response.response_id.clone(),
                security_risk,
            });
        }
        ParsedResponse::Actions(protos)
    }

    /// Execute one action against the conversation workspace.
    pub async fn execute_action(
        &self,
        tool_name: &str,
        action: &Action,
        workspace: &Workspace,
    ) -> Result<Observation, ToolError> {
        self.tools.execute(tool_name, action, workspace).await
    }
}

/// Pull the LLM-predicted `security_risk` field out of raw tool arguments.
/// Risk analysis is advisory metadata, not part of the tool's schema.
fn split_security_risk(mut arguments: serde_json::Value) -> (serde_json::Value, SecurityRisk) {
    let risk = arguments
        .as_object_mut()
        .and_then(|map| map.remove("security_risk"))
        .and_then(|value| serde_json::from_value::<SecurityRisk>(value).ok())
        .unwrap_or_default();
    (arguments, risk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenthub::llm::{LlmConfig, LlmMessage, LlmToolCall};
    use async_trait::async_trait;

    struct NoCallLlm;

    #[async_trait]
    impl LlmClient for NoCallLlm {
        async fn complete(
            &self,
            _messages: &[LlmMessage],
            _tools: &[ToolDefinition],
        ) -> Result<LlmResponse, LlmError> {
            Err(LlmError::Provider("not expected".to_string()))
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn agent() -> Agent {
        let spec = AgentSpec {
            llm: LlmConfig {
                model: "stub".to_string(),
                base_url: None,
                api_key: None,
                temperature: None,
                max_output_tokens: None,
            },
            tools: vec![],
            system_prompt: "be helpful".to_string(),
        };
        Agent::new(Arc::new(NoCallLlm), Arc::new(ToolRegistry::new()), &spec)
    }

    fn response_with_calls(calls: Vec<LlmToolCall>) -> LlmResponse {
        LlmResponse {
            response_id: "resp_1".to_string(),
            content: vec![ContentBlock::text("thinking aloud")],
            reasoning_content: Some("deep thoughts".to_string()),
            thinking_blocks: vec![],
            tool_calls: calls,
            usage: None,
        }
    }

    #[test]
    fn no_tool_calls_parse_as_terminal_message() {
        let parsed = agent().parse_response(&response_with_calls(vec![]));
        let ParsedResponse::Message { content } = parsed else {
            panic!("expected terminal message");
        };
        assert_eq!(content.len(), 1);
    }

    #[test]
    fn batch_preserves_thought_on_every_action() {
        let parsed = agent().parse_response(&response_with_calls(vec![
            LlmToolCall {
                id: "call_1".to_string(),
                name: "bash".to_string(),
                arguments: serde_json::json!({"command": "ls"}),
            },
            LlmToolCall {
                id: "call_2".to_string(),
                name: "bash".to_string(),
                arguments: serde_json::json!({"command": "pwd"}),
            },
        ]));
        let ParsedResponse::Actions(protos) = parsed else {
            panic!("expected actions");
        };
        assert_eq!(protos.len(), 2);
        assert!(protos.iter().all(|p| p.llm_response_id == "resp_1"));
        // Thought and reasoning are carried by every action of the batch,
        // not just the first.
        assert!(protos.iter().all(|p| !p.thought.is_empty()));
        assert!(protos.iter().all(|p| p.reasoning_content.is_some()));
        assert_eq!(protos[0].thought, protos[1].thought);
    }

    #[test]
    fn security_risk_is_extracted_from_arguments() {
        let parsed = agent().parse_response(&response_with_calls(vec![LlmToolCall {
            id: "call_1".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({"command": "rm -rf /", "security_risk": "HIGH"}),
        }]));
        let ParsedResponse::Actions(protos) = parsed else {
            panic!("expected actions");
        };
        assert_eq!(protos[0].security_risk, SecurityRisk::High);
        // The advisory field is stripped before action parsing.
        let Action::Bash { command, .. } = &protos[0].action else {
            panic!("expected bash action");
        };
        assert_eq!(command, "rm -rf /");
    }

    #[test]
    fn malformed_known_tool_arguments_degrade_to_custom() {
        let parsed = agent().parse_response(&response_with_calls(vec![LlmToolCall {
            id: "call_1".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({"nope": true}),
        }]));
        let ParsedResponse::Actions(protos) = parsed else {
            panic!("expected actions");
        };
        assert!(matches!(protos[0].action, Action::Custom { .. }));
    }
}
