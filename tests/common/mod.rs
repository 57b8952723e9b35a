//! Shared test harness: a scripted LLM client and conversation fixtures.
#![allow(dead_code)]

use agenthub::agenthub::event::ContentBlock;
use agenthub::agenthub::llm::{
    LlmClient, LlmClientFactory, LlmConfig, LlmError, LlmMessage, LlmResponse, LlmToolCall,
};
use agenthub::agenthub::models::{AgentSpec, SendMessageRequest, StartConversationRequest};
use agenthub::agenthub::state::{ConfirmationPolicy, ExecutionStatus, TokenUsage};
use agenthub::agenthub::tool::ToolDefinition;
use agenthub::ConversationService;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One scripted turn of the fake provider.
#[derive(Debug, Clone)]
pub enum Turn {
    /// Plain assistant message, i.e. a terminal response.
    Message(&'static str),
    /// A batch of tool calls issued in one response.
    ToolCalls(Vec<(&'static str, serde_json::Value)>),
    /// A transport failure.
    Fail(&'static str),
}

/// LLM double that plays back scripted turns in order.
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<Turn>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _messages: &[LlmMessage],
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = self
            .turns
            .lock()
            .await
            .pop_front()
            .unwrap_or(Turn::Message("script exhausted"));
        match turn {
            Turn::Message(text) => Ok(LlmResponse {
                response_id: format!("resp_{}", call_index),
                content: vec![ContentBlock::text(text)],
                reasoning_content: None,
                thinking_blocks: vec![],
                tool_calls: vec![],
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                }),
            }),
            Turn::ToolCalls(calls) => Ok(LlmResponse {
                response_id: format!("resp_{}", call_index),
                content: vec![ContentBlock::text("working on it")],
                reasoning_content: None,
                thinking_blocks: vec![],
                tool_calls: calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, arguments))| LlmToolCall {
                        id: format!("call_{}_{}", call_index, i),
                        name: name.to_string(),
                        arguments,
                    })
                    .collect(),
                usage: None,
            }),
            Turn::Fail(reason) => Err(LlmError::InvalidRequest(reason.to_string())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Factory that always hands out the same scripted client.
pub struct ScriptedFactory {
    pub client: Arc<ScriptedLlm>,
}

impl LlmClientFactory for ScriptedFactory {
    fn create(&self, _config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(self.client.clone())
    }
}

/// A conversation service rooted in a temp directory with a scripted LLM.
pub struct Fixture {
    pub service: Arc<ConversationService>,
    pub llm: Arc<ScriptedLlm>,
    _dir: tempfile::TempDir,
}

pub fn fixture(turns: Vec<Turn>) -> Fixture {
    fixture_with_webhooks(turns, vec![])
}

pub fn fixture_with_webhooks(
    turns: Vec<Turn>,
    webhooks: Vec<agenthub::agenthub::webhook::WebhookSpec>,
) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let llm = ScriptedLlm::new(turns);
    let service = Arc::new(ConversationService::new(
        dir.path().join("conversations"),
        dir.path().join("workspaces"),
        webhooks,
        None,
        Arc::new(ScriptedFactory {
            client: llm.clone(),
        }),
        Arc::new(agenthub::agenthub::tools::default_registry()),
    ));
    Fixture {
        service,
        llm,
        _dir: dir,
    }
}

pub fn start_request(
    confirmation_policy: ConfirmationPolicy,
    initial_message: Option<&str>,
) -> StartConversationRequest {
    StartConversationRequest {
        agent: AgentSpec {
            llm: LlmConfig {
                model: "scripted".to_string(),
                base_url: None,
                api_key: None,
                temperature: None,
                max_output_tokens: None,
            },
            tools: vec![],
            system_prompt: "You are a test agent.".to_string(),
        },
        confirmation_policy,
        max_iterations: 25,
        initial_message: initial_message.map(|text| SendMessageRequest {
            role: agenthub::agenthub::event::MessageRole::User,
            content: vec![ContentBlock::text(text)],
            run: true,
        }),
    }
}

/// Poll a conversation until it reaches `wanted` or the deadline passes.
pub async fn wait_for_status(
    service: &ConversationService,
    conversation_id: Uuid,
    wanted: ExecutionStatus,
) -> ExecutionStatus {
    let mut last = ExecutionStatus::Idle;
    for _ in 0..300 {
        if let Some(info) = service.get_conversation(conversation_id).await {
            last = info.status;
            if last == wanted {
                return last;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    last
}
