//! Tool abstraction layer: action/observation payloads, executor trait, and
//! the registry conversations resolve tool calls through.
//!
//! # Architecture
//!
//! ```text
//! LLM response ──► Action (tagged union)
//!                     │
//!                     ▼
//!            ToolRegistry ──► ToolExecutor ──► Observation (tagged union)
//! ```
//!
//! [`Action`] and [`Observation`] are sealed sum types keyed by a string
//! discriminator so that events round-trip losslessly through JSON. Tool
//! calls for executors this crate does not know about are carried by the
//! `Custom` variants instead of being dropped, which lets out-of-tree
//! executors participate in the same event log.
//!
//! The registry is created once by the composition root and handed to every
//! conversation as a dependency; nothing here relies on ambient globals.

use crate::agenthub::event::ContentBlock;
use crate::agenthub::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Name of the terminal tool. A single-action batch calling this tool
/// bypasses confirmation mode and finishes the conversation.
pub const FINISH_TOOL: &str = "finish";

/// Provider-agnostic tool schema passed to the LLM along with a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the API `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Parsed tool arguments, one variant per built-in executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Bash {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        cwd: Option<String>,
    },
    FileEdit {
        path: String,
        #[serde(flatten)]
        edit: FileEdit,
    },
    Finish {
        message: String,
    },
    /// Arguments for a tool this crate has no schema for. Kept verbatim so
    /// the event round-trips.
    Custom {
        tool: String,
        args: serde_json::Value,
    },
}

impl Action {
    /// Parse the raw JSON arguments of a tool call into an [`Action`].
    ///
    /// Unknown tool names fall back to [`Action::Custom`] rather than
    /// failing, so the registry decides whether the call is executable.
    pub fn from_tool_call(tool_name: &str, args: serde_json::Value) -> Result<Action, ToolError> {
        match tool_name {
            "bash" => serde_json::from_value(with_kind(args, "bash"))
                .map_err(|e| ToolError::InvalidParameters(e.to_string())),
            "file_edit" => serde_json::from_value(with_kind(args, "file_edit"))
                .map_err(|e| ToolError::InvalidParameters(e.to_string())),
            FINISH_TOOL => serde_json::from_value(with_kind(args, "finish"))
                .map_err(|e| ToolError::InvalidParameters(e.to_string())),
            other => Ok(Action::Custom {
                tool: other.to_string(),
                args,
            }),
        }
    }
}

/// Inject the serde discriminator into raw tool-call arguments.
fn with_kind(mut args: serde_json::Value, kind: &str) -> serde_json::Value {
    if let Some(map) = args.as_object_mut() {
        map.insert("kind".to_string(), serde_json::Value::String(kind.to_string()));
        args
    } else if args.is_null() {
        serde_json::json!({ "kind": kind })
    } else {
        args
    }
}

/// The concrete mutation a `file_edit` action performs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum FileEdit {
    Read,
    Write { content: String },
    Append { content: String },
    StrReplace { old: String, new: String },
}

/// Tool results, one variant per built-in executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Bash {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        #[serde(default)]
        timeout_occurred: bool,
        #[serde(default)]
        is_error: bool,
    },
    FileEdit {
        path: String,
        message: String,
        #[serde(default)]
        is_error: bool,
    },
    Finish {
        message: String,
    },
    Custom {
        tool: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl Observation {
    pub fn is_error(&self) -> bool {
        match self {
            Observation::Bash { is_error, .. } => *is_error,
            Observation::FileEdit { is_error, .. } => *is_error,
            Observation::Finish { .. } => false,
            Observation::Custom { is_error, .. } => *is_error,
        }
    }

    /// Render the observation as content blocks for the LLM.
    pub fn to_llm_content(&self) -> Vec<ContentBlock> {
        let text = match self {
            Observation::Bash {
                stdout,
                stderr,
                exit_code,
                timeout_occurred,
                ..
            } => {
                let mut text = String::new();
                if !stdout.is_empty() {
                    text.push_str(stdout);
                }
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[stderr]\n");
                    text.push_str(stderr);
                }
                if *timeout_occurred {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[command timed out]");
                }
                match exit_code {
                    Some(code) => {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(&format!("[exit code {}]", code));
                    }
                    None => {}
                }
                text
            }
            Observation::FileEdit { message, .. } => message.clone(),
            Observation::Finish { message } => message.clone(),
            Observation::Custom { output, .. } => match output.as_str() {
                Some(s) => s.to_string(),
                None => output.to_string(),
            },
        };
        vec![ContentBlock::Text { text }]
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation or deserialization.
    InvalidParameters(String),
    /// Tool execution exceeded its deadline.
    Timeout(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::Timeout(msg) => write!(f, "Tool timed out: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Trait implemented by every tool executor.
///
/// Executors are stateless with respect to conversations: every call receives
/// the calling conversation's [`Workspace`] so file operations stay scoped.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schema advertised to the LLM for this tool.
    fn definition(&self) -> ToolDefinition;

    /// Execute one action and translate the outcome into an observation.
    ///
    /// Application level failures should be reported as an observation with
    /// `is_error` set rather than an `Err`; `Err` is reserved for scaffold
    /// failures (invalid parameters, missing tool, executor crash).
    async fn execute(
        &self,
        action: &Action,
        workspace: &Workspace,
    ) -> Result<Observation, ToolError>;
}

/// Registry mapping tool names to executors.
///
/// Built once at startup by the composition root and shared by every
/// conversation through an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own advertised name.
    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        let name = executor.definition().name;
        self.executors.insert(name, executor);
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(tool_name).cloned()
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.executors.contains_key(tool_name)
    }

    /// Definitions for every registered tool, sorted by name so the schema
    /// order sent to the LLM is deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|executor| executor.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions restricted to the given tool names. Unknown names are
    /// skipped.
    pub fn definitions_for(&self, tool_names: &[String]) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = tool_names
            .iter()
            .filter_map(|name| self.executors.get(name))
            .map(|executor| executor.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a named tool against the given workspace.
    pub async fn execute(
        &self,
        tool_name: &str,
        action: &Action,
        workspace: &Workspace,
    ) -> Result<Observation, ToolError> {
        let executor = self
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        executor.execute(action, workspace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_action_round_trips() {
        let action = Action::Bash {
            command: "ls -la".to_string(),
            timeout_secs: Some(30),
            cwd: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "bash");
        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn unknown_tool_parses_as_custom() {
        let args = serde_json::json!({"query": "rust"});
        let action = Action::from_tool_call("web_search", args.clone()).unwrap();
        assert_eq!(
            action,
            Action::Custom {
                tool: "web_search".to_string(),
                args,
            }
        );
    }

    #[test]
    fn finish_action_parses_from_raw_args() {
        let action =
            Action::from_tool_call("finish", serde_json::json!({"message": "done"})).unwrap();
        assert_eq!(
            action,
            Action::Finish {
                message: "done".to_string()
            }
        );
    }

    #[test]
    fn invalid_bash_args_are_rejected() {
        let err = Action::from_tool_call("bash", serde_json::json!({"cmd": "ls"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[test]
    fn observation_llm_content_includes_streams() {
        let obs = Observation::Bash {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: Some(1),
            timeout_occurred: false,
            is_error: true,
        };
        let blocks = obs.to_llm_content();
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected text block");
        };
        assert!(text.contains("out"));
        assert!(text.contains("[stderr]"));
        assert!(text.contains("[exit code 1]"));
    }

    #[test]
    fn registry_definitions_are_sorted() {
        struct Named(&'static str);

        #[async_trait]
        impl ToolExecutor for Named {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: self.0.to_string(),
                    description: String::new(),
                    parameters_schema: serde_json::json!({}),
                }
            }

            async fn execute(
                &self,
                _action: &Action,
                _workspace: &Workspace,
            ) -> Result<Observation, ToolError> {
                Err(ToolError::ExecutionFailed("unused".to_string()))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
