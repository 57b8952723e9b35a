//! The terminal `finish` tool.
//!
//! Calling it ends the run: the runtime appends the observation and moves
//! the conversation to FINISHED. A single-action batch calling `finish`
//! also bypasses confirmation mode, since there is nothing to protect the
//! user from.

use crate::agenthub::tool::{
    Action, Observation, ToolDefinition, ToolError, ToolExecutor, FINISH_TOOL,
};
use crate::agenthub::workspace::Workspace;
use async_trait::async_trait;

pub struct FinishExecutor;

impl FinishExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FinishExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for FinishExecutor {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: FINISH_TOOL.to_string(),
            description: "Signal that the task is complete, with a final message for the user."
                .to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Final message summarizing the outcome"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(
        &self,
        action: &Action,
        _workspace: &Workspace,
    ) -> Result<Observation, ToolError> {
        let Action::Finish { message } = action else {
            return Err(ToolError::InvalidParameters(
                "finish executor received a non-finish action".to_string(),
            ));
        };
        Ok(Observation::Finish {
            message: message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_echoes_its_message() {
        let workspace = Workspace::new(std::path::PathBuf::from("/tmp"));
        let observation = FinishExecutor::new()
            .execute(
                &Action::Finish {
                    message: "done".to_string(),
                },
                &workspace,
            )
            .await
            .unwrap();
        assert_eq!(
            observation,
            Observation::Finish {
                message: "done".to_string()
            }
        );
    }
}
