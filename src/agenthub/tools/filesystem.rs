//! Workspace-scoped file editing.
//!
//! The `file_edit` tool reads, writes, appends, and performs exact string
//! replacement on files inside the conversation workspace. Every path goes
//! through [`Workspace::resolve`], so traversal outside the workspace root
//! is rejected before any IO happens.

use crate::agenthub::tool::{
    Action, FileEdit, Observation, ToolDefinition, ToolError, ToolExecutor,
};
use crate::agenthub::workspace::Workspace;
use async_trait::async_trait;
use tokio::fs;

/// Cap on file sizes the tool will read back to the LLM.
const MAX_READ_BYTES: u64 = 1024 * 1024;

pub struct FileEditExecutor;

impl FileEditExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileEditExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for FileEditExecutor {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_edit".to_string(),
            description: "Read, write, append, or string-replace a file in the workspace."
                .to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the workspace root"
                    },
                    "edit": {
                        "type": "string",
                        "enum": ["read", "write", "append", "str_replace"],
                        "description": "The operation to perform"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content for write/append operations"
                    },
                    "old": {
                        "type": "string",
                        "description": "Exact text to replace (str_replace)"
                    },
                    "new": {
                        "type": "string",
                        "description": "Replacement text (str_replace)"
                    }
                },
                "required": ["path", "edit"]
            }),
        }
    }

    async fn execute(
        &self,
        action: &Action,
        workspace: &Workspace,
    ) -> Result<Observation, ToolError> {
        let Action::FileEdit { path, edit } = action else {
            return Err(ToolError::InvalidParameters(
                "file_edit executor received a non-file action".to_string(),
            ));
        };
        let resolved = workspace
            .resolve(path)
            .map_err(|err| ToolError::InvalidParameters(err.to_string()))?;

        let outcome = match edit {
            FileEdit::Read => {
                let metadata = fs::metadata(&resolved)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                if metadata.len() > MAX_READ_BYTES {
                    return Err(ToolError::ExecutionFailed(format!(
                        "{} is {} bytes, larger than the {} byte read limit",
                        path,
                        metadata.len(),
                        MAX_READ_BYTES
                    )));
                }
                fs::read_to_string(&resolved)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?
            }
            FileEdit::Write { content } => {
                if let Some(parent) = resolved.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                }
                fs::write(&resolved, content)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                format!("Wrote {} bytes to {}", content.len(), path)
            }
            FileEdit::Append { content } => {
                let mut existing = match fs::read_to_string(&resolved).await {
                    Ok(text) => text,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(err) => return Err(ToolError::ExecutionFailed(err.to_string())),
                };
                existing.push_str(content);
                fs::write(&resolved, &existing)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                format!("Appended {} bytes to {}", content.len(), path)
            }
            FileEdit::StrReplace { old, new } => {
                let text = fs::read_to_string(&resolved)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                let occurrences = text.matches(old.as_str()).count();
                if occurrences == 0 {
                    return Err(ToolError::ExecutionFailed(format!(
                        "text to replace not found in {}",
                        path
                    )));
                }
                if occurrences > 1 {
                    return Err(ToolError::ExecutionFailed(format!(
                        "text to replace appears {} times in {}; it must be unique",
                        occurrences, path
                    )));
                }
                let replaced = text.replacen(old.as_str(), new, 1);
                fs::write(&resolved, &replaced)
                    .await
                    .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                format!("Replaced 1 occurrence in {}", path)
            }
        };

        Ok(Observation::FileEdit {
            path: path.clone(),
            message: outcome,
            is_error: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().to_path_buf());
        (dir, workspace)
    }

    fn edit(path: &str, edit: FileEdit) -> Action {
        Action::FileEdit {
            path: path.to_string(),
            edit,
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, workspace) = workspace();
        let executor = FileEditExecutor::new();
        executor
            .execute(
                &edit(
                    "notes.txt",
                    FileEdit::Write {
                        content: "hello".to_string(),
                    },
                ),
                &workspace,
            )
            .await
            .unwrap();

        let observation = executor
            .execute(&edit("notes.txt", FileEdit::Read), &workspace)
            .await
            .unwrap();
        let Observation::FileEdit { message, .. } = observation else {
            panic!("expected file observation");
        };
        assert_eq!(message, "hello");
    }

    #[tokio::test]
    async fn append_creates_missing_file() {
        let (dir, workspace) = workspace();
        let executor = FileEditExecutor::new();
        executor
            .execute(
                &edit(
                    "log.txt",
                    FileEdit::Append {
                        content: "line\n".to_string(),
                    },
                ),
                &workspace,
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "line\n"
        );
    }

    #[tokio::test]
    async fn str_replace_requires_unique_match() {
        let (dir, workspace) = workspace();
        std::fs::write(dir.path().join("src.txt"), "aaa bbb aaa").unwrap();
        let executor = FileEditExecutor::new();

        let ambiguous = executor
            .execute(
                &edit(
                    "src.txt",
                    FileEdit::StrReplace {
                        old: "aaa".to_string(),
                        new: "ccc".to_string(),
                    },
                ),
                &workspace,
            )
            .await;
        assert!(matches!(ambiguous, Err(ToolError::ExecutionFailed(_))));

        executor
            .execute(
                &edit(
                    "src.txt",
                    FileEdit::StrReplace {
                        old: "bbb".to_string(),
                        new: "ccc".to_string(),
                    },
                ),
                &workspace,
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src.txt")).unwrap(),
            "aaa ccc aaa"
        );
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, workspace) = workspace();
        let executor = FileEditExecutor::new();
        let result = executor
            .execute(&edit("../../etc/passwd", FileEdit::Read), &workspace)
            .await;
        assert!(matches!(result, Err(ToolError::InvalidParameters(_))));
    }
}
