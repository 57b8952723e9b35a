//! Built-in tool executors.

pub mod bash;
pub mod filesystem;
pub mod finish;

pub use bash::{BashError, BashExecutor, BashResult, BashRunner};
pub use filesystem::FileEditExecutor;
pub use finish::FinishExecutor;

use crate::agenthub::tool::ToolRegistry;
use std::sync::Arc;

/// Registry with every built-in executor, as wired by the composition root.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BashExecutor::default()));
    registry.register(Arc::new(FileEditExecutor::default()));
    registry.register(Arc::new(FinishExecutor::default()));
    registry
}
