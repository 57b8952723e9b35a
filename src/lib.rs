// src/lib.rs

// Import the top-level `agenthub` module.
pub mod agenthub;

// Re-exporting key items for easier external access.
pub use agenthub::config::{self, Config};
pub use agenthub::conversation_service::ConversationService;
pub use agenthub::event::{Event, EventId, SourceType};
pub use agenthub::event_service::EventService;
pub use agenthub::llm::{LlmClient, LlmClientFactory, LlmConfig};
pub use agenthub::server;
pub use agenthub::state::ExecutionStatus;
pub use agenthub::view::View;
