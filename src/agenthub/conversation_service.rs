//! Lifecycle management for many conversations.
//!
//! The [`ConversationService`] owns the conversation-id to [`EventService`]
//! map, loads stored conversations from disk on startup (removing corrupted
//! directories), wires the metadata-updating and webhook subscribers, and
//! tears everything down concurrently on shutdown. Event services never talk
//! to each other; all cross-conversation coordination happens here or in the
//! transport layer.

use crate::agenthub::agent::Agent;
use crate::agenthub::condenser::TruncationCondenser;
use crate::agenthub::error::ApiError;
use crate::agenthub::event::Event;
use crate::agenthub::event_service::EventService;
use crate::agenthub::llm::LlmClientFactory;
use crate::agenthub::models::{
    ConversationInfo, ConversationPage, ConversationSortOrder, StartConversationRequest,
};
use crate::agenthub::persist::{self, ConversationPaths};
use crate::agenthub::pub_sub::{ActivityHook, Subscriber};
use crate::agenthub::state::ExecutionStatus;
use crate::agenthub::tool::ToolRegistry;
use crate::agenthub::webhook::{WebhookSpec, WebhookSubscriber};
use crate::agenthub::workspace::Workspace;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Keeps `updated_at` fresh and the metadata file persisted as events flow,
/// and reports each append as server activity.
struct ConversationMetaSubscriber {
    service: Arc<EventService>,
    activity_hook: Option<ActivityHook>,
}

#[async_trait]
impl Subscriber<Event> for ConversationMetaSubscriber {
    async fn on_event(&self, _event: &Event) {
        self.service.touch().await;
        if let Some(hook) = &self.activity_hook {
            hook();
        }
    }
}

/// Service that stores conversations under a local directory tree. All
/// event services are loaded into memory on enter and closed on exit.
pub struct ConversationService {
    conversations_path: PathBuf,
    workspace_path: PathBuf,
    webhook_specs: Vec<WebhookSpec>,
    session_api_key: Option<String>,
    llm_factory: Arc<dyn LlmClientFactory>,
    tools: Arc<ToolRegistry>,
    activity_hook: Option<ActivityHook>,
    event_services: RwLock<HashMap<Uuid, Arc<EventService>>>,
}

impl ConversationService {
    pub fn new(
        conversations_path: PathBuf,
        workspace_path: PathBuf,
        webhook_specs: Vec<WebhookSpec>,
        session_api_key: Option<String>,
        llm_factory: Arc<dyn LlmClientFactory>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            conversations_path,
            workspace_path,
            webhook_specs,
            session_api_key,
            llm_factory,
            tools,
            activity_hook: None,
            event_services: RwLock::new(HashMap::new()),
        }
    }

    /// Install the callback invoked on every event append, across every
    /// conversation (builder pattern).
    pub fn with_activity_hook(mut self, hook: ActivityHook) -> Self {
        self.activity_hook = Some(hook);
        self
    }

    /// Scan the conversations directory and load every stored conversation.
    /// Directories whose metadata cannot be read are removed.
    pub async fn load(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.conversations_path)?;
        let mut loaded = HashMap::new();
        for entry in std::fs::read_dir(&self.conversations_path)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            match self.load_one(&entry.path()).await {
                Ok((id, service)) => {
                    loaded.insert(id, service);
                }
                Err(err) => {
                    log::error!(
                        "error loading conversation from {:?}; removing it: {}",
                        entry.path(),
                        err
                    );
                    let _ = std::fs::remove_dir_all(entry.path());
                }
            }
        }
        log::info!("loaded {} stored conversations", loaded.len());
        *self.event_services.write().await = loaded;
        Ok(())
    }

    async fn load_one(
        &self,
        dir: &std::path::Path,
    ) -> Result<(Uuid, Arc<EventService>), Box<dyn std::error::Error + Send + Sync>> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or("unreadable directory name")?;
        let id = Uuid::parse_str(name)?;
        let stored: crate::agenthub::models::StoredConversation =
            persist::read_json(&dir.join("meta.json"))?;
        let service = self.build_event_service(stored).await?;
        Ok((id, service))
    }

    /// Construct an event service and wire its standing subscribers.
    async fn build_event_service(
        &self,
        stored: crate::agenthub::models::StoredConversation,
    ) -> Result<Arc<EventService>, Box<dyn std::error::Error + Send + Sync>> {
        let id = stored.id;
        let llm = self.llm_factory.create(&stored.agent.llm)?;
        let agent = Agent::new(llm, self.tools.clone(), &stored.agent)
            .with_condenser(Arc::new(TruncationCondenser::default()));
        let paths = ConversationPaths::new(&self.conversations_path, id);
        let workspace = Workspace::new(self.workspace_path.join(id.simple().to_string()));
        let service = EventService::new(stored, paths, workspace, agent)?;

        service
            .subscribe_to_events(Arc::new(ConversationMetaSubscriber {
                service: service.clone(),
                activity_hook: self.activity_hook.clone(),
            }))
            .await;
        for spec in &self.webhook_specs {
            service
                .subscribe_to_events(Arc::new(WebhookSubscriber::new(
                    spec.clone(),
                    self.session_api_key.clone(),
                )))
                .await;
        }
        Ok(service)
    }

    // Reads

    pub async fn get_event_service(&self, conversation_id: Uuid) -> Option<Arc<EventService>> {
        self.event_services.read().await.get(&conversation_id).cloned()
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Option<ConversationInfo> {
        let service = self.get_event_service(conversation_id).await?;
        Some(service.info().await)
    }

    pub async fn search_conversations(
        &self,
        page_id: Option<&str>,
        limit: usize,
        status: Option<ExecutionStatus>,
        sort_order: ConversationSortOrder,
    ) -> Result<ConversationPage, ApiError> {
        let services: Vec<Arc<EventService>> = {
            let guard = self.event_services.read().await;
            guard.values().cloned().collect()
        };

        let mut all: Vec<ConversationInfo> = Vec::with_capacity(services.len());
        for service in services {
            let info = service.info().await;
            if let Some(wanted) = status {
                if info.status != wanted {
                    continue;
                }
            }
            all.push(info);
        }

        match sort_order {
            ConversationSortOrder::CreatedAt => {
                all.sort_by_key(|info| info.stored.created_at);
            }
            ConversationSortOrder::CreatedAtDesc => {
                all.sort_by_key(|info| std::cmp::Reverse(info.stored.created_at));
            }
            ConversationSortOrder::UpdatedAt => {
                all.sort_by_key(|info| info.stored.updated_at);
            }
            ConversationSortOrder::UpdatedAtDesc => {
                all.sort_by_key(|info| std::cmp::Reverse(info.stored.updated_at));
            }
        }

        let start = match page_id {
            None => 0,
            Some(cursor) => {
                let cursor_id = Uuid::parse_str(cursor)
                    .map_err(|_| ApiError::Validation(format!("invalid page cursor: {}", cursor)))?;
                all.iter()
                    .position(|info| info.stored.id == cursor_id)
                    .ok_or_else(|| {
                        ApiError::Validation(format!("invalid page cursor: {}", cursor))
                    })?
            }
        };

        let items: Vec<ConversationInfo> = all.iter().skip(start).take(limit).cloned().collect();
        let next_page_id = all
            .get(start + items.len())
            .map(|info| info.stored.id.simple().to_string());
        Ok(ConversationPage {
            items,
            next_page_id,
        })
    }

    pub async fn count_conversations(&self, status: Option<ExecutionStatus>) -> usize {
        let services: Vec<Arc<EventService>> = {
            let guard = self.event_services.read().await;
            guard.values().cloned().collect()
        };
        match status {
            None => services.len(),
            Some(wanted) => {
                let mut count = 0;
                for service in services {
                    if service.get_status().await == wanted {
                        count += 1;
                    }
                }
                count
            }
        }
    }

    pub async fn batch_get_conversations(
        &self,
        conversation_ids: &[Uuid],
    ) -> Vec<Option<ConversationInfo>> {
        let mut results = Vec::with_capacity(conversation_ids.len());
        for id in conversation_ids {
            results.push(self.get_conversation(*id).await);
        }
        results
    }

    // Writes

    /// Create a new conversation, start its step loop, and send the initial
    /// message if one was supplied.
    pub async fn start_conversation(
        &self,
        request: StartConversationRequest,
    ) -> Result<ConversationInfo, ApiError> {
        let id = Uuid::new_v4();
        let stored = crate::agenthub::models::StoredConversation::new(id, request);
        let initial_message = stored.initial_message.clone();

        let paths = ConversationPaths::new(&self.conversations_path, id);
        paths.create_dirs().map_err(ApiError::from)?;
        persist::write_json_atomic(&paths.meta_file(), &stored).map_err(ApiError::from)?;

        let service = self
            .build_event_service(stored)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        self.event_services.write().await.insert(id, service.clone());

        service.start().await?;
        if let Some(message) = initial_message {
            service
                .send_message(message.role, message.content, message.run)
                .await?;
        }
        Ok(service.info().await)
    }

    pub async fn pause_conversation(&self, conversation_id: Uuid) -> Result<(), ApiError> {
        let service = self
            .get_event_service(conversation_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))?;
        service.pause().await
    }

    pub async fn resume_conversation(&self, conversation_id: Uuid) -> Result<(), ApiError> {
        let service = self
            .get_event_service(conversation_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))?;
        service.start().await
    }

    /// Close a conversation and remove its persistence and workspace trees.
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<(), ApiError> {
        let service = self
            .event_services
            .write()
            .await
            .remove(&conversation_id)
            .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))?;
        service.close().await;

        let paths = ConversationPaths::new(&self.conversations_path, conversation_id);
        paths.remove_all().map_err(ApiError::from)?;
        let workspace_dir = self
            .workspace_path
            .join(conversation_id.simple().to_string());
        if workspace_dir.exists() {
            std::fs::remove_dir_all(&workspace_dir).map_err(ApiError::from)?;
        }
        Ok(())
    }

    /// Stop every conversation concurrently: step loops stop, webhook
    /// subscribers flush, metadata persists.
    pub async fn close(&self) {
        let services: Vec<Arc<EventService>> = {
            let mut guard = self.event_services.write().await;
            guard.drain().map(|(_, service)| service).collect()
        };
        log::info!("closing {} conversations", services.len());
        join_all(services.iter().map(|service| service.close())).await;
    }
}
