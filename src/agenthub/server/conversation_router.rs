//! REST endpoints for conversation lifecycle and listings.

use crate::agenthub::error::ApiError;
use crate::agenthub::models::{
    ConversationInfo, ConversationPage, ConversationSortOrder, StartConversationRequest, Success,
};
use crate::agenthub::server::AppState;
use crate::agenthub::state::ExecutionStatus;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

/// Page size cap shared by every listing endpoint.
pub const MAX_PAGE_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations/search", get(search_conversations))
        .route("/conversations/count", get(count_conversations))
        .route(
            "/conversations/{conversation_id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route(
            "/conversations",
            get(batch_get_conversations).post(start_conversation),
        )
        // Trailing-slash alias kept for clients of the original API shape.
        .route(
            "/conversations/",
            get(batch_get_conversations).post(start_conversation),
        )
        .route(
            "/conversations/{conversation_id}/pause",
            post(pause_conversation),
        )
        .route(
            "/conversations/{conversation_id}/resume",
            post(resume_conversation),
        )
}

fn validated_limit(limit: Option<usize>) -> Result<usize, ApiError> {
    let limit = limit.unwrap_or(MAX_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    Ok(limit)
}

#[derive(Debug, Deserialize)]
struct SearchConversationsQuery {
    page_id: Option<String>,
    limit: Option<usize>,
    status: Option<ExecutionStatus>,
    sort_order: Option<ConversationSortOrder>,
}

async fn search_conversations(
    State(state): State<AppState>,
    Query(query): Query<SearchConversationsQuery>,
) -> Result<Json<ConversationPage>, ApiError> {
    let limit = validated_limit(query.limit)?;
    let page = state
        .conversations
        .search_conversations(
            query.page_id.as_deref(),
            limit,
            query.status,
            query.sort_order.unwrap_or_default(),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct CountConversationsQuery {
    status: Option<ExecutionStatus>,
}

async fn count_conversations(
    State(state): State<AppState>,
    Query(query): Query<CountConversationsQuery>,
) -> Json<usize> {
    Json(state.conversations.count_conversations(query.status).await)
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationInfo>, ApiError> {
    state
        .conversations
        .get_conversation(conversation_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))
}

#[derive(Debug, Deserialize)]
struct BatchGetQuery {
    /// Comma separated conversation ids.
    ids: String,
}

async fn batch_get_conversations(
    State(state): State<AppState>,
    Query(query): Query<BatchGetQuery>,
) -> Result<Json<Vec<Option<ConversationInfo>>>, ApiError> {
    let ids: Vec<Uuid> = query
        .ids
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            Uuid::parse_str(part.trim())
                .map_err(|_| ApiError::Validation(format!("invalid conversation id: {}", part)))
        })
        .collect::<Result<_, _>>()?;
    if ids.len() > MAX_PAGE_LIMIT {
        return Err(ApiError::Validation(format!(
            "at most {} ids per request",
            MAX_PAGE_LIMIT
        )));
    }
    Ok(Json(state.conversations.batch_get_conversations(&ids).await))
}

async fn start_conversation(
    State(state): State<AppState>,
    Json(request): Json<StartConversationRequest>,
) -> Result<Json<ConversationInfo>, ApiError> {
    state.health.touch();
    let info = state.conversations.start_conversation(request).await?;
    Ok(Json(info))
}

async fn pause_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Success>, ApiError> {
    state.conversations.pause_conversation(conversation_id).await?;
    Ok(Json(Success::default()))
}

async fn resume_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Success>, ApiError> {
    state.health.touch();
    state
        .conversations
        .resume_conversation(conversation_id)
        .await?;
    Ok(Json(Success::default()))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Success>, ApiError> {
    state
        .conversations
        .delete_conversation(conversation_id)
        .await?;
    Ok(Json(Success::default()))
}
