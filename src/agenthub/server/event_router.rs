//! REST and WebSocket endpoints for one conversation's events.
//!
//! The WebSocket at `/conversations/{id}/events/socket` and the one at
//! `/sockets/events/{id}` (see `sockets.rs`) share the same handler; the
//! project historically exposed both paths and they are kept as one
//! behavior.

use crate::agenthub::error::ApiError;
use crate::agenthub::event::Event;
use crate::agenthub::event_service::EventService;
use crate::agenthub::models::{
    ConfirmationResponseRequest, EventPage, EventSortOrder, SendMessageRequest, Success,
};
use crate::agenthub::server::conversation_router::MAX_PAGE_LIMIT;
use crate::agenthub::server::sockets;
use crate::agenthub::server::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations/{conversation_id}/events/search",
            get(search_events),
        )
        .route(
            "/conversations/{conversation_id}/events/count",
            get(count_events),
        )
        .route(
            "/conversations/{conversation_id}/events/respond_to_confirmation",
            post(respond_to_confirmation),
        )
        .route(
            "/conversations/{conversation_id}/events/socket",
            get(legacy_socket),
        )
        .route(
            "/conversations/{conversation_id}/events/{event_id}",
            get(get_event),
        )
        .route(
            "/conversations/{conversation_id}/events",
            get(batch_get_events).post(send_message),
        )
        // Trailing-slash alias kept for clients of the original API shape.
        .route(
            "/conversations/{conversation_id}/events/",
            get(batch_get_events).post(send_message),
        )
}

async fn event_service(
    state: &AppState,
    conversation_id: Uuid,
) -> Result<Arc<EventService>, ApiError> {
    state
        .conversations
        .get_event_service(conversation_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))
}

#[derive(Debug, Deserialize)]
struct SearchEventsQuery {
    page_id: Option<String>,
    limit: Option<usize>,
    kind: Option<String>,
    sort_order: Option<EventSortOrder>,
}

async fn search_events(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<SearchEventsQuery>,
) -> Result<Json<EventPage>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    let service = event_service(&state, conversation_id).await?;
    let page = service
        .search_events(
            query.page_id.as_deref(),
            limit,
            query.kind.as_deref(),
            query.sort_order.unwrap_or_default(),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct CountEventsQuery {
    kind: Option<String>,
}

async fn count_events(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<CountEventsQuery>,
) -> Result<Json<usize>, ApiError> {
    let service = event_service(&state, conversation_id).await?;
    Ok(Json(service.count_events(query.kind.as_deref()).await))
}

async fn get_event(
    State(state): State<AppState>,
    Path((conversation_id, event_id)): Path<(Uuid, String)>,
) -> Result<Json<Event>, ApiError> {
    let service = event_service(&state, conversation_id).await?;
    service
        .get_event(&event_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("event {}", event_id)))
}

#[derive(Debug, Deserialize)]
struct BatchGetEventsQuery {
    /// Comma separated event ids.
    event_ids: String,
}

async fn batch_get_events(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<BatchGetEventsQuery>,
) -> Result<Json<Vec<Option<Event>>>, ApiError> {
    let ids: Vec<String> = query
        .event_ids
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    if ids.len() > MAX_PAGE_LIMIT {
        return Err(ApiError::Validation(format!(
            "at most {} ids per request",
            MAX_PAGE_LIMIT
        )));
    }
    let service = event_service(&state, conversation_id).await?;
    Ok(Json(service.batch_get_events(&ids).await))
}

async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Success>, ApiError> {
    state.health.touch();
    let service = event_service(&state, conversation_id).await?;
    service
        .send_message(request.role, request.content, request.run)
        .await?;
    Ok(Json(Success::default()))
}

async fn respond_to_confirmation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<ConfirmationResponseRequest>,
) -> Result<Json<Success>, ApiError> {
    state.health.touch();
    let service = event_service(&state, conversation_id).await?;
    service
        .respond_to_confirmation(request.accept, request.reason)
        .await?;
    Ok(Json(Success::default()))
}

/// The events WebSocket on its historical path. Auth was already enforced
/// by the REST middleware; the shared handler skips resend.
async fn legacy_socket(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        sockets::serve_events_socket(socket, state, conversation_id, false, true)
    })
}
