//! REST endpoints for the bash execution subsystem.

use crate::agenthub::bash_service::BashEventFilter;
use crate::agenthub::error::ApiError;
use crate::agenthub::models::{
    BashCommand, BashEvent, BashEventPage, BashEventSortOrder, ExecuteBashRequest,
};
use crate::agenthub::server::conversation_router::MAX_PAGE_LIMIT;
use crate::agenthub::server::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bash/execute_bash_command", post(execute_bash_command))
        .route("/bash/bash_events/search", get(search_bash_events))
        .route("/bash/bash_events/{event_id}", get(get_bash_event))
        .route("/bash/bash_events", delete(clear_bash_events).get(batch_get_bash_events))
}

async fn execute_bash_command(
    State(state): State<AppState>,
    Json(request): Json<ExecuteBashRequest>,
) -> Result<Json<BashCommand>, ApiError> {
    state.health.touch();
    let command = state.bash_events.start_bash_command(request).await?;
    Ok(Json(command))
}

#[derive(Debug, Deserialize)]
struct SearchBashEventsQuery {
    kind__eq: Option<String>,
    command_id__eq: Option<String>,
    timestamp__gte: Option<DateTime<Utc>>,
    timestamp__lt: Option<DateTime<Utc>>,
    sort_order: Option<BashEventSortOrder>,
    page_id: Option<String>,
    limit: Option<usize>,
}

async fn search_bash_events(
    State(state): State<AppState>,
    Query(query): Query<SearchBashEventsQuery>,
) -> Result<Json<BashEventPage>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    if let Some(kind) = &query.kind__eq {
        if kind != "BashCommand" && kind != "BashOutput" {
            return Err(ApiError::Validation(format!(
                "kind__eq must be BashCommand or BashOutput, got {}",
                kind
            )));
        }
    }
    let filter = BashEventFilter {
        kind_eq: query.kind__eq,
        command_id_eq: query.command_id__eq,
        timestamp_gte: query.timestamp__gte,
        timestamp_lt: query.timestamp__lt,
    };
    let page = state
        .bash_events
        .search_bash_events(
            &filter,
            query.sort_order.unwrap_or_default(),
            query.page_id.as_deref(),
            limit,
        )
        .await?;
    Ok(Json(page))
}

async fn get_bash_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<BashEvent>, ApiError> {
    state
        .bash_events
        .get_bash_event(&event_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("bash event {}", event_id)))
}

#[derive(Debug, Deserialize)]
struct BatchGetBashEventsQuery {
    /// Comma separated event ids.
    event_ids: String,
}

async fn batch_get_bash_events(
    State(state): State<AppState>,
    Query(query): Query<BatchGetBashEventsQuery>,
) -> Result<Json<Vec<Option<BashEvent>>>, ApiError> {
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
    Ok(Json(state.bash_events.batch_get_bash_events(&ids).await))
}

async fn clear_bash_events(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cleared = state.bash_events.clear_all_events().await?;
    Ok(Json(json!({ "cleared_count": cleared })))
}
