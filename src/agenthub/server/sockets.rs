//! WebSocket endpoints.
//!
//! These live outside the REST middleware because browsers cannot attach
//! custom headers to a WebSocket handshake; authentication uses the
//! `session_api_key` query parameter instead, and failures close the socket
//! with application code 4001 (auth failed) or 4004 (not found).
//!
//! Outbound events flow through an unbounded channel per connection, so a
//! slow client never blocks a conversation's append path. Clients that
//! request `resend_all` may observe an event twice (once from a page, once
//! from the live subscription) and are expected to deduplicate by id.

use crate::agenthub::event::Event;
use crate::agenthub::models::{BashEvent, ExecuteBashRequest, SendMessageRequest};
use crate::agenthub::pub_sub::Subscriber;
use crate::agenthub::server::middleware::key_is_valid;
use crate::agenthub::server::AppState;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Close code for a failed handshake authentication.
const CLOSE_AUTH_FAILED: u16 = 4001;
/// Close code for a missing conversation.
const CLOSE_NOT_FOUND: u16 = 4004;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sockets/events/{conversation_id}", get(events_socket))
        .route("/sockets/bash-events", get(bash_events_socket))
        .route("/bash/bash_events/socket", get(bash_events_socket))
}

#[derive(Debug, Deserialize, Default)]
struct SocketQuery {
    session_api_key: Option<String>,
    #[serde(default)]
    resend_all: bool,
}

/// Forwards serialized events into a per-connection channel.
struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSubscriber {
    fn forward<T: serde::Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(err) => log::error!("failed to serialize event for socket: {}", err),
        }
    }
}

#[async_trait]
impl Subscriber<Event> for ChannelSubscriber {
    async fn on_event(&self, event: &Event) {
        self.forward(event);
    }
}

#[async_trait]
impl Subscriber<BashEvent> for ChannelSubscriber {
    async fn on_event(&self, event: &BashEvent) {
        self.forward(event);
    }
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn events_socket(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let authed = key_is_valid(
        &state.config.session_api_keys,
        query.session_api_key.as_deref(),
    );
    ws.on_upgrade(move |socket| {
        serve_events_socket(socket, state, conversation_id, query.resend_all, authed)
    })
}

/// Shared implementation behind both event-socket paths.
pub async fn serve_events_socket(
    socket: WebSocket,
    state: AppState,
    conversation_id: Uuid,
    resend_all: bool,
    authed: bool,
) {
    if !authed {
        close_with(socket, CLOSE_AUTH_FAILED, "Authentication failed").await;
        return;
    }
    let Some(service) = state.conversations.get_event_service(conversation_id).await else {
        close_with(socket, CLOSE_NOT_FOUND, "Conversation not found").await;
        return;
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    // Subscribe before paging so nothing appended during the resend is
    // missed; overlap shows up as duplicates the client drops by id.
    let subscriber_id = service
        .subscribe_to_events(Arc::new(ChannelSubscriber {
            tx: outbound_tx.clone(),
        }))
        .await;

    if resend_all {
        let mut page_id: Option<String> = None;
        loop {
            let page = match service
                .search_events(page_id.as_deref(), 100, None, Default::default())
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    log::error!("failed to page events for resend: {}", err);
                    break;
                }
            };
            for event in &page.items {
                match serde_json::to_string(event) {
                    Ok(json) => {
                        let _ = outbound_tx.send(json);
                    }
                    Err(err) => log::error!("failed to serialize event for resend: {}", err),
                }
            }
            page_id = page.next_page_id;
            if page_id.is_none() {
                break;
            }
        }
    }

    let (mut sink, mut stream) = socket.split();
    let mut outbound = UnboundedReceiverStream::new(outbound_rx);
    let writer = tokio::spawn(async move {
        while let Some(json) = outbound.next().await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<SendMessageRequest>(&text) {
                    Ok(request) => {
                        state.health.touch();
                        if let Err(err) = service
                            .send_message(request.role, request.content, true)
                            .await
                        {
                            log::error!("failed to apply socket message: {}", err);
                        }
                    }
                    Err(err) => log::warn!("ignoring unparseable socket frame: {}", err),
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    service.unsubscribe_from_events(&subscriber_id).await;
    writer.abort();
}

async fn bash_events_socket(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let authed = key_is_valid(
        &state.config.session_api_keys,
        query.session_api_key.as_deref(),
    );
    ws.on_upgrade(move |socket| serve_bash_socket(socket, state, query.resend_all, authed))
}

/// Request/response protocol over the bash socket: inbound frames are
/// [`ExecuteBashRequest`]s, outbound frames are the full bash event stream.
/// A command's exchange ends when a `BashOutput` frame carries an exit code.
async fn serve_bash_socket(socket: WebSocket, state: AppState, resend_all: bool, authed: bool) {
    if !authed {
        close_with(socket, CLOSE_AUTH_FAILED, "Authentication failed").await;
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let subscriber_id = state
        .bash_events
        .subscribe_to_events(Arc::new(ChannelSubscriber {
            tx: outbound_tx.clone(),
        }))
        .await;

    if resend_all {
        let mut page_id: Option<String> = None;
        loop {
            let page = match state
                .bash_events
                .search_bash_events(&Default::default(), Default::default(), page_id.as_deref(), 100)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    log::error!("failed to page bash events for resend: {}", err);
                    break;
                }
            };
            for event in &page.items {
                match serde_json::to_string(event) {
                    Ok(json) => {
                        let _ = outbound_tx.send(json);
                    }
                    Err(err) => log::error!("failed to serialize bash event: {}", err),
                }
            }
            page_id = page.next_page_id;
            if page_id.is_none() {
                break;
            }
        }
    }

    let (mut sink, mut stream) = socket.split();
    let mut outbound = UnboundedReceiverStream::new(outbound_rx);
    let writer = tokio::spawn(async move {
        while let Some(json) = outbound.next().await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ExecuteBashRequest>(&text) {
                Ok(request) => {
                    state.health.touch();
                    if let Err(err) = state.bash_events.start_bash_command(request).await {
                        log::error!("failed to start bash command from socket: {}", err);
                    }
                }
                Err(err) => log::warn!("ignoring unparseable bash socket frame: {}", err),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.bash_events.unsubscribe_from_events(&subscriber_id).await;
    writer.abort();
}
