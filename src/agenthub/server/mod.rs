//! HTTP/WebSocket surface.
//!
//! The composition root lives here: [`build_state`] wires the conversation
//! service, the bash event service, the tool registry, and the LLM client
//! factory from a [`Config`], and [`build_router`] assembles the axum
//! application around them. Session-key auth applies to the REST routers;
//! the WebSocket endpoints authenticate in-handshake, and the liveness
//! endpoints are open.

pub mod bash_router;
pub mod conversation_router;
pub mod event_router;
pub mod file_router;
pub mod middleware;
pub mod server_details;
pub mod sockets;

use crate::agenthub::bash_service::BashEventService;
use crate::agenthub::clients::OpenAiCompatFactory;
use crate::agenthub::config::Config;
use crate::agenthub::conversation_service::ConversationService;
use crate::agenthub::llm::LlmClientFactory;
use crate::agenthub::pub_sub::ActivityHook;
use crate::agenthub::tools::default_registry;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::services::ServeDir;

/// Process start time and last-activity tracking for `/server_info`.
///
/// Idle time resets on client writes and, via the activity hook installed
/// by [`build_state_with_factory`], on every event append, so a step loop
/// working in the background counts as activity.
pub struct ServerHealth {
    started_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Default for ServerHealth {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            last_activity: Mutex::new(now),
        }
    }
}

impl ServerHealth {
    /// Record activity (a client write or an event append).
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: Arc<ConversationService>,
    pub bash_events: Arc<BashEventService>,
    pub health: Arc<ServerHealth>,
}

/// Wire the services behind the server from configuration.
pub async fn build_state(config: Config) -> std::io::Result<AppState> {
    build_state_with_factory(config, Arc::new(OpenAiCompatFactory)).await
}

/// Same as [`build_state`] but with an injected LLM client factory, which
/// is how tests substitute scripted providers.
pub async fn build_state_with_factory(
    config: Config,
    llm_factory: Arc<dyn LlmClientFactory>,
) -> std::io::Result<AppState> {
    let health = Arc::new(ServerHealth::default());
    let activity: ActivityHook = {
        let health = health.clone();
        Arc::new(move || health.touch())
    };

    let tools = Arc::new(default_registry());
    let conversations = Arc::new(
        ConversationService::new(
            config.conversations_path.clone(),
            config.workspace_path.clone(),
            config.webhooks.clone(),
            config.session_api_keys.first().cloned(),
            llm_factory,
            tools,
        )
        .with_activity_hook(activity.clone()),
    );
    conversations.load().await?;
    let bash_events = BashEventService::open(config.bash_events_dir.clone())?;
    bash_events.set_activity_hook(activity);
    Ok(AppState {
        config: Arc::new(config),
        conversations,
        bash_events,
        health,
    })
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(conversation_router::router())
        .merge(event_router::router())
        .merge(bash_router::router())
        .merge(file_router::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::validate_session_api_key,
        ));

    let mut app = Router::new()
        .merge(protected)
        .merge(sockets::router())
        .merge(server_details::router());

    if let Some(static_dir) = &state.config.static_files_path {
        if static_dir.is_dir() {
            app = app.nest_service("/static", ServeDir::new(static_dir));
            if static_dir.join("index.html").exists() {
                app = app.route(
                    "/",
                    get(|| async { Redirect::temporary("/static/index.html") }),
                );
            }
        }
    }

    app.layer(
        tower::ServiceBuilder::new().layer(middleware::cors_layer(
            state.config.allow_cors_origins.clone(),
        )),
    )
    .with_state(state)
}

/// Run the server until ctrl-c, then close every conversation (stopping
/// step loops, flushing webhooks, persisting metadata).
pub async fn serve(config: Config, addr: SocketAddr) -> std::io::Result<()> {
    let state = build_state(config).await?;
    let conversations = state.conversations.clone();
    let bash_events = state.bash_events.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("agenthub listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
        })
        .await?;

    conversations.close().await;
    bash_events.close().await;
    Ok(())
}
