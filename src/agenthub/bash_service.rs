//! Standalone bash execution service with its own event store.
//!
//! Separate from conversations: clients submit commands over HTTP or
//! WebSocket, the service persists a [`BashCommand`] event, runs the command
//! on a background task, and streams [`BashOutput`] chunks as they arrive.
//! The final output chunk always carries an exit code (or the timeout flag),
//! which is what terminates the WebSocket protocol.
//!
//! Events persist as one JSON file each under `bash_events_dir` and are
//! reloaded by scanning on startup, the same discipline as conversation
//! event logs.

use crate::agenthub::error::ApiError;
use crate::agenthub::event::new_event_id;
use crate::agenthub::models::{
    BashCommand, BashEvent, BashEventPage, BashEventSortOrder, BashOutput, ExecuteBashRequest,
};
use crate::agenthub::persist;
use crate::agenthub::pub_sub::{ActivityHook, PubSub, Subscriber, SubscriberId};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Deadline applied when the request does not name one.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Filters accepted by [`BashEventService::search_bash_events`].
#[derive(Debug, Clone, Default)]
pub struct BashEventFilter {
    /// Restrict to one event kind ("BashCommand" or "BashOutput").
    pub kind_eq: Option<String>,
    /// Restrict to events belonging to one command.
    pub command_id_eq: Option<String>,
    pub timestamp_gte: Option<DateTime<Utc>>,
    pub timestamp_lt: Option<DateTime<Utc>>,
}

impl BashEventFilter {
    fn matches(&self, event: &BashEvent) -> bool {
        if let Some(kind) = &self.kind_eq {
            if event.kind() != kind {
                return false;
            }
        }
        if let Some(command_id) = &self.command_id_eq {
            if event.command_id() != command_id {
                return false;
            }
        }
        if let Some(gte) = self.timestamp_gte {
            if event.timestamp() < gte {
                return false;
            }
        }
        if let Some(lt) = self.timestamp_lt {
            if event.timestamp() >= lt {
                return false;
            }
        }
        true
    }
}

/// Stores bash events and runs submitted commands.
pub struct BashEventService {
    dir: PathBuf,
    events: Mutex<Vec<BashEvent>>,
    pub_sub: PubSub<BashEvent>,
    seq: AtomicUsize,
    activity_hook: OnceLock<ActivityHook>,
}

impl BashEventService {
    /// Open the store, loading any events already on disk.
    pub fn open(dir: PathBuf) -> std::io::Result<Arc<Self>> {
        std::fs::create_dir_all(&dir)?;
        let mut events: Vec<BashEvent> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match persist::read_json::<BashEvent>(&path) {
                Ok(event) => events.push(event),
                Err(err) => {
                    log::warn!("skipping unreadable bash event {:?}: {}", path, err);
                }
            }
        }
        events.sort_by(|a, b| a.id().cmp(b.id()));
        let seq = AtomicUsize::new(events.len());
        Ok(Arc::new(Self {
            dir,
            events: Mutex::new(events),
            pub_sub: PubSub::new(),
            seq,
            activity_hook: OnceLock::new(),
        }))
    }

    /// Install the callback invoked on every event append. Later calls are
    /// ignored.
    pub fn set_activity_hook(&self, hook: ActivityHook) {
        let _ = self.activity_hook.set(hook);
    }

    fn next_id(&self) -> String {
        new_event_id(self.seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Persist, record, and dispatch one event, holding the store lock
    /// across dispatch so subscribers see arrival order.
    async fn append(&self, event: BashEvent) -> Result<(), ApiError> {
        let mut events = self.events.lock().await;
        let path = self.dir.join(format!("{}.json", event.id()));
        persist::write_json_atomic(&path, &event).map_err(ApiError::from)?;
        events.push(event.clone());
        self.pub_sub.dispatch(&event).await;
        if let Some(hook) = self.activity_hook.get() {
            hook();
        }
        Ok(())
    }

    // Reads

    pub async fn get_bash_event(&self, event_id: &str) -> Option<BashEvent> {
        let events = self.events.lock().await;
        events.iter().find(|event| event.id() == event_id).cloned()
    }

    pub async fn batch_get_bash_events(&self, event_ids: &[String]) -> Vec<Option<BashEvent>> {
        let events = self.events.lock().await;
        event_ids
            .iter()
            .map(|id| events.iter().find(|event| event.id() == id).cloned())
            .collect()
    }

    pub async fn search_bash_events(
        &self,
        filter: &BashEventFilter,
        sort_order: BashEventSortOrder,
        page_id: Option<&str>,
        limit: usize,
    ) -> Result<BashEventPage, ApiError> {
        let cursor = match page_id {
            None => None,
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                ApiError::Validation(format!("invalid page cursor: {}", raw))
            })?),
        };

        let events = self.events.lock().await;
        let matching: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| filter.matches(event))
            .map(|(index, _)| index)
            .collect();
        let ordered: Vec<usize> = match sort_order {
            BashEventSortOrder::Timestamp => matching,
            BashEventSortOrder::TimestampDesc => matching.into_iter().rev().collect(),
        };

        let start = match cursor {
            None => 0,
            Some(cursor_index) => ordered
                .iter()
                .position(|&index| index == cursor_index)
                .ok_or_else(|| {
                    ApiError::Validation(format!("invalid page cursor: {}", cursor_index))
                })?,
        };
        let items: Vec<BashEvent> = ordered
            .iter()
            .skip(start)
            .take(limit)
            .map(|&index| events[index].clone())
            .collect();
        let next_page_id = ordered.get(start + items.len()).map(|i| i.to_string());
        Ok(BashEventPage {
            items,
            next_page_id,
        })
    }

    /// Remove every stored bash event, returning how many were cleared.
    pub async fn clear_all_events(&self) -> Result<usize, ApiError> {
        let mut events = self.events.lock().await;
        let count = events.len();
        for event in events.iter() {
            let path = self.dir.join(format!("{}.json", event.id()));
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(ApiError::from(err));
                }
            }
        }
        events.clear();
        Ok(count)
    }

    // Subscriptions

    pub async fn subscribe_to_events(
        &self,
        subscriber: Arc<dyn Subscriber<BashEvent>>,
    ) -> SubscriberId {
        self.pub_sub.subscribe(subscriber).await
    }

    pub async fn unsubscribe_from_events(&self, subscriber_id: &str) -> bool {
        self.pub_sub.unsubscribe(subscriber_id).await
    }

    pub async fn close(&self) {
        self.pub_sub.close().await;
    }

    // Execution

    /// Record and launch a command. Output chunks stream in as further
    /// events; the returned [`BashCommand`] lets the caller correlate them.
    pub async fn start_bash_command(
        self: &Arc<Self>,
        request: ExecuteBashRequest,
    ) -> Result<BashCommand, ApiError> {
        let command = BashCommand {
            id: self.next_id(),
            command: request.command,
            timeout: request.timeout,
            cwd: request.cwd,
            timestamp: Utc::now(),
        };
        self.append(BashEvent::BashCommand(command.clone())).await?;

        let service = self.clone();
        let spawned = command.clone();
        tokio::spawn(async move { service.run_command(spawned).await });
        Ok(command)
    }

    async fn emit_output(
        &self,
        command_id: &str,
        order: &mut u64,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        timeout_occurred: bool,
    ) {
        let event = BashEvent::BashOutput(BashOutput {
            id: self.next_id(),
            command_id: command_id.to_string(),
            stdout,
            stderr,
            exit_code,
            timeout_occurred,
            order: *order,
            timestamp: Utc::now(),
        });
        *order += 1;
        if let Err(err) = self.append(event).await {
            log::error!("failed to record bash output: {}", err);
        }
    }

    async fn run_command(&self, command: BashCommand) {
        let mut order: u64 = 0;
        let deadline =
            Duration::from_secs(command.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));

        let mut process = TokioCommand::new("/bin/bash");
        process
            .arg("-c")
            .arg(&command.command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.emit_output(
                    &command.id,
                    &mut order,
                    String::new(),
                    format!("failed to spawn command: {}", err),
                    Some(-1),
                    false,
                )
                .await;
                return;
            }
        };

        enum Chunk {
            Stdout(String),
            Stderr(String),
        }

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Chunk>();
        if let Some(mut stdout) = child.stdout.take() {
            let tx = chunk_tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                while let Ok(n) = stdout.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let text = String::from_utf8_lossy(&buf[..n]).to_string();
                    if tx.send(Chunk::Stdout(text)).is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(mut stderr) = child.stderr.take() {
            let tx = chunk_tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                while let Ok(n) = stderr.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let text = String::from_utf8_lossy(&buf[..n]).to_string();
                    if tx.send(Chunk::Stderr(text)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(chunk_tx);

        let timed_out = {
            let expiry = tokio::time::sleep(deadline);
            tokio::pin!(expiry);
            loop {
                tokio::select! {
                    chunk = chunk_rx.recv() => match chunk {
                        Some(Chunk::Stdout(text)) => {
                            self.emit_output(&command.id, &mut order, text, String::new(), None, false).await;
                        }
                        Some(Chunk::Stderr(text)) => {
                            self.emit_output(&command.id, &mut order, String::new(), text, None, false).await;
                        }
                        None => break false,
                    },
                    _ = &mut expiry => {
                        let _ = child.kill().await;
                        break true;
                    }
                }
            }
        };

        let exit_code = if timed_out {
            let _ = child.wait().await;
            Some(-1)
        } else {
            match child.wait().await {
                Ok(status) => Some(status.code().unwrap_or(-1)),
                Err(err) => {
                    log::error!("failed waiting for command {}: {}", command.id, err);
                    Some(-1)
                }
            }
        };

        self.emit_output(
            &command.id,
            &mut order,
            String::new(),
            String::new(),
            exit_code,
            timed_out,
        )
        .await;
    }
}
