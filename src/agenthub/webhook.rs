//! Buffered, time-bounded, retrying webhook delivery.
//!
//! A [`WebhookSubscriber`] sits on a conversation's pub/sub topic. Events
//! accumulate in an in-memory queue; the queue is flushed as one HTTP POST
//! to `{base_url}/events` either when it reaches `event_buffer_size` or when
//! `flush_delay` seconds pass without a new event (the idle timer resets on
//! every event). Failed batches are retried `num_retries` times with a fixed
//! delay, and on exhaustion the batch is put back at the front of the queue
//! so a later flush delivers it, preserving order. There is no durable
//! queueing: a process crash loses whatever was buffered.

use crate::agenthub::event::Event;
use crate::agenthub::pub_sub::Subscriber;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Header carrying the session API key on outbound webhook requests.
pub const SESSION_API_KEY_HEADER: &str = "X-Session-API-Key";

/// Bound on a single webhook POST.
const POST_TIMEOUT: Duration = Duration::from_secs(30);

/// Spec to create a webhook. All webhook requests use the POST method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookSpec {
    /// Base URL of the webhook service. Events are sent to
    /// `{base_url}/events`.
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Number of events to buffer locally before posting.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
    /// Seconds after which buffered events are flushed even if the buffer is
    /// not full. The timer resets on each new event.
    #[serde(default = "default_flush_delay")]
    pub flush_delay: f64,
    /// Number of additional attempts when a post fails.
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    /// Seconds between retries.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

fn default_event_buffer_size() -> usize {
    10
}

fn default_flush_delay() -> f64 {
    30.0
}

fn default_num_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    5.0
}

struct WebhookInner {
    spec: WebhookSpec,
    session_api_key: Option<String>,
    client: reqwest::Client,
    /// Serialized events awaiting delivery, oldest first.
    queue: Mutex<VecDeque<serde_json::Value>>,
    /// Serializes flushes so batches post in order.
    flush_lock: Mutex<()>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookInner {
    /// Snapshot the queue and attempt delivery, re-queueing at the front on
    /// exhausted retries.
    async fn flush(&self) {
        let _ordering = self.flush_lock.lock().await;

        let batch: Vec<serde_json::Value> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        let url = format!("{}/events", self.spec.base_url.trim_end_matches('/'));
        for attempt in 0..=self.spec.num_retries {
            let mut request = self
                .client
                .post(&url)
                .timeout(POST_TIMEOUT)
                .json(&batch);
            for (name, value) in &self.spec.headers {
                request = request.header(name, value);
            }
            if let Some(key) = &self.session_api_key {
                request = request.header(SESSION_API_KEY_HEADER, key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    log::debug!("posted {} events to webhook {}", batch.len(), url);
                    return;
                }
                Ok(response) => {
                    log::warn!(
                        "webhook post attempt {} to {} returned {}",
                        attempt + 1,
                        url,
                        response.status()
                    );
                }
                Err(err) => {
                    log::warn!("webhook post attempt {} to {} failed: {}", attempt + 1, url, err);
                }
            }
            if attempt < self.spec.num_retries {
                tokio::time::sleep(Duration::from_secs_f64(self.spec.retry_delay)).await;
            }
        }

        log::error!(
            "failed to post {} events to webhook {} after {} attempts; re-queueing",
            batch.len(),
            url,
            self.spec.num_retries + 1
        );
        let mut queue = self.queue.lock().await;
        for value in batch.into_iter().rev() {
            queue.push_front(value);
        }
    }
}

/// A pub/sub subscriber that forwards events to one webhook endpoint.
pub struct WebhookSubscriber {
    inner: Arc<WebhookInner>,
}

impl WebhookSubscriber {
    pub fn new(spec: WebhookSpec, session_api_key: Option<String>) -> Self {
        Self {
            inner: Arc::new(WebhookInner {
                spec,
                session_api_key,
                client: reqwest::Client::new(),
                queue: Mutex::new(VecDeque::new()),
                flush_lock: Mutex::new(()),
                idle_timer: Mutex::new(None),
            }),
        }
    }

    /// Events currently buffered. Exposed for shutdown logging and tests.
    pub async fn queued_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    async fn arm_idle_timer(&self) {
        let delay = Duration::from_secs_f64(self.inner.spec.flush_delay);
        let inner = self.inner.clone();
        let mut timer = self.inner.idle_timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.flush().await;
        }));
    }

    async fn cancel_idle_timer(&self) {
        if let Some(timer) = self.inner.idle_timer.lock().await.take() {
            timer.abort();
        }
    }
}

#[async_trait]
impl Subscriber<Event> for WebhookSubscriber {
    async fn on_event(&self, event: &Event) {
        // Synthesized broadcast events never enter the log; forwarding them
        // would break the ids-match-the-log delivery guarantee.
        if !event.is_persisted() {
            return;
        }
        let serialized = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(err) => {
                log::error!("failed to serialize event for webhook: {}", err);
                return;
            }
        };

        let reached_buffer_size = {
            let mut queue = self.inner.queue.lock().await;
            queue.push_back(serialized);
            queue.len() >= self.inner.spec.event_buffer_size
        };

        if reached_buffer_size {
            self.cancel_idle_timer().await;
            // Dispatch runs inside the conversation's critical section, so
            // the POST itself happens on its own task. The flush lock keeps
            // batches in order.
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.flush().await });
        } else {
            self.arm_idle_timer().await;
        }
    }

    /// One final bounded flush; no further timers are scheduled.
    async fn close(&self) {
        self.cancel_idle_timer().await;
        self.inner.flush().await;
        let remaining = self.inner.queue.lock().await.len();
        if remaining > 0 {
            log::warn!(
                "webhook {} closed with {} undelivered events",
                self.inner.spec.base_url,
                remaining
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec: WebhookSpec =
            serde_json::from_str(r#"{"base_url": "http://hooks.local"}"#).unwrap();
        assert_eq!(spec.event_buffer_size, 10);
        assert!((spec.flush_delay - 30.0).abs() < f64::EPSILON);
        assert_eq!(spec.num_retries, 3);
        assert!((spec.retry_delay - 5.0).abs() < f64::EPSILON);
        assert!(spec.headers.is_empty());
    }

    #[test]
    fn spec_round_trips() {
        let spec = WebhookSpec {
            base_url: "http://hooks.local".to_string(),
            headers: HashMap::from([("Authorization".to_string(), "Bearer x".to_string())]),
            event_buffer_size: 2,
            flush_delay: 0.5,
            num_retries: 1,
            retry_delay: 0.0,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: WebhookSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
