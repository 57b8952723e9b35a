//! REST API tests against a real listening server.
//!
//! The server is wired with a scripted LLM factory and temp directories,
//! bound to an ephemeral port, and exercised over HTTP with reqwest.

mod common;

use agenthub::agenthub::config::Config;
use agenthub::agenthub::server::{build_router, build_state_with_factory};
use common::{ScriptedFactory, ScriptedLlm, Turn};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct TestServer {
    base_url: String,
    _dir: tempfile::TempDir,
}

async fn spawn_server(turns: Vec<Turn>, session_api_keys: Vec<String>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        session_api_keys,
        conversations_path: dir.path().join("conversations"),
        workspace_path: dir.path().join("workspaces"),
        bash_events_dir: dir.path().join("bash_events"),
        ..Config::default()
    };
    let state = build_state_with_factory(
        config,
        Arc::new(ScriptedFactory {
            client: ScriptedLlm::new(turns),
        }),
    )
    .await
    .unwrap();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestServer {
        base_url: format!("http://{}", addr),
        _dir: dir,
    }
}

fn start_body() -> Value {
    json!({
        "agent": {
            "llm": {"model": "scripted"},
            "system_prompt": "You are a test agent."
        },
        "initial_message": {"content": [{"type": "text", "text": "Hi"}], "run": true}
    })
}

async fn wait_for_api_status(client: &reqwest::Client, base: &str, id: &str, wanted: &str) {
    for _ in 0..300 {
        let info: Value = client
            .get(format!("{}/conversations/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if info["status"] == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("conversation {} never reached {}", id, wanted);
}

#[tokio::test]
async fn liveness_endpoints_respond() {
    let server = spawn_server(vec![], vec![]).await;
    let client = reqwest::Client::new();

    let alive: Value = client
        .get(format!("{}/alive", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alive["status"], "ok");

    let health = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "OK");

    let info: Value = client
        .get(format!("{}/server_info", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(info["uptime"].as_f64().unwrap() >= 0.0);
    assert!(info["idle_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn session_api_key_is_enforced_on_rest_routes() {
    let server = spawn_server(vec![], vec!["top-secret".to_string()]).await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("{}/conversations/count", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let allowed = client
        .get(format!("{}/conversations/count", server.base_url))
        .header("X-Session-API-Key", "top-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    // Liveness stays open.
    let alive = client
        .get(format!("{}/alive", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(alive.status(), 200);
}

#[tokio::test]
async fn conversation_lifecycle_over_http() {
    let server = spawn_server(vec![Turn::Message("Hello")], vec![]).await;
    let client = reqwest::Client::new();
    let base = &server.base_url;

    let created: Value = client
        .post(format!("{}/conversations", base))
        .json(&start_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    wait_for_api_status(&client, base, &id, "FINISHED").await;

    // Search finds it; count agrees.
    let page: Value = client
        .get(format!("{}/conversations/search", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    let count: Value = client
        .get(format!("{}/conversations/count", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count, json!(1));

    // Status-filtered count.
    let finished: Value = client
        .get(format!("{}/conversations/count?status=FINISHED", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finished, json!(1));

    // Batch get aligns hits and misses.
    let missing = uuid::Uuid::new_v4().simple().to_string();
    let batch: Value = client
        .get(format!("{}/conversations?ids={},{}", base, id, missing))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let batch = batch.as_array().unwrap();
    assert!(batch[0].is_object());
    assert!(batch[1].is_null());

    // Events are readable.
    let events: Value = client
        .get(format!("{}/conversations/{}/events/search", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = events["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["kind"], "SystemPrompt");

    let event_id = items[1]["id"].as_str().unwrap();
    let event: Value = client
        .get(format!(
            "{}/conversations/{}/events/{}",
            base, id, event_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(event["id"], json!(event_id));

    // Delete removes it.
    let deleted: Value = client
        .delete(format!("{}/conversations/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["success"], json!(true));
    let gone = client
        .get(format!("{}/conversations/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn unknown_conversation_returns_404() {
    let server = spawn_server(vec![], vec![]).await;
    let client = reqwest::Client::new();
    let missing = uuid::Uuid::new_v4();

    let events = client
        .get(format!(
            "{}/conversations/{}/events/search",
            server.base_url, missing
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(events.status(), 404);

    let pause = client
        .post(format!(
            "{}/conversations/{}/pause",
            server.base_url, missing
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(pause.status(), 404);
}

#[tokio::test]
async fn pause_after_finish_is_a_conflict() {
    let server = spawn_server(vec![Turn::Message("Hello")], vec![]).await;
    let client = reqwest::Client::new();
    let base = &server.base_url;

    let created: Value = client
        .post(format!("{}/conversations", base))
        .json(&start_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    wait_for_api_status(&client, base, &id, "FINISHED").await;

    let paused = client
        .post(format!("{}/conversations/{}/pause", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(paused.status(), 400);
}

#[tokio::test]
async fn invalid_limit_is_rejected() {
    let server = spawn_server(vec![], vec![]).await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!(
            "{}/conversations/search?limit=500",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("limit"));
}

#[tokio::test]
async fn respond_to_confirmation_flow_over_http() {
    let server = spawn_server(
        vec![
            Turn::ToolCalls(vec![("bash", json!({"command": "echo hi"}))]),
            Turn::Message("done"),
        ],
        vec![],
    )
    .await;
    let client = reqwest::Client::new();
    let base = &server.base_url;

    let mut body = start_body();
    body["confirmation_policy"] = json!({"kind": "always_confirm"});
    let created: Value = client
        .post(format!("{}/conversations", base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    wait_for_api_status(&client, base, &id, "WAITING_FOR_CONFIRMATION").await;

    let accepted: Value = client
        .post(format!(
            "{}/conversations/{}/events/respond_to_confirmation",
            base, id
        ))
        .json(&json!({"accept": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(accepted["success"], json!(true));
    wait_for_api_status(&client, base, &id, "FINISHED").await;
}

#[tokio::test]
async fn bash_subsystem_over_http() {
    let server = spawn_server(vec![], vec![]).await;
    let client = reqwest::Client::new();
    let base = &server.base_url;

    let command: Value = client
        .post(format!("{}/bash/execute_bash_command", base))
        .json(&json!({"command": "echo over-http", "timeout": 10}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let command_id = command["id"].as_str().unwrap().to_string();

    // Poll until the exit frame lands.
    let mut exit_seen = false;
    for _ in 0..200 {
        let page: Value = client
            .get(format!(
                "{}/bash/bash_events/search?command_id__eq={}&kind__eq=BashOutput",
                base, command_id
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if page["items"]
            .as_array()
            .unwrap()
            .iter()
            .any(|item| !item["exit_code"].is_null())
        {
            exit_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(exit_seen, "bash command never reported an exit code");

    let cleared: Value = client
        .delete(format!("{}/bash/bash_events", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(cleared["cleared_count"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn file_upload_and_download_round_trip() {
    let server = spawn_server(vec![], vec![]).await;
    let client = reqwest::Client::new();
    let target = server._dir.path().join("uploads/data.txt");
    let target_str = target.to_str().unwrap();

    // Hand-rolled multipart body; reqwest is built without the multipart
    // feature.
    let boundary = "agenthub-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.txt\"\r\nContent-Type: text/plain\r\n\r\nhello upload\r\n--{b}--\r\n",
        b = boundary
    );
    // The extra slash keeps the absolute path intact through the wildcard
    // route segment.
    let uploaded: Value = client
        .post(format!("{}/file/upload/{}", server.base_url, target_str))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(uploaded["success"], json!(true));

    let downloaded = client
        .get(format!("{}/file/download/{}", server.base_url, target_str))
        .send()
        .await
        .unwrap();
    assert_eq!(downloaded.status(), 200);
    assert_eq!(downloaded.text().await.unwrap(), "hello upload");

    let missing = client
        .get(format!(
            "{}/file/download/{}/nope.txt",
            server.base_url, target_str
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
