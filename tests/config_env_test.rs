//! Config precedence against the real process environment.
//!
//! Kept to a single test function because environment variables are process
//! global and the test harness runs functions in parallel threads.

use agenthub::agenthub::config::Config;
use std::path::PathBuf;

#[test]
fn env_beats_json_beats_default() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{
            "conversations_path": "/from-json/conversations",
            "workspace_path": "/from-json/workspace",
            "session_api_keys": ["json-key"]
        }"#,
    )
    .unwrap();

    std::env::set_var("CONVERSATIONS_PATH", "/from-env/conversations");
    std::env::set_var("ENABLE_VNC", "true");
    let config = Config::from_json_file(&config_path);
    std::env::remove_var("CONVERSATIONS_PATH");
    std::env::remove_var("ENABLE_VNC");

    // Env wins over JSON.
    assert_eq!(
        config.conversations_path,
        PathBuf::from("/from-env/conversations")
    );
    // JSON wins over defaults.
    assert_eq!(config.workspace_path, PathBuf::from("/from-json/workspace"));
    assert_eq!(config.session_api_keys, vec!["json-key".to_string()]);
    // Env wins over the built-in default.
    assert!(config.enable_vnc);
    // Untouched fields keep their defaults.
    assert_eq!(
        config.bash_events_dir,
        PathBuf::from("workspace/bash_events")
    );
}
