//! Filesystem persistence adapter.
//!
//! All durable state lives under two roots:
//!
//! ```text
//! conversations_path/
//!   {conversation_id_hex}/
//!     meta.json                      # serialized conversation metadata
//!     event_service/
//!       events/
//!         {event_id}.json            # one event per file
//!       base_state.json              # blocked-action/message maps
//! workspace_path/
//!   {conversation_id_hex}/           # per-conversation workspace
//! ```
//!
//! Every write goes to a sibling temp file in the same directory, is synced,
//! and then renamed over the target so readers never observe a torn file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write `bytes` to `path` atomically (temp file + fsync + rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &bytes)
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Resolved locations for one conversation's persistent state.
#[derive(Debug, Clone)]
pub struct ConversationPaths {
    root: PathBuf,
}

impl ConversationPaths {
    /// Paths for `conversation_id` under the conversations root.
    pub fn new(conversations_path: &Path, conversation_id: Uuid) -> Self {
        Self {
            root: conversations_path.join(conversation_id.simple().to_string()),
        }
    }

    /// The conversation's own directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_file(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    pub fn event_service_dir(&self) -> PathBuf {
        self.root.join("event_service")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.event_service_dir().join("events")
    }

    pub fn base_state_file(&self) -> PathBuf {
        self.event_service_dir().join("base_state.json")
    }

    /// Create the directory tree for a fresh conversation.
    pub fn create_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.events_dir())
    }

    /// Remove the whole conversation directory.
    pub fn remove_all(&self) -> io::Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: u32,
    }

    #[test]
    fn write_and_read_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample {
            name: "x".to_string(),
            value: 7,
        };
        write_json_atomic(&path, &sample).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.json");
        write_atomic(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn conversation_paths_layout() {
        let id = Uuid::new_v4();
        let paths = ConversationPaths::new(Path::new("/data/conversations"), id);
        let hex = id.simple().to_string();
        assert_eq!(
            paths.meta_file(),
            PathBuf::from(format!("/data/conversations/{}/meta.json", hex))
        );
        assert_eq!(
            paths.events_dir(),
            PathBuf::from(format!("/data/conversations/{}/event_service/events", hex))
        );
        assert_eq!(
            paths.base_state_file(),
            PathBuf::from(format!(
                "/data/conversations/{}/event_service/base_state.json",
                hex
            ))
        );
    }
}
