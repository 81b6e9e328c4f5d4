//! JSON file store
//!
//! Users and rooms live in a JSON snapshot that is rewritten after every
//! save. Chat history is appended to a sibling JSON-lines file, one record
//! per line, so a chat costs one short append however long the history is.
//!
//! ```text
//! room_chat.json           {"users": [...], "rooms": [...]}
//! room_chat.history.jsonl  {"id": ..., "room_id": ..., ...}\n
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{ChatRecord, Records, RoomRecord, Store, User};
use crate::types::{RoomId, UserId};

/// Store backed by a JSON snapshot plus a JSON-lines history file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    history_path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Open the store, loading whichever files exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let history_path = path.with_extension("history.jsonl");

        let mut records: Records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No store file at {}, starting empty", path.display());
                Records::default()
            }
            Err(e) => return Err(e.into()),
        };
        records.messages = load_history(&history_path).await?;

        info!(
            "Opened store {} ({} users, {} rooms, {} messages)",
            path.display(),
            records.users.len(),
            records.rooms.len(),
            records.messages.len()
        );
        Ok(Self {
            path,
            history_path,
            records: Mutex::new(records),
        })
    }

    /// Write the snapshot next to the target, then rename over it
    async fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn append_history(&self, message: &ChatRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read the history file; unreadable lines (a torn last write) are skipped
async fn load_history(path: &Path) -> Result<Vec<ChatRecord>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut messages = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(
                "Skipping history line {} of {}: {}",
                number + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(messages)
}

#[async_trait]
impl Store for JsonFileStore {
    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.upsert_user(user);
        self.persist(&records).await
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.records.lock().await.user_by_id(id))
    }

    async fn get_user_by_remote_addr(
        &self,
        remote_addr: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.records.lock().await.user_by_remote_addr(remote_addr))
    }

    async fn save_room(&self, room: &RoomRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.upsert_room(room);
        self.persist(&records).await
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(self.records.lock().await.rooms.clone())
    }

    async fn save_message(&self, message: &ChatRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        self.append_history(message).await?;
        records.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages_by_room(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatRecord>, StoreError> {
        Ok(self.records.lock().await.messages_by_room(room_id, limit))
    }
}
