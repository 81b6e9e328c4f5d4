//! Store collaborator
//!
//! The server only talks to persistence through the `Store` trait.
//! `MemoryStore` keeps everything in process; `file_store::JsonFileStore`
//! adds a JSON snapshot on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{RoomId, UserId};

/// A known user, identified by the remote address it connects from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    pub remote_addr: String,
}

impl User {
    /// New user with a random `guest-NNNN` nickname
    pub fn guest(remote_addr: &str) -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
        Self {
            id: UserId::new(),
            nickname: format!("guest-{}", suffix),
            remote_addr: remote_addr.to_string(),
        }
    }
}

/// Persisted room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
}

/// Persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: uuid::Uuid,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatRecord {
    pub fn new(room_id: RoomId, user_id: UserId, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            room_id,
            user_id,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Persistence for users, rooms and chat messages
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a user by id
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn get_user_by_remote_addr(&self, remote_addr: &str)
        -> Result<Option<User>, StoreError>;

    /// Insert or replace a room by id
    async fn save_room(&self, room: &RoomRecord) -> Result<(), StoreError>;
    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError>;

    async fn save_message(&self, message: &ChatRecord) -> Result<(), StoreError>;
    /// Up to `limit` messages of a room, most recent first
    async fn list_messages_by_room(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatRecord>, StoreError>;
}

/// Plain record collections shared by the store implementations
///
/// Only users and rooms belong to the serialized snapshot; chat history
/// is kept apart because it only ever grows.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Records {
    pub users: Vec<User>,
    pub rooms: Vec<RoomRecord>,
    #[serde(skip)]
    pub messages: Vec<ChatRecord>,
}

impl Records {
    pub fn upsert_user(&mut self, user: &User) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => self.users.push(user.clone()),
        }
    }

    pub fn user_by_id(&self, id: UserId) -> Option<User> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    pub fn user_by_remote_addr(&self, remote_addr: &str) -> Option<User> {
        self.users
            .iter()
            .find(|u| u.remote_addr == remote_addr)
            .cloned()
    }

    pub fn upsert_room(&mut self, room: &RoomRecord) {
        match self.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => *existing = room.clone(),
            None => self.rooms.push(room.clone()),
        }
    }

    pub fn messages_by_room(&self, room_id: RoomId, limit: usize) -> Vec<ChatRecord> {
        // Appended in arrival order, so newest is last
        self.messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        self.records.lock().await.upsert_user(user);
        Ok(())
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
        self.records.lock().await.upsert_room(room);
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(self.records.lock().await.rooms.clone())
    }

    async fn save_message(&self, message: &ChatRecord) -> Result<(), StoreError> {
        self.records.lock().await.messages.push(message.clone());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_nickname() {
        let user = User::guest("127.0.0.1:50000");
        assert!(user.nickname.starts_with("guest-"));
        assert_eq!(user.nickname.len(), "guest-".len() + 4);
        assert_eq!(user.remote_addr, "127.0.0.1:50000");
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let store = MemoryStore::new();
        let user = User::guest("10.0.0.1:4000");
        store.save_user(&user).await.unwrap();

        assert_eq!(store.get_user_by_id(user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            store.get_user_by_remote_addr("10.0.0.1:4000").await.unwrap(),
            Some(user)
        );
        assert!(store
            .get_user_by_remote_addr("10.0.0.2:4000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_user_replaces_by_id() {
        let store = MemoryStore::new();
        let mut user = User::guest("10.0.0.1:4000");
        store.save_user(&user).await.unwrap();

        user.nickname = "alice".to_string();
        store.save_user(&user).await.unwrap();

        let found = store.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(found.nickname, "alice");
    }

    #[tokio::test]
    async fn test_rooms() {
        let store = MemoryStore::new();
        let room = RoomRecord {
            id: RoomId::new(),
            name: "general".to_string(),
        };
        store.save_room(&room).await.unwrap();
        store.save_room(&room).await.unwrap();

        assert_eq!(store.list_rooms().await.unwrap(), vec![room]);
    }

    #[tokio::test]
    async fn test_messages_most_recent_first_with_limit() {
        let store = MemoryStore::new();
        let room = RoomId::new();
        let other = RoomId::new();
        let user = UserId::new();

        for text in ["one", "two", "three"] {
            store
                .save_message(&ChatRecord::new(room, user, text.to_string()))
                .await
                .unwrap();
        }
        store
            .save_message(&ChatRecord::new(other, user, "elsewhere".to_string()))
            .await
            .unwrap();

        let latest = store.list_messages_by_room(room, 2).await.unwrap();
        let contents: Vec<_> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "two"]);
    }
}
