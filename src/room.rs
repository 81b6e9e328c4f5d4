//! Room and room registry
//!
//! Pure in-memory state. Only the command processor holds a
//! `RoomRegistry`, so nothing here needs locking.

use std::collections::{HashMap, HashSet};

use crate::types::{ClientId, RoomId};

/// Chat room
///
/// Identity and name are fixed at creation; only the member set changes.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    name: String,
    members: HashSet<ClientId>,
}

impl Room {
    /// Create an empty room
    pub fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            members: HashSet::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a client is in this room
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains(&client_id)
    }

    /// Add a member; returns false if it was already present
    pub fn add_member(&mut self, client_id: ClientId) -> bool {
        self.members.insert(client_id)
    }

    /// Remove a member; returns false if it was not present
    pub fn remove_member(&mut self, client_id: ClientId) -> bool {
        self.members.remove(&client_id)
    }

    /// Members other than `client_id`
    pub fn others(&self, client_id: ClientId) -> impl Iterator<Item = ClientId> + '_ {
        self.members
            .iter()
            .copied()
            .filter(move |id| *id != client_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// All rooms, indexed by id and by name
///
/// Names are unique within the registry.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    by_name: HashMap<String, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a freshly allocated id
    ///
    /// If a room with this name already exists its id is returned and
    /// nothing is inserted; the bool tells whether a room was created.
    pub fn create(&mut self, name: &str) -> (RoomId, bool) {
        if let Some(id) = self.by_name.get(name) {
            return (*id, false);
        }
        let id = RoomId::new();
        self.insert(id, name.to_string());
        (id, true)
    }

    /// Insert a room with a known id (used when loading from the store)
    ///
    /// Returns false and leaves the registry untouched if the id or the
    /// name is already taken.
    pub fn insert(&mut self, id: RoomId, name: String) -> bool {
        if self.rooms.contains_key(&id) || self.by_name.contains_key(&name) {
            return false;
        }
        self.by_name.insert(name.clone(), id);
        self.rooms.insert(id, Room::new(id, name));
        true
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<RoomId> {
        self.by_name.get(name).copied()
    }

    /// Add a member; no-op for unknown rooms
    pub fn add_member(&mut self, id: RoomId, client_id: ClientId) -> bool {
        self.rooms
            .get_mut(&id)
            .is_some_and(|room| room.add_member(client_id))
    }

    /// Remove a member; no-op for unknown rooms or non-members
    pub fn remove_member(&mut self, id: RoomId, client_id: ClientId) -> bool {
        self.rooms
            .get_mut(&id)
            .is_some_and(|room| room.remove_member(client_id))
    }

    /// Room names in registry iteration order (unspecified)
    pub fn list_names(&self) -> Vec<&str> {
        self.rooms.values().map(Room::name).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
