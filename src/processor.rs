//! Command processor
//!
//! The single consumer of the command queue. It owns the client registry
//! and the room registry outright; every connect, disconnect and room
//! operation is applied here, one command at a time, in queue order.
//!
//! Chat history is handed to a separate writer task so a slow store never
//! holds up the queue.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{ClientSession, OverflowPolicy};
use crate::error::SendError;
use crate::message::{Message, MessageKind, MAX_PAYLOAD_SIZE};
use crate::room::{Room, RoomRegistry};
use crate::store::{ChatRecord, RoomRecord, Store};
use crate::types::{ClientId, RoomId, UserId};

/// Chat records waiting for the history writer
const HISTORY_QUEUE_CAPACITY: usize = 1024;

/// Commands sent from connection actors to the command processor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    Connect {
        client_id: ClientId,
        user_id: UserId,
        display_name: String,
        sender: mpsc::Sender<Message>,
        /// Fired if the client is evicted
        closer: oneshot::Sender<()>,
    },
    /// Client disconnected
    Disconnect { client_id: ClientId },
    /// Create a room by name
    CreateRoom { client_id: ClientId, name: String },
    /// Join a room by name
    JoinRoom { client_id: ClientId, room: String },
    /// Leave a room by name
    LeaveRoom { client_id: ClientId, room: String },
    /// Chat to the sender's current room
    ChatToRoom { client_id: ClientId, content: Vec<u8> },
    /// Send the room listing back to the client
    ListRooms { client_id: ClientId },
}

/// The command processor actor
///
/// Processes commands from connection actors. No locks: nothing else
/// can reach the registries.
pub struct CommandProcessor {
    /// All connected clients: ClientId -> ClientSession
    clients: HashMap<ClientId, ClientSession>,
    /// All rooms
    rooms: RoomRegistry,
    /// Persistence collaborator
    store: Arc<dyn Store>,
    /// Queue into the history writer task
    history: mpsc::Sender<ChatRecord>,
    /// Full outgoing queue handling
    overflow: OverflowPolicy,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl CommandProcessor {
    /// Create a new processor with the given command receiver
    ///
    /// Spawns the history writer, so this must run inside a tokio runtime.
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        store: Arc<dyn Store>,
        overflow: OverflowPolicy,
    ) -> Self {
        let (history, history_rx) = mpsc::channel(HISTORY_QUEUE_CAPACITY);
        tokio::spawn(write_history(Arc::clone(&store), history_rx));

        Self {
            clients: HashMap::new(),
            rooms: RoomRegistry::new(),
            store,
            history,
            overflow,
            receiver,
        }
    }

    /// Seed the room registry from stored rooms
    pub fn load_rooms(&mut self, records: Vec<RoomRecord>) {
        for record in records {
            let name = record.name.clone();
            if !self.rooms.insert(record.id, record.name) {
                warn!("Skipping duplicate stored room {} ({})", name, record.id);
            }
        }
        info!("Loaded {} rooms from store", self.rooms.len());
    }

    /// Run the processor event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("Command processor started");
        self.process_all().await;
        info!("Command processor shutting down");
    }

    async fn process_all(&mut self) {
        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                client_id,
                user_id,
                display_name,
                sender,
                closer,
            } => {
                self.handle_connect(client_id, user_id, display_name, sender, closer);
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id);
            }
            ServerCommand::CreateRoom { client_id, name } => {
                self.handle_create_room(client_id, name).await;
            }
            ServerCommand::JoinRoom { client_id, room } => {
                self.handle_join_room(client_id, &room);
            }
            ServerCommand::LeaveRoom { client_id, room } => {
                self.handle_leave_room(client_id, &room);
            }
            ServerCommand::ChatToRoom { client_id, content } => {
                self.handle_chat(client_id, content).await;
            }
            ServerCommand::ListRooms { client_id } => {
                self.handle_list_rooms(client_id).await;
            }
        }
    }

    /// Handle new client connection
    fn handle_connect(
        &mut self,
        client_id: ClientId,
        user_id: UserId,
        display_name: String,
        sender: mpsc::Sender<Message>,
        closer: oneshot::Sender<()>,
    ) {
        info!("Client {} registered as '{}'", client_id, display_name);
        let session = ClientSession::new(client_id, user_id, display_name, sender, closer);
        if self.clients.insert(client_id, session).is_some() {
            warn!("Client {} was already registered, session replaced", client_id);
        }
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
    }

    /// Handle client disconnection
    fn handle_disconnect(&mut self, client_id: ClientId) {
        if self.remove_client(client_id).is_some() {
            info!("Client {} unregistered", client_id);
        } else {
            debug!("Disconnect for unknown client {}", client_id);
        }
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.len()
        );
    }

    /// Handle room creation
    ///
    /// Registration happens first; persistence is best effort.
    async fn handle_create_room(&mut self, client_id: ClientId, name: String) {
        let (room_id, created) = self.rooms.create(&name);
        if !created {
            debug!(
                "Client {} asked to create existing room '{}' ({})",
                client_id, name, room_id
            );
            return;
        }

        info!("Client {} created room '{}' ({})", client_id, name, room_id);

        let record = RoomRecord { id: room_id, name };
        if let Err(e) = self.store.save_room(&record).await {
            warn!("Failed to persist room {}: {}", room_id, e);
        }
    }

    /// Handle room joining
    ///
    /// Joining does not leave the previous room; the client stays in that
    /// room's member set until it sends an explicit leave.
    fn handle_join_room(&mut self, client_id: ClientId, room: &str) {
        let Some(room_id) = self.rooms.find_by_name(room) else {
            debug!("Client {} tried to join unknown room '{}'", client_id, room);
            return;
        };
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };

        client.enter(room_id);
        self.rooms.add_member(room_id, client_id);

        info!(
            "Client {} joined room '{}' ({} members)",
            client_id,
            room,
            self.member_count(room_id)
        );
    }

    /// Handle room leaving
    fn handle_leave_room(&mut self, client_id: ClientId, room: &str) {
        let Some(room_id) = self.rooms.find_by_name(room) else {
            return;
        };

        if self.rooms.remove_member(room_id, client_id) {
            info!(
                "Client {} left room '{}' ({} members)",
                client_id,
                room,
                self.member_count(room_id)
            );
        }
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.exit(room_id);
        }
    }

    /// Handle chat message
    ///
    /// Goes to every other member of the sender's current room.
    async fn handle_chat(&mut self, client_id: ClientId, content: Vec<u8>) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let Some(room_id) = client.current_room else {
            debug!("Client {} chatted without a current room", client_id);
            return;
        };
        let user_id = client.user_id;

        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let recipients: Vec<ClientId> = room.others(client_id).collect();

        let msg = match Message::new(MessageKind::Chat, content) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping chat from {}: {}", client_id, e);
                return;
            }
        };

        for recipient in recipients {
            self.deliver(recipient, msg.clone()).await;
        }

        let record = ChatRecord::new(room_id, user_id, msg.text().into_owned());
        match self.history.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("History queue full, chat in room {} not persisted", room_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("History writer gone, chat in room {} not persisted", room_id);
            }
        }
    }

    /// Handle room listing request
    async fn handle_list_rooms(&mut self, client_id: ClientId) {
        if !self.clients.contains_key(&client_id) {
            return;
        }

        let listing = room_listing(&self.rooms.list_names());
        match Message::new(MessageKind::ListRooms, listing) {
            Ok(msg) => self.deliver(client_id, msg).await,
            Err(e) => warn!("Failed to build room listing: {}", e),
        }
    }

    /// Helper: Push a message onto a client's outgoing queue
    ///
    /// Applies the overflow policy; under `Disconnect` a full queue evicts
    /// the client.
    async fn deliver(&mut self, client_id: ClientId, msg: Message) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };

        match client.deliver(msg, self.overflow).await {
            Ok(()) => {}
            Err(SendError::ChannelClosed) => {
                debug!("Outgoing queue closed for {}", client_id);
            }
            Err(SendError::QueueFull) => {
                warn!("Outgoing queue full for {}, disconnecting", client_id);
                if let Some(client) = self.remove_client(client_id) {
                    client.close();
                }
            }
        }
    }

    /// Helper: Remove a client from every room it belongs to, then from
    /// the client registry
    ///
    /// Dropping the returned session drops the queue sender, which ends
    /// the connection's write loop once the queue is drained.
    fn remove_client(&mut self, client_id: ClientId) -> Option<ClientSession> {
        let client = self.clients.remove(&client_id)?;
        for room_id in &client.joined {
            self.rooms.remove_member(*room_id, client_id);
        }
        Some(client)
    }

    fn member_count(&self, room_id: RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, Room::member_count)
    }

    #[cfg(test)]
    fn is_member(&self, room: &str, client_id: ClientId) -> bool {
        self.rooms
            .find_by_name(room)
            .and_then(|id| self.rooms.get(id))
            .is_some_and(|room| room.contains(client_id))
    }

    #[cfg(test)]
    fn current_room(&self, client_id: ClientId) -> Option<RoomId> {
        self.clients.get(&client_id).and_then(|c| c.current_room)
    }
}

/// History writer: persists chat records in arrival order
async fn write_history(store: Arc<dyn Store>, mut records: mpsc::Receiver<ChatRecord>) {
    while let Some(record) = records.recv().await {
        if let Err(e) = store.save_message(&record).await {
            warn!("Failed to persist message in room {}: {}", record.room_id, e);
        }
    }
    debug!("History writer stopped");
}

/// Newline-joined room names, cut at a name boundary to fit one message
fn room_listing(names: &[&str]) -> String {
    let mut listing = String::new();
    for name in names {
        let needed = if listing.is_empty() {
            name.len()
        } else {
            name.len() + 1
        };
        if listing.len() + needed > MAX_PAYLOAD_SIZE {
            warn!(
                "Room listing truncated at {} bytes ({} rooms)",
                listing.len(),
                names.len()
            );
            break;
        }
        if !listing.is_empty() {
            listing.push('\n');
        }
        listing.push_str(name);
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, User};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Store whose every operation fails
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn save_user(&self, _user: &User) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get_user_by_id(&self, _id: UserId) -> Result<Option<User>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get_user_by_remote_addr(
            &self,
            _remote_addr: &str,
        ) -> Result<Option<User>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn save_room(&self, _room: &RoomRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn save_message(&self, _message: &ChatRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_messages_by_room(
            &self,
            _room_id: RoomId,
            _limit: usize,
        ) -> Result<Vec<ChatRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    /// Store whose message saves never complete
    struct StalledStore;

    #[async_trait]
    impl Store for StalledStore {
        async fn save_user(&self, _user: &User) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_user_by_id(&self, _id: UserId) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn get_user_by_remote_addr(
            &self,
            _remote_addr: &str,
        ) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn save_room(&self, _room: &RoomRecord) -> Result<(), StoreError> {
            Ok(())
        }
        async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn save_message(&self, _message: &ChatRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn list_messages_by_room(
            &self,
            _room_id: RoomId,
            _limit: usize,
        ) -> Result<Vec<ChatRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn processor_with(
        store: Arc<dyn Store>,
        overflow: OverflowPolicy,
    ) -> (CommandProcessor, mpsc::Sender<ServerCommand>) {
        let (tx, rx) = mpsc::channel(64);
        (CommandProcessor::new(rx, store, overflow), tx)
    }

    fn processor() -> (CommandProcessor, mpsc::Sender<ServerCommand>) {
        processor_with(Arc::new(MemoryStore::new()), OverflowPolicy::Disconnect)
    }

    async fn connect_with_closer(
        processor: &mut CommandProcessor,
        capacity: usize,
    ) -> (ClientId, mpsc::Receiver<Message>, oneshot::Receiver<()>) {
        let client_id = ClientId::new();
        let (tx, rx) = mpsc::channel(capacity);
        let (closer, closed) = oneshot::channel();
        processor
            .handle_command(ServerCommand::Connect {
                client_id,
                user_id: UserId::new(),
                display_name: "guest-0000".to_string(),
                sender: tx,
                closer,
            })
            .await;
        (client_id, rx, closed)
    }

    async fn connect(
        processor: &mut CommandProcessor,
        capacity: usize,
    ) -> (ClientId, mpsc::Receiver<Message>) {
        let (client_id, rx, _) = connect_with_closer(processor, capacity).await;
        (client_id, rx)
    }

    /// Wait for the history writer to catch up
    async fn stored_history(
        store: &MemoryStore,
        room_id: RoomId,
        expected: usize,
    ) -> Vec<ChatRecord> {
        timeout(Duration::from_secs(2), async {
            loop {
                let history = store.list_messages_by_room(room_id, 100).await.unwrap();
                if history.len() >= expected {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history was not written")
    }

    async fn create(processor: &mut CommandProcessor, client_id: ClientId, name: &str) {
        processor
            .handle_command(ServerCommand::CreateRoom {
                client_id,
                name: name.to_string(),
            })
            .await;
    }

    async fn join(processor: &mut CommandProcessor, client_id: ClientId, room: &str) {
        processor
            .handle_command(ServerCommand::JoinRoom {
                client_id,
                room: room.to_string(),
            })
            .await;
    }

    async fn chat(processor: &mut CommandProcessor, client_id: ClientId, text: &str) {
        processor
            .handle_command(ServerCommand::ChatToRoom {
                client_id,
                content: text.as_bytes().to_vec(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_create_room_registers_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let (mut processor, _tx) = processor_with(store.clone(), OverflowPolicy::Disconnect);
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "general").await;

        let room_id = processor.rooms.find_by_name("general").unwrap();
        let stored = store.list_rooms().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, room_id);
        assert_eq!(stored[0].name, "general");
    }

    #[tokio::test]
    async fn test_create_existing_room_is_not_duplicated() {
        let store = Arc::new(MemoryStore::new());
        let (mut processor, _tx) = processor_with(store.clone(), OverflowPolicy::Disconnect);
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "general").await;
        create(&mut processor, alice, "general").await;

        assert_eq!(processor.rooms.len(), 1);
        assert_eq!(store.list_rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_room_survives_store_failure() {
        let (mut processor, _tx) =
            processor_with(Arc::new(FailingStore), OverflowPolicy::Disconnect);
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "general").await;
        join(&mut processor, alice, "general").await;

        assert!(processor.is_member("general", alice));
    }

    #[tokio::test]
    async fn test_chat_reaches_room_members_only() {
        let (mut processor, _tx) = processor();
        let (alice, mut alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx) = connect(&mut processor, 10).await;
        let (carol, mut carol_rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        create(&mut processor, alice, "y").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, bob, "x").await;
        join(&mut processor, carol, "y").await;

        chat(&mut processor, alice, "hello x").await;

        let received = bob_rx.try_recv().unwrap();
        assert_eq!(received.kind(), MessageKind::Chat);
        assert_eq!(received.text(), "hello x");
        assert!(carol_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_alone_delivers_nothing() {
        let (mut processor, _tx) = processor();
        let (alice, mut alice_rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        chat(&mut processor, alice, "anyone?").await;

        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_without_room_is_noop() {
        let (mut processor, _tx) = processor();
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx) = connect(&mut processor, 10).await;

        create(&mut processor, bob, "x").await;
        join(&mut processor, bob, "x").await;
        chat(&mut processor, alice, "hello?").await;

        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let (mut processor, _tx) = processor_with(store.clone(), OverflowPolicy::Disconnect);
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        chat(&mut processor, alice, "for the record").await;

        let room_id = processor.rooms.find_by_name("x").unwrap();
        let history = stored_history(&store, room_id, 1).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "for the record");
    }

    #[tokio::test]
    async fn test_history_keeps_chat_order() {
        let store = Arc::new(MemoryStore::new());
        let (mut processor, _tx) = processor_with(store.clone(), OverflowPolicy::Disconnect);
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        for text in ["first", "second", "third"] {
            chat(&mut processor, alice, text).await;
        }

        let room_id = processor.rooms.find_by_name("x").unwrap();
        let history = stored_history(&store, room_id, 3).await;
        let newest_first: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(newest_first, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_stalled_store_does_not_hold_up_chat() {
        let (mut processor, _tx) =
            processor_with(Arc::new(StalledStore), OverflowPolicy::Disconnect);
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, bob, "x").await;

        timeout(Duration::from_secs(1), async {
            for text in ["one", "two", "three"] {
                chat(&mut processor, alice, text).await;
            }
        })
        .await
        .expect("chat waited on the store");

        for text in ["one", "two", "three"] {
            assert_eq!(bob_rx.try_recv().unwrap().text(), text);
        }
    }

    #[tokio::test]
    async fn test_join_second_room_keeps_first_membership() {
        let (mut processor, _tx) = processor();
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        create(&mut processor, alice, "y").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, alice, "y").await;

        assert!(processor.is_member("x", alice));
        assert!(processor.is_member("y", alice));
        assert_eq!(
            processor.current_room(alice),
            processor.rooms.find_by_name("y")
        );
    }

    #[tokio::test]
    async fn test_join_unknown_room_or_client_is_ignored() {
        let (mut processor, _tx) = processor();
        let (alice, _rx) = connect(&mut processor, 10).await;
        let stranger = ClientId::new();

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "nowhere").await;
        join(&mut processor, stranger, "x").await;

        assert!(processor.current_room(alice).is_none());
        assert!(!processor.is_member("x", stranger));
    }

    #[tokio::test]
    async fn test_leave_room() {
        let (mut processor, _tx) = processor();
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        create(&mut processor, alice, "y").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, alice, "y").await;

        // Leaving a non-current room keeps the current room
        processor
            .handle_command(ServerCommand::LeaveRoom {
                client_id: alice,
                room: "x".to_string(),
            })
            .await;
        assert!(!processor.is_member("x", alice));
        assert_eq!(
            processor.current_room(alice),
            processor.rooms.find_by_name("y")
        );

        processor
            .handle_command(ServerCommand::LeaveRoom {
                client_id: alice,
                room: "y".to_string(),
            })
            .await;
        assert!(!processor.is_member("y", alice));
        assert!(processor.current_room(alice).is_none());

        // Leaving again, or leaving an unknown room, is a no-op
        processor
            .handle_command(ServerCommand::LeaveRoom {
                client_id: alice,
                room: "y".to_string(),
            })
            .await;
        processor
            .handle_command(ServerCommand::LeaveRoom {
                client_id: alice,
                room: "nowhere".to_string(),
            })
            .await;
        assert!(processor.current_room(alice).is_none());
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let (mut processor, _tx) = processor();
        let (alice, mut rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "general").await;
        create(&mut processor, alice, "random").await;
        processor
            .handle_command(ServerCommand::ListRooms { client_id: alice })
            .await;

        let response = rx.try_recv().unwrap();
        assert_eq!(response.kind(), MessageKind::ListRooms);
        let text = response.text();
        let mut names: Vec<&str> = text.lines().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["general", "random"]);
    }

    #[tokio::test]
    async fn test_list_rooms_for_unknown_client_is_noop() {
        let (mut processor, _tx) = processor();
        processor
            .handle_command(ServerCommand::ListRooms {
                client_id: ClientId::new(),
            })
            .await;
    }

    #[test]
    fn test_room_listing_fits_one_message() {
        let long = "r".repeat(300);
        let names: Vec<&str> = (0..5).map(|_| long.as_str()).collect();

        let listing = room_listing(&names);
        assert!(listing.len() <= MAX_PAYLOAD_SIZE);
        assert_eq!(listing.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_removes_from_every_room() {
        let (mut processor, _tx) = processor();
        let (alice, _rx) = connect(&mut processor, 10).await;

        create(&mut processor, alice, "x").await;
        create(&mut processor, alice, "y").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, alice, "y").await;

        processor
            .handle_command(ServerCommand::Disconnect { client_id: alice })
            .await;

        assert!(!processor.clients.contains_key(&alice));
        assert!(!processor.is_member("x", alice));
        assert!(!processor.is_member("y", alice));
    }

    #[tokio::test]
    async fn test_commands_apply_in_queue_order() {
        let (mut processor, tx) = processor();
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, _bob_rx) = connect(&mut processor, 10).await;

        let commands = vec![
            ServerCommand::CreateRoom {
                client_id: alice,
                name: "x".into(),
            },
            ServerCommand::JoinRoom {
                client_id: alice,
                room: "x".into(),
            },
            ServerCommand::JoinRoom {
                client_id: bob,
                room: "x".into(),
            },
            ServerCommand::LeaveRoom {
                client_id: alice,
                room: "x".into(),
            },
            ServerCommand::CreateRoom {
                client_id: bob,
                name: "y".into(),
            },
            ServerCommand::JoinRoom {
                client_id: alice,
                room: "y".into(),
            },
            ServerCommand::LeaveRoom {
                client_id: bob,
                room: "x".into(),
            },
            ServerCommand::JoinRoom {
                client_id: bob,
                room: "x".into(),
            },
        ];
        for cmd in commands {
            tx.send(cmd).await.unwrap();
        }
        drop(tx);

        processor.process_all().await;

        assert!(!processor.is_member("x", alice));
        assert!(processor.is_member("y", alice));
        assert!(processor.is_member("x", bob));
        assert!(!processor.is_member("y", bob));
    }

    #[tokio::test]
    async fn test_full_queue_disconnects_slow_client() {
        let (mut processor, _tx) = processor();
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx, bob_closed) = connect_with_closer(&mut processor, 1).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, bob, "x").await;

        chat(&mut processor, alice, "one").await;
        chat(&mut processor, alice, "two").await;

        assert!(!processor.clients.contains_key(&bob));
        assert!(!processor.is_member("x", bob));

        // The connection is told to close, and the queue is closed behind it
        assert_eq!(bob_closed.await, Ok(()));
        assert_eq!(bob_rx.recv().await.unwrap().text(), "one");
        assert!(bob_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_plain_disconnect_does_not_fire_closer() {
        let (mut processor, _tx) = processor();
        let (alice, _rx, alice_closed) = connect_with_closer(&mut processor, 10).await;

        processor
            .handle_command(ServerCommand::Disconnect { client_id: alice })
            .await;

        // Sender dropped without a close signal
        assert!(alice_closed.await.is_err());
    }

    #[tokio::test]
    async fn test_full_queue_block_policy_waits_and_delivers_in_order() {
        let (mut processor, _tx) =
            processor_with(Arc::new(MemoryStore::new()), OverflowPolicy::Block);
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx) = connect(&mut processor, 1).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, bob, "x").await;

        let texts = ["one", "two", "three", "four", "five"];
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            while received.len() < texts.len() {
                let Some(msg) = bob_rx.recv().await else {
                    break;
                };
                received.push(msg.text().into_owned());
            }
            received
        });

        timeout(Duration::from_secs(2), async {
            for text in texts {
                chat(&mut processor, alice, text).await;
            }
        })
        .await
        .expect("blocked delivery never resumed");

        let received = timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, texts);
        assert!(processor.is_member("x", bob));
    }

    #[tokio::test]
    async fn test_full_queue_drop_policy_keeps_client() {
        let (mut processor, _tx) =
            processor_with(Arc::new(MemoryStore::new()), OverflowPolicy::Drop);
        let (alice, _alice_rx) = connect(&mut processor, 10).await;
        let (bob, mut bob_rx) = connect(&mut processor, 1).await;

        create(&mut processor, alice, "x").await;
        join(&mut processor, alice, "x").await;
        join(&mut processor, bob, "x").await;

        chat(&mut processor, alice, "one").await;
        chat(&mut processor, alice, "two").await;

        assert!(processor.is_member("x", bob));
        assert_eq!(bob_rx.recv().await.unwrap().text(), "one");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_load_rooms() {
        let (mut processor, _tx) = processor();
        let general = RoomRecord {
            id: RoomId::new(),
            name: "general".into(),
        };
        let duplicate = RoomRecord {
            id: RoomId::new(),
            name: "general".into(),
        };

        processor.load_rooms(vec![general.clone(), duplicate]);

        assert_eq!(processor.rooms.len(), 1);
        assert_eq!(processor.rooms.find_by_name("general"), Some(general.id));
    }
}
