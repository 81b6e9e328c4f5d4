//! Client session definition
//!
//! The command processor's view of a connected client: identity, display
//! name, room membership and the sending side of its outgoing queue.

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::SendError;
use crate::message::Message;
use crate::types::{ClientId, RoomId, UserId};

/// What the command processor does when a client's outgoing queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Evict the slow client and tear its connection down
    #[default]
    Disconnect,
    /// Discard the message for that client only
    Drop,
    /// Wait for space; a stalled client stalls every room
    Block,
}

/// Connected client information
///
/// Membership fields are only ever written by the command processor.
#[derive(Debug)]
pub struct ClientSession {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Stored user behind this connection
    pub user_id: UserId,
    /// Display name (the user's nickname)
    pub display_name: String,
    /// Room that chat messages go to
    pub current_room: Option<RoomId>,
    /// Every room whose member set holds this client
    pub joined: HashSet<RoomId>,
    /// Server → Client message queue
    pub sender: mpsc::Sender<Message>,
    /// Fired when the connection must close without draining its queue
    closer: oneshot::Sender<()>,
}

impl ClientSession {
    /// Create a new session with no room
    pub fn new(
        id: ClientId,
        user_id: UserId,
        display_name: String,
        sender: mpsc::Sender<Message>,
        closer: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            user_id,
            display_name,
            current_room: None,
            joined: HashSet::new(),
            sender,
            closer,
        }
    }

    /// Drop the session and tell its connection to close immediately
    ///
    /// Dropping alone only closes the outgoing queue, which is drained first.
    pub fn close(self) {
        let _ = self.closer.send(());
    }

    /// Send a message to this client, waiting for queue space
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Send a message without waiting
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Deliver a message according to the overflow policy
    ///
    /// `QueueFull` is only returned under `OverflowPolicy::Disconnect`;
    /// under `Drop` the message is discarded and delivery reports success.
    pub async fn deliver(&self, msg: Message, policy: OverflowPolicy) -> Result<(), SendError> {
        match policy {
            OverflowPolicy::Block => self.send(msg).await,
            OverflowPolicy::Drop => match self.try_send(msg) {
                Err(SendError::QueueFull) => {
                    warn!("Outgoing queue full for {}, message dropped", self.id);
                    Ok(())
                }
                other => other,
            },
            OverflowPolicy::Disconnect => self.try_send(msg),
        }
    }

    /// Mark the client as a member of `room_id` and make it the current room
    pub fn enter(&mut self, room_id: RoomId) {
        self.joined.insert(room_id);
        self.current_room = Some(room_id);
    }

    /// Forget membership of `room_id`, clearing the current room if it matches
    pub fn exit(&mut self, room_id: RoomId) {
        self.joined.remove(&room_id);
        if self.current_room == Some(room_id) {
            self.current_room = None;
        }
    }
}
