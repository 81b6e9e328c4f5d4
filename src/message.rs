//! Message protocol definitions
//!
//! A message is a small header (kind + content length) followed by at most
//! `MAX_PAYLOAD_SIZE` content bytes. The same type is used in both
//! directions; see `codec` for the byte layout.

use std::borrow::Cow;

use crate::error::ProtocolError;

/// Maximum content size of a single message
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Encoded header size: 1 byte kind + 4 bytes big-endian length
pub const HEADER_LEN: usize = 5;

/// Message kind
///
/// Closed set of known kinds. Bytes outside the set survive decoding as
/// `Unknown` so the receiver decides what to do with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Join a room by name
    JoinRoom,
    /// Create a room by name
    CreateRoom,
    /// Request (or carry) the room listing
    ListRooms,
    /// Leave a room by name
    Leave,
    /// Chat text
    Chat,
    /// Any other kind byte
    Unknown(u8),
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        match value {
            1 => MessageKind::JoinRoom,
            2 => MessageKind::CreateRoom,
            3 => MessageKind::ListRooms,
            4 => MessageKind::Leave,
            5 => MessageKind::Chat,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::JoinRoom => 1,
            MessageKind::CreateRoom => 2,
            MessageKind::ListRooms => 3,
            MessageKind::Leave => 4,
            MessageKind::Chat => 5,
            MessageKind::Unknown(other) => other,
        }
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageKind,
    pub length: u32,
}

/// A validated message
///
/// Immutable once built: the header length always equals the content
/// length and the content never exceeds `MAX_PAYLOAD_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    content: Vec<u8>,
}

impl Message {
    /// Build a message, deriving the header length from the content
    pub fn new(kind: MessageKind, content: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let content = content.into();
        if content.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: content.len(),
            });
        }
        let header = Header {
            kind,
            length: content.len() as u32,
        };
        Ok(Self { header, content })
    }

    /// Build a message from an explicit header
    ///
    /// Fails if the declared length disagrees with the content.
    pub fn from_parts(header: Header, content: Vec<u8>) -> Result<Self, ProtocolError> {
        if content.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: content.len(),
            });
        }
        if header.length as usize != content.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length,
                actual: content.len(),
            });
        }
        Ok(Self { header, content })
    }

    /// A content-less message of the given kind
    pub fn empty(kind: MessageKind) -> Self {
        Self {
            header: Header { kind, length: 0 },
            content: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Content as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
