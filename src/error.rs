//! Error types for the chat server
//!
//! Defines wire protocol errors, store errors, server lifecycle errors
//! and outgoing queue send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::message::MAX_PAYLOAD_SIZE;

/// Wire protocol errors
///
/// All of these are fatal for the connection that produced them,
/// never for the server. A clean close is not an error: `codec::decode`
/// reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Content (or a declared length) above the maximum payload size
    #[error("payload of {size} bytes exceeds maximum of {max} bytes", max = MAX_PAYLOAD_SIZE)]
    PayloadTooLarge { size: usize },

    /// Header length disagrees with the actual content length
    #[error("header declares {declared} bytes but content has {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    /// Stream ended in the middle of a frame
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    /// IO error while reading or writing a frame
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Store collaborator errors
///
/// Logged by callers, never sent to clients.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Server lifecycle errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address (the only fatal startup error)
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The command processor is no longer accepting commands
    #[error("command processor closed")]
    ProcessorClosed,
}

/// Outgoing queue send errors
///
/// Occurs when delivering messages to a client's outgoing queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The bounded queue has no free slot
    #[error("Queue full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_message() {
        let err = ProtocolError::PayloadTooLarge { size: 1025 };
        assert_eq!(
            err.to_string(),
            "payload of 1025 bytes exceeds maximum of 1024 bytes"
        );
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error as _;

        let err = ServerError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to listen on 127.0.0.1:1"));
        assert!(err.source().is_some());
    }
}
