//! Wire codec
//!
//! Frame layout (big-endian):
//!
//! ```text
//! offset 0: 1 byte  message kind
//! offset 1: 4 bytes content length (<= MAX_PAYLOAD_SIZE)
//! offset 5: N bytes content
//! ```
//!
//! `decode` works on any `AsyncRead` and assembles frames across partial
//! reads, so it is safe to use directly on a socket read half.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::message::{Header, Message, MessageKind, HEADER_LEN, MAX_PAYLOAD_SIZE};

/// Encode a message into a single frame
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    encode_frame(msg.header(), msg.content())
}

/// Encode a header and content into a frame
///
/// The written length is always the content length; a header that
/// declares anything else is rejected.
pub fn encode_frame(header: Header, content: &[u8]) -> Result<Vec<u8>, ProtocolError> {
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

    let mut frame = Vec::with_capacity(HEADER_LEN + content.len());
    frame.push(u8::from(header.kind));
    frame.extend_from_slice(&(content.len() as u32).to_be_bytes());
    frame.extend_from_slice(content);
    Ok(frame)
}

/// Read one message from the stream
///
/// Returns `Ok(None)` when the stream ends exactly on a frame boundary,
/// which is how an orderly disconnect shows up. Ending anywhere else is
/// `ProtocolError::Truncated`.
pub async fn decode<R>(reader: &mut R) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: HEADER_LEN,
                received: filled,
            });
        }
        filled += n;
    }

    let kind = MessageKind::from(header[0]);
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if length as usize > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: length as usize,
        });
    }

    let mut content = vec![0u8; length as usize];
    let mut received = 0;
    while received < content.len() {
        let n = reader.read(&mut content[received..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: content.len(),
                received,
            });
        }
        received += n;
    }

    Message::from_parts(Header { kind, length }, content).map(Some)
}

/// Encode a message and write the whole frame
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
