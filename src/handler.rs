//! TCP connection handler
//!
//! Handles individual client connections: identity lookup, frame decoding,
//! and bidirectional communication with the command processor.
//!
//! Each connection runs a read task (socket -> ServerCommand) and a write
//! task (outgoing queue -> socket). Whichever ends first tears the
//! connection down; the session is always unregistered through the
//! command queue.
//!
//! A normal close drains the outgoing queue and shuts the write side down.
//! Eviction and server stop interrupt even a write that is stuck on a peer
//! that stopped reading, and reset the socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{ProtocolError, ServerError};
use crate::message::{Message, MessageKind};
use crate::processor::ServerCommand;
use crate::server::stop_requested;
use crate::store::{Store, User};
use crate::types::ClientId;

/// Everything a connection actor needs from the server
#[derive(Clone)]
pub struct ConnectionContext {
    /// Shared command queue
    pub cmd_tx: mpsc::Sender<ServerCommand>,
    /// Identity lookup
    pub store: Arc<dyn Store>,
    /// Outgoing queue capacity per client
    pub outgoing_capacity: usize,
    /// Server stop signal
    pub shutdown: watch::Receiver<bool>,
}

/// How a write task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteEnd {
    /// Queue closed and everything queued was written
    Drained,
    /// The socket refused a write
    Failed,
    /// The processor evicted the client
    Evicted,
    /// The server is stopping
    Stopped,
}

/// Handle a new TCP connection
///
/// Resolves the user, registers the session, runs the read and write
/// tasks and unregisters the session when either ends.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) -> Result<(), ServerError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let user = resolve_user(ctx.store.as_ref(), &peer_addr).await;

    // Generate client ID
    let client_id = ClientId::new();
    info!(
        "Client {} connected from {} as '{}'",
        client_id, peer_addr, user.nickname
    );

    // Create queue for server -> client messages
    let (msg_tx, msg_rx) = mpsc::channel::<Message>(ctx.outgoing_capacity);
    let (closer, closed) = oneshot::channel();

    // Register with the command processor
    if ctx
        .cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            user_id: user.id,
            display_name: user.nickname,
            sender: msg_tx,
            closer,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - processor closed", client_id);
        return Err(ServerError::ProcessorClosed);
    }

    let (reader, writer) = stream.into_split();

    let mut read_task = tokio::spawn(read_loop(
        client_id,
        reader,
        ctx.cmd_tx.clone(),
        ctx.shutdown.clone(),
    ));
    let mut write_task = tokio::spawn(write_loop(
        client_id,
        writer,
        msg_rx,
        closed,
        ctx.shutdown.clone(),
    ));

    // Wait for either task to complete
    let finished_write = tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", client_id);
            None
        }
        result = &mut write_task => {
            debug!("Write task completed for {}", client_id);
            Some(result)
        }
    };
    if finished_write.is_some() {
        read_task.abort();
    }

    // Unregister; the processor drops the queue sender, which lets the
    // write task drain and finish
    let _ = ctx
        .cmd_tx
        .send(ServerCommand::Disconnect { client_id })
        .await;

    let written = match finished_write {
        Some(result) => result,
        None => write_task.await,
    };
    match written {
        Ok((writer, end)) => close_writer(client_id, writer, end).await,
        Err(e) => error!("Write task for {} failed: {}", client_id, e),
    }

    info!("Client {} disconnected from {}", client_id, peer_addr);

    Ok(())
}

/// Find the user for a remote address, creating a guest if needed
///
/// Store failures never refuse the connection; an unsaved guest is used.
async fn resolve_user(store: &dyn Store, remote_addr: &str) -> User {
    match store.get_user_by_remote_addr(remote_addr).await {
        Ok(Some(user)) => return user,
        Ok(None) => {}
        Err(e) => warn!("User lookup for {} failed: {}", remote_addr, e),
    }

    let user = User::guest(remote_addr);
    if let Err(e) = store.save_user(&user).await {
        warn!("Failed to save user {}: {}", user.id, e);
    }
    user
}

/// Read loop: decode frames and forward them as commands
///
/// Ends on clean close, decode error, server stop, or a closed command
/// queue.
async fn read_loop<R>(
    client_id: ClientId,
    mut reader: R,
    cmd_tx: mpsc::Sender<ServerCommand>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let decoded = tokio::select! {
            _ = stop_requested(&mut shutdown) => {
                debug!("Server stopping, closing connection for {}", client_id);
                break;
            }
            decoded = codec::decode(&mut reader) => decoded,
        };

        let msg = match decoded {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("Client {} closed the connection", client_id);
                break;
            }
            Err(e) => {
                warn!("Failed to decode message from {}: {}", client_id, e);
                break;
            }
        };

        let Some(cmd) = message_to_command(client_id, msg) else {
            continue;
        };
        if cmd_tx.send(cmd).await.is_err() {
            debug!("Processor closed, ending read task for {}", client_id);
            break;
        }
    }
    debug!("Read task ended for {}", client_id);
}

/// Write loop: drain the outgoing queue onto the socket
///
/// Ends when the queue closes, a write fails, the client is evicted or the
/// server stops. The last two abandon any write in progress. The writer is
/// handed back so the caller decides how to close it.
async fn write_loop<W>(
    client_id: ClientId,
    mut writer: W,
    mut msg_rx: mpsc::Receiver<Message>,
    closed: oneshot::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) -> (W, WriteEnd)
where
    W: AsyncWrite + Unpin,
{
    let evicted = evicted(closed);
    tokio::pin!(evicted);

    let end = loop {
        tokio::select! {
            _ = &mut evicted => break WriteEnd::Evicted,
            _ = stop_requested(&mut shutdown) => break WriteEnd::Stopped,
            next = write_next(client_id, &mut writer, &mut msg_rx) => {
                if let Some(end) = next {
                    break end;
                }
            }
        }
    };
    debug!("Write task ended for {} ({:?})", client_id, end);

    (writer, end)
}

/// Write the next queued message; `Some` once the loop should end
async fn write_next<W>(
    client_id: ClientId,
    writer: &mut W,
    msg_rx: &mut mpsc::Receiver<Message>,
) -> Option<WriteEnd>
where
    W: AsyncWrite + Unpin,
{
    let Some(msg) = msg_rx.recv().await else {
        return Some(WriteEnd::Drained);
    };
    match codec::write_message(writer, &msg).await {
        Ok(()) => None,
        Err(ProtocolError::Io(e)) => {
            warn!("Write to {} failed: {}", client_id, e);
            Some(WriteEnd::Failed)
        }
        Err(e) => {
            error!("Failed to encode message for {}: {}", client_id, e);
            // Continue - one bad message does not kill the connection
            None
        }
    }
}

/// Resolves when the processor fires the closer; a dropped closer never does
async fn evicted(closed: oneshot::Receiver<()>) {
    if closed.await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Close the write side of the socket
///
/// Evicted and stopped connections are reset so unsent data is discarded
/// instead of waiting on the peer.
async fn close_writer(client_id: ClientId, mut writer: OwnedWriteHalf, end: WriteEnd) {
    match end {
        WriteEnd::Drained | WriteEnd::Failed => {
            let _ = writer.shutdown().await;
        }
        WriteEnd::Evicted | WriteEnd::Stopped => {
            debug!("Resetting connection for {} ({:?})", client_id, end);
            if let Err(e) = reset_on_close(&writer) {
                warn!("Failed to reset connection for {}: {}", client_id, e);
            }
        }
    }
}

#[allow(deprecated)]
fn reset_on_close(writer: &OwnedWriteHalf) -> std::io::Result<()> {
    writer.as_ref().set_linger(Some(Duration::ZERO))
}

/// Convert a decoded Message to a ServerCommand
///
/// Unknown kinds and unusable room names are dropped.
fn message_to_command(client_id: ClientId, msg: Message) -> Option<ServerCommand> {
    match msg.kind() {
        MessageKind::Chat => Some(ServerCommand::ChatToRoom {
            client_id,
            content: msg.into_content(),
        }),
        MessageKind::ListRooms => Some(ServerCommand::ListRooms { client_id }),
        MessageKind::JoinRoom => {
            room_name(client_id, msg).map(|room| ServerCommand::JoinRoom { client_id, room })
        }
        MessageKind::CreateRoom => {
            room_name(client_id, msg).map(|name| ServerCommand::CreateRoom { client_id, name })
        }
        MessageKind::Leave => {
            room_name(client_id, msg).map(|room| ServerCommand::LeaveRoom { client_id, room })
        }
        MessageKind::Unknown(kind) => {
            warn!("Unhandled message kind {} from {}", kind, client_id);
            None
        }
    }
}

/// Room name carried as content: UTF-8, trimmed, non-empty
fn room_name(client_id: ClientId, msg: Message) -> Option<String> {
    let kind = msg.kind();
    let Ok(name) = String::from_utf8(msg.into_content()) else {
        warn!("Non UTF-8 room name in {:?} from {}", kind, client_id);
        return None;
    };
    let name = name.trim();
    if name.is_empty() {
        warn!("Empty room name in {:?} from {}", kind, client_id);
        return None;
    }
    Some(name.to_string())
}
