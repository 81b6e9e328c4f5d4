//! Server lifecycle
//!
//! `Created -> Listening -> ShuttingDown -> Stopped`.
//!
//! `Server::start` binds the listener, loads stored rooms into a fresh
//! command processor, then runs the accept loop and the processor until a
//! `ServerHandle` asks it to stop. Stopping closes every connection; `start`
//! returns once that has been set in motion.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{handle_connection, ConnectionContext};
use crate::processor::CommandProcessor;
use crate::store::Store;

/// Server state as observed through a `ServerHandle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening(SocketAddr),
    ShuttingDown,
    Stopped,
}

/// The chat server
pub struct Server {
    config: Config,
    store: Arc<dyn Store>,
    state: watch::Sender<ServerState>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Cloneable control handle for a running server
#[derive(Clone)]
pub struct ServerHandle {
    state: watch::Receiver<ServerState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            store,
            state,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: self.state.subscribe(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Run the server until stopped
    ///
    /// Only a bind failure is returned as an error.
    pub async fn start(self) -> Result<(), ServerError> {
        let listener =
            TcpListener::bind(&self.config.listen)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: self.config.listen.clone(),
                    source,
                })?;
        let addr = listener.local_addr()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_capacity());
        let mut processor =
            CommandProcessor::new(cmd_rx, Arc::clone(&self.store), self.config.overflow);
        match self.store.list_rooms().await {
            Ok(rooms) => processor.load_rooms(rooms),
            Err(e) => warn!("Failed to load rooms from store: {}", e),
        }
        tokio::spawn(processor.run());

        self.state.send_replace(ServerState::Listening(addr));
        info!("Chat server listening on {}", addr);

        let ctx = ConnectionContext {
            cmd_tx,
            store: Arc::clone(&self.store),
            outgoing_capacity: self.config.outgoing_capacity(),
            shutdown: self.shutdown.subscribe(),
        };
        let mut stop_rx = self.shutdown.subscribe();
        let accept_task = tokio::spawn(accept_loop(listener, ctx));

        stop_requested(&mut stop_rx).await;

        info!("Shutting down server...");
        self.state.send_replace(ServerState::ShuttingDown);

        // The accept loop sees the same signal and drops the listener along
        // with its command sender; connection actors close their sockets.
        if let Err(e) = accept_task.await {
            error!("Accept task failed: {}", e);
        }

        self.state.send_replace(ServerState::Stopped);
        info!("Server stopped");
        Ok(())
    }
}

impl ServerHandle {
    /// Ask the server to stop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until the server is listening and return its address
    ///
    /// Returns None if it stops (or fails to bind) first.
    pub async fn wait_listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ServerState::Listening(addr) => return Some(addr),
                ServerState::ShuttingDown | ServerState::Stopped => return None,
                ServerState::Created => {}
            }
            if state.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Wait until the server reports `Stopped`
    pub async fn wait_stopped(&self) {
        let mut state = self.state.clone();
        while *state.borrow_and_update() != ServerState::Stopped {
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Resolves once a stop has been requested (or the signal is gone)
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Connection accept loop
async fn accept_loop(listener: TcpListener, ctx: ConnectionContext) {
    let mut stop_rx = ctx.shutdown.clone();
    loop {
        tokio::select! {
            _ = stop_requested(&mut stop_rx) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let ctx = ctx.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
        }
    }
    info!("Accept loop stopped");
}
