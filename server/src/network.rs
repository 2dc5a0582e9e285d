//! Server network layer handling WebSocket connections and the dispatch loop

use crate::registry::PlayerRegistry;
use crate::sync::SyncServer;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ConnectionId, ProtocolError, ServerMessage, DEFAULT_SPAWN_JITTER};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:3000`. Port 0 picks a free port.
    pub bind_addr: String,
    pub spawn_jitter: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            spawn_jitter: DEFAULT_SPAWN_JITTER,
        }
    }
}

/// Events sent from the acceptor and connection tasks to the dispatch loop
#[derive(Debug)]
pub enum NetworkEvent {
    /// A TCP socket was accepted; it gets an id before the WebSocket upgrade
    Accepted { stream: TcpStream, addr: SocketAddr },
    Text {
        client_id: ConnectionId,
        text: String,
    },
    ClientDisconnect {
        client_id: ConnectionId,
    },
}

/// WebSocket server that owns the sync state
///
/// Connection tasks never touch [`SyncServer`] directly; they forward
/// [`NetworkEvent`]s over an unbounded channel and the loop in
/// [`Server::run_until`] applies them one at a time.
pub struct Server {
    listener: TcpListener,
    sync: SyncServer,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            sync: SyncServer::new(PlayerRegistry::with_spawn_jitter(config.spawn_jitter)),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the task that accepts sockets and forwards them to the dispatch loop
    fn spawn_acceptor(
        listener: TcpListener,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if event_tx.send(NetworkEvent::Accepted { stream, addr }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Runs one connection: upgrade, forward inbound frames, drain the outbox
    ///
    /// The connection is already registered under `client_id` when this
    /// starts, so anything queued on `outbox` is delivered once the upgrade
    /// completes.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        client_id: ConnectionId,
        mut outbox: mpsc::UnboundedReceiver<ServerMessage>,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
    ) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                let _ = event_tx.send(NetworkEvent::ClientDisconnect { client_id });
                return;
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let send_task = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode {}: {}", message.event_name(), e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    debug!("Send to client {} failed: {}", client_id, e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if event_tx
                        .send(NetworkEvent::Text { client_id, text })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    let err =
                        ProtocolError::UnsupportedFrame(format!("{} binary bytes", data.len()));
                    warn!("Dropping message from connection {}: {}", client_id, err);
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} closed the connection", client_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error from client {}: {}", client_id, e);
                    break;
                }
            }
        }

        let _ = event_tx.send(NetworkEvent::ClientDisconnect { client_id });
        send_task.abort();
    }

    /// Applies one event to the sync state
    ///
    /// Accepted sockets are given the next id that is not live, registered,
    /// and only then handed to their own connection task. Allocation and
    /// registration happen in this loop, so two sockets can never share an id
    /// even after the counter wraps.
    fn handle_event(
        sync: &mut SyncServer,
        next_client_id: &mut ConnectionId,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
        event: NetworkEvent,
    ) {
        match event {
            NetworkEvent::Accepted { stream, addr } => {
                let client_id = next_free_id(sync, next_client_id);
                let (sender, outbox) = mpsc::unbounded_channel::<ServerMessage>();

                info!("Client {} connected from {}", client_id, addr);
                if !sync.connect(client_id, sender) {
                    return;
                }

                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    Self::handle_connection(stream, addr, client_id, outbox, event_tx).await;
                });
            }
            NetworkEvent::Text { client_id, text } => {
                sync.handle_text(client_id, &text);
            }
            NetworkEvent::ClientDisconnect { client_id } => {
                info!("Client {} disconnected", client_id);
                sync.disconnect(client_id);
            }
        }
    }

    /// Serves connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future,
    {
        let Server {
            listener,
            mut sync,
            event_tx,
            mut event_rx,
        } = self;

        let acceptor = Self::spawn_acceptor(listener, event_tx.clone());
        let mut next_client_id: ConnectionId = 1;

        tokio::pin!(shutdown);
        info!("Server started successfully");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => {
                            Self::handle_event(&mut sync, &mut next_client_id, &event_tx, event)
                        }
                        None => break,
                    }
                }
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        acceptor.abort();
        Ok(())
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(std::future::pending::<()>()).await
    }
}

/// Returns the first id at or after `next` that is not live, then advances
/// `next` past it. Ids start at 1 and wrap around without ever yielding 0.
fn next_free_id(sync: &SyncServer, next: &mut ConnectionId) -> ConnectionId {
    loop {
        let id = *next;
        *next = next.wrapping_add(1).max(1);
        if sync.phase(id).is_none() {
            return id;
        }
    }
}
