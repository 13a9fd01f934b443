use super::error::TrackerError;
use super::registry::{PeerId, PublishOutcome, Registry, RemoveOutcome, TrackedFile};
use crate::protocol::{self, FileSuccessKind, Message, ProtocolError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Accepts node connections and serves the registry over framed messages.
///
/// Each connection runs in its own task. The first message on a connection
/// must be `Init`; the peer record it creates lives until the connection
/// closes.
pub struct TrackerServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl TrackerServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TrackerError> {
        Self::with_registry(addr, Arc::new(Registry::new())).await
    }

    pub async fn with_registry(
        addr: impl ToSocketAddrs,
        registry: Arc<Registry>,
    ) -> Result<Self, TrackerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Tracker listening on {}", listener.local_addr()?);
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TrackerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serves connections until `shutdown` flips to `true` or its sender is
    /// dropped, then waits for every connection task to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TrackerError> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept tracker connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Accepted connection from {}", addr);
                    let session = Session {
                        registry: self.registry.clone(),
                        remote: addr,
                        peer: None,
                    };
                    connections.spawn(session.run(stream, shutdown.clone()));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("Tracker shutting down");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

struct Session {
    registry: Arc<Registry>,
    remote: SocketAddr,
    peer: Option<PeerId>,
}

impl Session {
    async fn run(mut self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let (mut reader, mut writer) = protocol::split(stream);

        loop {
            let received = tokio::select! {
                received = reader.receive() => received,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let message = match received {
                Ok(message) => message,
                Err(ProtocolError::ConnectionClosed) => break,
                Err(e @ (ProtocolError::Io(_) | ProtocolError::FrameTooLarge(_))) => {
                    warn!("Dropping connection from {}: {}", self.remote, e);
                    break;
                }
                Err(e) => {
                    debug!("Ignoring malformed message from {}: {}", self.remote, e);
                    continue;
                }
            };

            match self.dispatch(message) {
                Ok(Some(reply)) => {
                    if let Err(e) = writer.send(&reply).await {
                        warn!("Failed to reply to {}: {}", self.remote, e);
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Request from {} failed: {}", self.remote, e),
            }
        }

        if let Some(peer) = self.peer {
            self.registry.unregister(peer);
        }
        let _ = writer.shutdown().await;
        debug!("Connection from {} closed", self.remote);
    }

    fn dispatch(&mut self, message: Message) -> Result<Option<Message>, TrackerError> {
        let message = match message {
            Message::Init { identity, port } => {
                let identity = if identity.is_empty() {
                    self.remote.ip().to_string()
                } else {
                    identity
                };
                if let Some(old) = self.peer.take() {
                    self.registry.unregister(old);
                }
                self.peer = Some(self.registry.register_peer(identity, port));
                return Ok(None);
            }
            other => other,
        };

        let peer = self.peer.ok_or(TrackerError::NotInitialized)?;

        let reply = match message {
            Message::PublishFile {
                name,
                size,
                file_hash,
                chunk_hashes,
            } => {
                let file = TrackedFile {
                    name: name.clone(),
                    size,
                    file_hash,
                    chunk_hashes,
                };
                match self.registry.publish_file(peer, file) {
                    Ok(PublishOutcome::Accepted) => Some(Message::FileSuccess {
                        name,
                        kind: FileSuccessKind::Publish,
                    }),
                    Ok(PublishOutcome::AlreadyExists) => Some(Message::AlreadyExists { name }),
                    // There is no dedicated rejection message; NotFound lets the
                    // publisher drop its pending entry.
                    Err(e @ TrackerError::InvalidFile { .. }) => {
                        warn!("Rejecting publish from {}: {}", self.remote, e);
                        Some(Message::NotFound { name })
                    }
                    Err(e) => return Err(e),
                }
            }
            Message::RequestFile { name } | Message::UpdateFile { name } => {
                match self.registry.query(&name) {
                    Some(answer) => {
                        debug!(
                            "Answering {} for peer {} with {} peers",
                            name,
                            peer,
                            answer.peers.len()
                        );
                        Some(Message::AnswerNodes(answer))
                    }
                    None => Some(Message::NotFound { name }),
                }
            }
            Message::UpdateChunks { name, bitfield } => {
                if !self.registry.update_bitfield(peer, &name, &bitfield) {
                    debug!("Ignoring bitfield from peer {} for untracked {}", peer, name);
                }
                None
            }
            Message::RemoveFile { name } => match self.registry.remove(peer, &name) {
                RemoveOutcome::Removed => Some(Message::FileSuccess {
                    name,
                    kind: FileSuccessKind::Remove,
                }),
                RemoveOutcome::NotFound => Some(Message::NotFound { name }),
            },
            other => {
                warn!("Unexpected {:?} from {}", other.id(), self.remote);
                None
            }
        };

        Ok(reply)
    }
}
