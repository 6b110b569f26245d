//! One task per socket client.
//!
//! Each connection runs two phases:
//!
//! Phase 1, handshake: the client's first line must be a session token
//! previously issued by the authority. The wait is bounded by the
//! configured handshake timeout; a silent or unauthenticated socket is
//! answered with one `[ERR]` line and closed.
//!
//! Phase 2, chat: a `tokio::select!` loop alternates between inbound lines
//! and the outgoing queue fed by the sink registry. Privilege is resolved
//! per line, so an administrative demotion applies to the very next
//! message. When the registry entry is dropped (kick, shutdown) the queue
//! closes and the loop winds down through the normal cleanup path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::network::registry::SinkRegistry;
use crate::permission::Permission;
use crate::state::SessionAuthority;

/// Outgoing queue depth per connection. A client that cannot drain this
/// many lines starts losing its own copies of room traffic.
const OUTGOING_QUEUE: usize = 32;

/// Handles a single socket client from handshake to disconnect.
pub struct Connection {
    addr: SocketAddr,
    authority: Arc<SessionAuthority>,
    registry: Arc<SinkRegistry>,
    db: Database,
    handshake_timeout: Duration,
    max_line_length: usize,
}

impl Connection {
    pub fn new(
        addr: SocketAddr,
        authority: Arc<SessionAuthority>,
        registry: Arc<SinkRegistry>,
        db: Database,
        handshake_timeout: Duration,
        max_line_length: usize,
    ) -> Self {
        Self {
            addr,
            authority,
            registry,
            db,
            handshake_timeout,
            max_line_length,
        }
    }

    pub async fn run(self, stream: TcpStream) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(self.max_line_length));

        // Phase 1: the first line is the token, nothing else.
        let token = match timeout(self.handshake_timeout, framed.next()).await {
            Err(_) => {
                let _ = framed.send("[ERR] authentication timed out").await;
                debug!(addr = %self.addr, "handshake timed out");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => {
                debug!(addr = %self.addr, error = %e, "handshake read failed");
                return Ok(());
            }
            Ok(Some(Ok(line))) => line.trim().to_string(),
        };

        if token.is_empty() {
            let _ = framed.send("[ERR] empty token").await;
            return Ok(());
        }

        let session = match self.authority.get_by_token(&token) {
            Some(session) => session,
            None => {
                let _ = framed.send("[ERR] invalid token").await;
                debug!(addr = %self.addr, "rejected unknown token");
                return Ok(());
            }
        };
        if session.permission == Permission::Banned {
            let _ = framed.send("[ERR] access denied: account is banned").await;
            return Ok(());
        }

        let (tx, mut outgoing_rx) = mpsc::channel::<String>(OUTGOING_QUEUE);
        self.registry.register(&token, &session.username, tx);

        let ok_line = format!("[OK] authenticated - permission: {}", session.permission);
        info!(addr = %self.addr, username = %session.username, "socket client authenticated");

        if framed.send(ok_line).await.is_err() {
            self.cleanup(&token, &session.username);
            return Ok(());
        }

        // Phase 2: chat loop.
        loop {
            tokio::select! {
                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(line)) => {
                            let text = line.trim();
                            if text.is_empty() {
                                continue;
                            }
                            // Resolve privilege per line; control plane
                            // changes apply to the next message.
                            let Some(session) = self.authority.get_by_token(&token) else {
                                let _ = framed.send("[ERR] session terminated").await;
                                break;
                            };
                            match session.permission {
                                Permission::Guest => {
                                    let _ = framed
                                        .send("[ERR] guests are not allowed to send messages")
                                        .await;
                                }
                                Permission::Banned => {
                                    let _ = framed
                                        .send("[ERR] access denied: account is banned")
                                        .await;
                                    break;
                                }
                                permission => {
                                    let formatted = format!(
                                        "{}[{}] {}",
                                        permission.socket_tag(),
                                        session.username,
                                        text
                                    );
                                    let delivered = self.registry.deliver_all(&formatted);
                                    debug!(
                                        username = %session.username,
                                        delivered,
                                        "socket broadcast"
                                    );
                                }
                            }
                        }
                        Some(Err(e)) => {
                            debug!(addr = %self.addr, error = %e, "socket read failed");
                            break;
                        }
                        None => break,
                    }
                }
                queued = outgoing_rx.recv() => {
                    match queued {
                        Some(line) => {
                            if framed.send(line).await.is_err() {
                                break;
                            }
                        }
                        // Registry entry dropped: kicked or shutting down.
                        // Pending lines (including any farewell) were
                        // drained above before recv returned None.
                        None => break,
                    }
                }
            }
        }

        self.cleanup(&token, &session.username);
        Ok(())
    }

    fn cleanup(&self, token: &str, username: &str) {
        self.registry.unregister(token);
        self.authority.remove_session(token);
        info!(addr = %self.addr, username = %username, "socket client disconnected");

        // A fresh login may already have replaced this session; only a user
        // with no remaining session goes offline in persistence.
        if !self.authority.is_online(username) {
            let db = self.db.clone();
            let username = username.to_string();
            tokio::spawn(async move {
                if let Err(e) = db.users().mark_online(&username, false).await {
                    warn!(username = %username, error = %e, "failed to stamp last_seen");
                }
            });
        }
    }
}
