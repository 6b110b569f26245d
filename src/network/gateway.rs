//! Gateway - TCP listener that accepts incoming socket clients.
//!
//! The gateway binds one plaintext listener and spawns a [`Connection`]
//! task per accepted client. All shared state travels into the task as
//! cheap handles.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::db::Database;
use crate::network::Connection;
use crate::network::registry::SinkRegistry;
use crate::state::SessionAuthority;

/// Accepts socket connections and hands each to its own task.
pub struct Gateway {
    listener: TcpListener,
    authority: Arc<SessionAuthority>,
    registry: Arc<SinkRegistry>,
    db: Database,
    handshake_timeout: Duration,
    max_line_length: usize,
}

impl Gateway {
    /// Bind the gateway to `addr`.
    pub async fn bind(
        addr: SocketAddr,
        authority: Arc<SessionAuthority>,
        registry: Arc<SinkRegistry>,
        db: Database,
        handshake_timeout: Duration,
        max_line_length: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "socket listener bound");

        Ok(Self {
            listener,
            authority,
            registry,
            db,
            handshake_timeout,
            max_line_length,
        })
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "socket connection accepted");

                    let connection = Connection::new(
                        addr,
                        Arc::clone(&self.authority),
                        Arc::clone(&self.registry),
                        self.db.clone(),
                        self.handshake_timeout,
                        self.max_line_length,
                    );
                    tokio::spawn(async move {
                        if let Err(e) = connection.run(stream).await {
                            error!(%addr, error = %e, "socket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept socket connection");
                }
            }
        }
    }
}
