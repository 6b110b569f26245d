//! natterd - permissioned group chat daemon.
//!
//! One process, two live transports: a line-oriented TCP socket and a
//! bidirectional gRPC stream, kept consistent by a shared in-memory
//! session authority and a SQLite-backed store.

mod config;
mod control;
mod db;
mod network;
mod permission;
mod rpc;
mod state;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use natter_proto::v1::admin_server::AdminServer;
use natter_proto::v1::auth_server::AuthServer;
use natter_proto::v1::chat_server::ChatServer;

use crate::config::Config;
use crate::control::ControlPlane;
use crate::db::Database;
use crate::network::{Gateway, SinkRegistry};
use crate::rpc::{AdminService, AuthService, ChatService, StreamRegistry};
use crate::state::SessionAuthority;
use crate::transport::ChatTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path, error = %e, "failed to load config");
            e
        })?
    } else {
        info!(path = %config_path, "no config file, using defaults");
        Config::default()
    };

    info!(
        server = %config.server.name,
        socket = %config.listen.addr,
        grpc = %config.grpc.addr,
        "starting natterd"
    );

    let db = Database::new(&config.database.path).await?;
    if config.server.seed_accounts {
        db.users().seed_defaults().await?;
    }
    let accounts = db.users().count().await?;
    info!(accounts, "database ready");

    let authority = Arc::new(SessionAuthority::new());
    let socket_registry = Arc::new(SinkRegistry::new());
    let stream_registry = Arc::new(StreamRegistry::new());

    let control = Arc::new(ControlPlane::new(
        Arc::clone(&authority),
        db.clone(),
        Some(Arc::clone(&socket_registry) as Arc<dyn ChatTransport>),
        Some(Arc::clone(&stream_registry) as Arc<dyn ChatTransport>),
    ));

    let auth_service = AuthService::new(Arc::clone(&authority), db.clone());
    let chat_service = ChatService::new(
        Arc::clone(&authority),
        db.clone(),
        Arc::clone(&stream_registry),
        config.limits.replay_depth,
        config.limits.history_limit,
    );
    let admin_service = AdminService::new(Arc::clone(&control));

    let grpc_addr = config.grpc.addr;
    let grpc = tonic::transport::Server::builder()
        .add_service(AuthServer::new(auth_service))
        .add_service(ChatServer::new(chat_service))
        .add_service(AdminServer::new(admin_service))
        .serve(grpc_addr);
    info!(addr = %grpc_addr, "grpc listener starting");

    let gateway = Gateway::bind(
        config.listen.addr,
        Arc::clone(&authority),
        Arc::clone(&socket_registry),
        db.clone(),
        config.limits.handshake_timeout(),
        config.limits.max_line_length,
    )
    .await?;

    tokio::select! {
        result = gateway.run() => result?,
        result = grpc => result.context("grpc server failed")?,
    }

    Ok(())
}
