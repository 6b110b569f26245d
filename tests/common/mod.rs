//! Integration test common infrastructure.
//!
//! Spawns natterd instances as child processes and provides a
//! line-oriented client for the socket transport. gRPC goes through the
//! generated tonic clients directly.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestServer;
