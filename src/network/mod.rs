//! Socket chat engine.
//!
//! Contains the Gateway (TCP listener), the per-client Connection task and
//! the live sink registry the control plane drives.

mod connection;
mod gateway;
mod registry;

pub use connection::Connection;
pub use gateway::Gateway;
pub use registry::SinkRegistry;
