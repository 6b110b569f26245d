//! gRPC services.
//!
//! Three tonic services share the process with the socket gateway: `Auth`
//! (credentials in, sessions out), `Chat` (bidirectional message streaming
//! plus history reads) and `Admin` (the control plane's wire adapter). All
//! of them speak the types from the `natter-proto` workspace crate.

mod auth;
mod chat;
mod control;

pub use auth::AuthService;
pub use chat::{ChatService, StreamRegistry};
pub use control::AdminService;
