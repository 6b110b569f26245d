//! Session and presence types shared across transports.

use crate::permission::Permission;

/// Length of every session token issued by the authority.
pub const TOKEN_LEN: usize = 32;

/// An authenticated identity bound to an opaque token.
///
/// A `Session` is created at login and lives until logout, disconnect,
/// kick or termination. Both chat engines and the control plane resolve
/// callers through it; the numeric account id stays in the database.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub permission: Permission,
    pub online: bool,
}

/// Online/offline transition published by the authority.
///
/// Events are emitted after the registry lock is released, so subscribers
/// may freely call back into the authority.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub username: String,
    pub online: bool,
    pub timestamp: i64,
}
