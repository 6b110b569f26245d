//! Transport hooks.
//!
//! The control plane is transport-agnostic: it mutates authority and
//! database state itself and reaches live clients only through this trait.
//! Each chat engine registers one implementation at startup; a missing
//! hook degrades the operation (no delivery) rather than failing it.

use async_trait::async_trait;

use crate::permission::Permission;

/// Operations a live chat engine exposes to the control plane.
///
/// Implementations must not hold any lock across these calls that a
/// connection task could also need, since the control plane invokes them
/// while handling an administrative request.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a line to every connected client. `is_system` marks server
    /// notices so the engine can apply its system framing. Returns how
    /// many clients the message was handed to.
    async fn broadcast(&self, text: &str, is_system: bool) -> usize;

    /// Deliver a line to a single user. Returns false when the user has no
    /// live connection on this transport.
    async fn send_private(&self, username: &str, text: &str) -> bool;

    /// Drop the user's connection, delivering `reason` first when
    /// possible. Returns false when the user was not connected here.
    async fn kick(&self, username: &str, reason: &str) -> bool;

    /// Push a permission-change notice to the user, if reachable. The
    /// notice embeds a `PERM_UPDATE:<rank>` sentinel so clients can adjust
    /// their UI without parsing prose.
    async fn notify_permission_change(&self, username: &str, permission: Permission);
}
