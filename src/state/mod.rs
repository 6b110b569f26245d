//! Live session state.
//!
//! The [`SessionAuthority`] is the single in-memory source of truth for who
//! is currently authenticated, under which token, and at what privilege.
//! Both chat transports and the control plane consult it; nothing else
//! holds authoritative session state.

mod authority;
mod session;

pub use authority::SessionAuthority;
pub use session::{PresenceEvent, Session, TOKEN_LEN};
