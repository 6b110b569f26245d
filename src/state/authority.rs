//! The session authority.
//!
//! One mutex guards both the token map and the username index so the two
//! can never disagree. The lock is held only for map operations; presence
//! notifications go out through a broadcast channel *after* the guard is
//! dropped, so a subscriber is free to call straight back into the
//! authority without deadlocking.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::permission::Permission;
use crate::state::session::{PresenceEvent, Session, TOKEN_LEN};

/// Alphabet for session tokens: digits and upper-case ASCII letters.
const TOKEN_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Presence channel depth. A slow subscriber lags and is told how many
/// events it missed; it never blocks the authority.
const PRESENCE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Registry {
    /// token -> session
    sessions: HashMap<String, Session>,
    /// username -> token of the most recent session. Last writer wins when
    /// the same account logs in twice.
    by_username: HashMap<String, String>,
}

/// In-memory source of truth for authenticated sessions.
pub struct SessionAuthority {
    registry: Mutex<Registry>,
    presence_tx: broadcast::Sender<PresenceEvent>,
}

impl SessionAuthority {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self {
            registry: Mutex::new(Registry::default()),
            presence_tx,
        }
    }

    /// Subscribe to online/offline transitions.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_tx.subscribe()
    }

    fn generate_token() -> String {
        let mut rng = rand::thread_rng();
        (0..TOKEN_LEN)
            .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
            .collect()
    }

    fn emit(&self, username: &str, online: bool) {
        // Returns Err only when nobody is subscribed.
        let _ = self.presence_tx.send(PresenceEvent {
            username: username.to_string(),
            online,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    /// Mint a fresh token and register a session for `username`.
    pub fn create_session(&self, username: &str, permission: Permission) -> Session {
        let session = Session {
            token: Self::generate_token(),
            username: username.to_string(),
            permission,
            online: true,
        };
        {
            let mut reg = self.registry.lock();
            reg.by_username
                .insert(username.to_string(), session.token.clone());
            reg.sessions.insert(session.token.clone(), session.clone());
        }
        self.emit(username, true);
        debug!(username = %username, permission = %permission, "session created");
        session
    }

    pub fn get_by_token(&self, token: &str) -> Option<Session> {
        self.registry.lock().sessions.get(token).cloned()
    }

    /// Resolve the most recent session for a username via the secondary
    /// index; no scan over the token map.
    pub fn get_by_username(&self, username: &str) -> Option<Session> {
        let reg = self.registry.lock();
        let token = reg.by_username.get(username)?;
        reg.sessions.get(token).cloned()
    }

    pub fn is_valid(&self, token: &str) -> bool {
        self.registry.lock().sessions.contains_key(token)
    }

    /// True when the token resolves and its privilege covers `required`.
    /// Unknown tokens are simply not privileged.
    pub fn has_permission(&self, token: &str, required: Permission) -> bool {
        self.registry
            .lock()
            .sessions
            .get(token)
            .is_some_and(|s| s.permission.satisfies(required))
    }

    /// Update the live privilege of a session in place.
    pub fn set_permission(&self, token: &str, permission: Permission) {
        let updated = {
            let mut reg = self.registry.lock();
            match reg.sessions.get_mut(token) {
                Some(session) => {
                    session.permission = permission;
                    true
                }
                None => false,
            }
        };
        if !updated {
            warn!("permission update for unknown token");
        }
    }

    /// Remove a session. Idempotent; returns the removed session if there
    /// was one. The username index entry is dropped only when it still
    /// points at this token.
    pub fn remove_session(&self, token: &str) -> Option<Session> {
        let removed = {
            let mut reg = self.registry.lock();
            let session = reg.sessions.remove(token)?;
            if reg
                .by_username
                .get(&session.username)
                .is_some_and(|t| t == token)
            {
                reg.by_username.remove(&session.username);
            }
            Some(session)
        };
        if let Some(session) = &removed {
            self.emit(&session.username, false);
            debug!(username = %session.username, "session removed");
        }
        removed
    }

    pub fn is_online(&self, username: &str) -> bool {
        let reg = self.registry.lock();
        reg.by_username
            .get(username)
            .and_then(|token| reg.sessions.get(token))
            .is_some_and(|s| s.online)
    }

    #[allow(dead_code)] // Control-plane checks resolve the full session instead
    pub fn is_admin(&self, token: &str) -> bool {
        self.has_permission(token, Permission::Admin)
    }

    /// Snapshot of every live session.
    #[allow(dead_code)] // User listing reads persistence, cross-checked via is_online
    pub fn list_active(&self) -> Vec<Session> {
        self.registry.lock().sessions.values().cloned().collect()
    }

    #[allow(dead_code)] // Presence surfaces report count_online
    pub fn count_active(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    pub fn count_online(&self) -> usize {
        self.registry
            .lock()
            .sessions
            .values()
            .filter(|s| s.online)
            .count()
    }

    /// Drop every session. Returns how many were removed.
    #[allow(dead_code)] // Maintenance keeps the caller alive via terminate_all_except
    pub fn terminate_all(&self) -> usize {
        let removed: Vec<Session> = {
            let mut reg = self.registry.lock();
            reg.by_username.clear();
            reg.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &removed {
            self.emit(&session.username, false);
        }
        removed.len()
    }

    /// Drop every session except `keep_token` (the caller's own). Returns
    /// how many were removed.
    pub fn terminate_all_except(&self, keep_token: &str) -> usize {
        let removed: Vec<Session> = {
            let mut reg = self.registry.lock();
            let kept = reg.sessions.remove(keep_token);
            let removed: Vec<Session> = reg.sessions.drain().map(|(_, s)| s).collect();
            reg.by_username.clear();
            if let Some(session) = kept {
                reg.by_username
                    .insert(session.username.clone(), session.token.clone());
                reg.sessions.insert(session.token.clone(), session);
            }
            removed
        };
        for session in &removed {
            self.emit(&session.username, false);
        }
        removed.len()
    }
}

impl Default for SessionAuthority {
    fn default() -> Self {
        Self::new()
    }
}
