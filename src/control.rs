//! Administrative control plane.
//!
//! Transport-agnostic implementation of the nine administrative
//! operations. Callers present a session token; the operation resolves it
//! against the authority, checks the privilege matrix, mutates authority
//! and database state, and reaches live clients only through the optional
//! [`ChatTransport`] hooks.
//!
//! Every operation returns a value object with a `success` flag. A denied
//! or failed operation is a *result*, not an error: the RPC layer maps
//! these 1:1 onto response messages and never raises a transport error
//! for them.

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::Database;
use crate::permission::Permission;
use crate::state::{Session, SessionAuthority};
use crate::transport::ChatTransport;

/// Outcome of a simple administrative operation.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    pub success: bool,
    pub message: String,
}

impl OpOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Outcome of a broadcast, with the number of sinks reached.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub success: bool,
    pub message: String,
    pub recipients: usize,
}

/// Outcome of terminate-all, with the number of sessions dropped.
#[derive(Debug, Clone)]
pub struct TerminateOutcome {
    pub success: bool,
    pub message: String,
    pub terminated: usize,
}

/// One user as reported by list/info operations.
#[derive(Debug, Clone)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub permission: Permission,
    pub online: bool,
    pub email: Option<String>,
    pub created_at: i64,
    pub last_login: Option<i64>,
    pub last_seen: Option<i64>,
}

/// Outcome of the user listing.
#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub success: bool,
    pub message: String,
    pub users: Vec<UserSummary>,
}

/// Outcome of a single-user lookup.
#[derive(Debug, Clone)]
pub struct InfoOutcome {
    pub success: bool,
    pub message: String,
    pub user: Option<UserSummary>,
}

/// Presence filter for the user listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    All,
    Online,
    Offline,
}

const MSG_INVALID_TOKEN: &str = "invalid or expired token";
const MSG_FORBIDDEN: &str = "insufficient privileges";
const MSG_DB_UNAVAILABLE: &str = "persistence unavailable";

/// The administrative control plane.
pub struct ControlPlane {
    authority: Arc<SessionAuthority>,
    db: Database,
    socket: Option<Arc<dyn ChatTransport>>,
    stream: Option<Arc<dyn ChatTransport>>,
}

impl ControlPlane {
    pub fn new(
        authority: Arc<SessionAuthority>,
        db: Database,
        socket: Option<Arc<dyn ChatTransport>>,
        stream: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        Self {
            authority,
            db,
            socket,
            stream,
        }
    }

    /// Resolve the caller and check the required privilege. Unknown tokens
    /// and underprivileged callers both come back as failure messages; the
    /// caller of an administrative operation learns nothing more.
    fn require(&self, token: &str, required: Permission) -> Result<Session, String> {
        let Some(session) = self.authority.get_by_token(token.trim()) else {
            return Err(MSG_INVALID_TOKEN.to_string());
        };
        if !session.permission.satisfies(required) {
            return Err(MSG_FORBIDDEN.to_string());
        }
        Ok(session)
    }

    /// Persisted rank of the target account, mapped onto the value-object
    /// failure messages.
    async fn target_rank(&self, target: &str) -> Result<Permission, String> {
        match self.db.users().permission_of(target).await {
            Ok(Some(permission)) => Ok(permission),
            Ok(None) => Err(format!("no such user: {target}")),
            Err(e) => {
                warn!(error = %e, "permission lookup failed");
                Err(MSG_DB_UNAVAILABLE.to_string())
            }
        }
    }

    /// The moderator ceiling: a moderator may only act on accounts ranked
    /// strictly below moderator. Admin targets are untouchable for
    /// everyone.
    fn hierarchy_allows(caller: &Session, target_rank: Permission) -> Result<(), String> {
        if target_rank == Permission::Admin {
            return Err("administrators cannot be targeted".to_string());
        }
        if caller.permission == Permission::Moderator
            && target_rank.satisfies(Permission::Moderator)
        {
            return Err("moderators cannot act on other staff".to_string());
        }
        Ok(())
    }

    /// Change the persisted and live permission of an account. Admin only.
    pub async fn change_permission(
        &self,
        token: &str,
        target: &str,
        new_rank: i32,
    ) -> OpOutcome {
        let caller = match self.require(token, Permission::Admin) {
            Ok(session) => session,
            Err(msg) => return OpOutcome::fail(msg),
        };
        let Some(new_permission) = Permission::from_rank(new_rank) else {
            return OpOutcome::fail(format!("invalid permission rank: {new_rank}"));
        };

        match self.db.users().set_permission(target, new_permission).await {
            Ok(true) => {}
            Ok(false) => return OpOutcome::fail(format!("no such user: {target}")),
            Err(e) => {
                warn!(error = %e, "permission update failed");
                return OpOutcome::fail(MSG_DB_UNAVAILABLE);
            }
        }

        if let Some(live) = self.authority.get_by_username(target) {
            self.authority.set_permission(&live.token, new_permission);
        }

        if let Some(stream) = &self.stream {
            stream.notify_permission_change(target, new_permission).await;
        }
        if let Some(socket) = &self.socket {
            socket.notify_permission_change(target, new_permission).await;
        }

        info!(
            admin = %caller.username,
            target = %target,
            permission = %new_permission,
            "permission changed"
        );
        OpOutcome::ok(format!("permission of {target} set to {new_permission}"))
    }

    /// Ban an account: persist the banned rank, record the audit row, and
    /// kick the target off the socket transport.
    pub async fn ban_user(
        &self,
        token: &str,
        target: &str,
        reason: &str,
        duration_minutes: i64,
    ) -> OpOutcome {
        let caller = match self.require(token, Permission::Moderator) {
            Ok(session) => session,
            Err(msg) => return OpOutcome::fail(msg),
        };
        let target_rank = match self.target_rank(target).await {
            Ok(rank) => rank,
            Err(msg) => return OpOutcome::fail(msg),
        };
        if target_rank == Permission::Banned {
            return OpOutcome::fail(format!("{target} is already banned"));
        }
        if let Err(msg) = Self::hierarchy_allows(&caller, target_rank) {
            return OpOutcome::fail(msg);
        }

        match self.db.users().set_permission(target, Permission::Banned).await {
            Ok(true) => {}
            Ok(false) => return OpOutcome::fail(format!("no such user: {target}")),
            Err(e) => {
                warn!(error = %e, "ban persist failed");
                return OpOutcome::fail(MSG_DB_UNAVAILABLE);
            }
        }

        // Audit row; losing it degrades the record, not the ban itself.
        let banned_by = self.db.users().id_of(&caller.username).await.ok().flatten();
        if let Err(e) = self
            .db
            .bans()
            .record(target, banned_by, reason, duration_minutes)
            .await
        {
            warn!(error = %e, "ban audit write failed");
        }

        if let Some(live) = self.authority.get_by_username(target) {
            self.authority.set_permission(&live.token, Permission::Banned);
        }
        if let Some(socket) = &self.socket {
            let kick_reason = if reason.is_empty() { "banned" } else { reason };
            socket.kick(target, kick_reason).await;
        }

        info!(moderator = %caller.username, target = %target, reason = %reason, "user banned");
        OpOutcome::ok(format!("{target} banned"))
    }

    /// Lift a ban, restoring the regular user rank.
    pub async fn unban_user(&self, token: &str, target: &str) -> OpOutcome {
        let caller = match self.require(token, Permission::Moderator) {
            Ok(session) => session,
            Err(msg) => return OpOutcome::fail(msg),
        };
        let target_rank = match self.target_rank(target).await {
            Ok(rank) => rank,
            Err(msg) => return OpOutcome::fail(msg),
        };
        if target_rank != Permission::Banned {
            return OpOutcome::fail(format!("{target} is not banned"));
        }

        match self.db.users().set_permission(target, Permission::User).await {
            Ok(true) => {}
            Ok(false) => return OpOutcome::fail(format!("no such user: {target}")),
            Err(e) => {
                warn!(error = %e, "unban persist failed");
                return OpOutcome::fail(MSG_DB_UNAVAILABLE);
            }
        }
        if let Err(e) = self.db.bans().clear(target).await {
            warn!(error = %e, "ban audit clear failed");
        }

        // A banned account cannot hold a live session, but be thorough.
        if let Some(live) = self.authority.get_by_username(target) {
            self.authority.set_permission(&live.token, Permission::User);
        }

        info!(moderator = %caller.username, target = %target, "user unbanned");
        OpOutcome::ok(format!("{target} unbanned"))
    }

    /// Broadcast to every socket client, framed as a system notice or an
    /// announcement carrying the caller's name.
    pub async fn broadcast_message(
        &self,
        token: &str,
        text: &str,
        is_system: bool,
    ) -> BroadcastOutcome {
        let caller = match self.require(token, Permission::Moderator) {
            Ok(session) => session,
            Err(msg) => {
                return BroadcastOutcome {
                    success: false,
                    message: msg,
                    recipients: 0,
                };
            }
        };
        let text = text.trim();
        if text.is_empty() {
            return BroadcastOutcome {
                success: false,
                message: "empty message".to_string(),
                recipients: 0,
            };
        }

        let formatted = if is_system {
            format!("[SYSTEM] {text}")
        } else {
            format!("[ANNOUNCE - {}] {text}", caller.username)
        };
        let recipients = match &self.socket {
            Some(socket) => socket.broadcast(&formatted, is_system).await,
            None => 0,
        };

        info!(sender = %caller.username, recipients, "administrative broadcast");
        BroadcastOutcome {
            success: true,
            message: format!("delivered to {recipients} clients"),
            recipients,
        }
    }

    /// Deliver a private line to one socket client.
    pub async fn send_private_message(
        &self,
        token: &str,
        target: &str,
        text: &str,
    ) -> OpOutcome {
        let caller = match self.require(token, Permission::Moderator) {
            Ok(session) => session,
            Err(msg) => return OpOutcome::fail(msg),
        };
        let text = text.trim();
        if text.is_empty() {
            return OpOutcome::fail("empty message");
        }

        let formatted = format!("[PM - {}] {text}", caller.username);
        let delivered = match &self.socket {
            Some(socket) => socket.send_private(target, &formatted).await,
            None => false,
        };

        if delivered {
            OpOutcome::ok(format!("delivered to {target}"))
        } else {
            OpOutcome::fail(format!("{target} has no live socket connection"))
        }
    }

    /// Every persisted account, cross-referenced with the authority for
    /// live presence.
    pub async fn list_active_users(
        &self,
        token: &str,
        filter: UserFilter,
        include_banned: bool,
    ) -> ListOutcome {
        if let Err(msg) = self.require(token, Permission::Moderator) {
            return ListOutcome {
                success: false,
                message: msg,
                users: Vec::new(),
            };
        }

        let records = match self.db.users().list_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "user listing failed");
                return ListOutcome {
                    success: false,
                    message: MSG_DB_UNAVAILABLE.to_string(),
                    users: Vec::new(),
                };
            }
        };

        let users: Vec<UserSummary> = records
            .into_iter()
            .filter(|record| include_banned || record.permission != Permission::Banned)
            .map(|record| {
                let online = self.authority.is_online(&record.username);
                UserSummary {
                    id: record.id,
                    username: record.username,
                    permission: record.permission,
                    online,
                    email: record.email,
                    created_at: record.created_at,
                    last_login: record.last_login,
                    last_seen: record.last_seen,
                }
            })
            .filter(|user| match filter {
                UserFilter::All => true,
                UserFilter::Online => user.online,
                UserFilter::Offline => !user.online,
            })
            .collect();

        ListOutcome {
            success: true,
            message: format!("{} users", users.len()),
            users,
        }
    }

    /// Live-session snapshot of one user. Reads the authority only; an
    /// account that exists but is offline reports failure here.
    pub async fn get_user_info(&self, token: &str, target: &str) -> InfoOutcome {
        if let Err(msg) = self.require(token, Permission::Moderator) {
            return InfoOutcome {
                success: false,
                message: msg,
                user: None,
            };
        }

        match self.authority.get_by_username(target) {
            Some(session) => InfoOutcome {
                success: true,
                message: format!("{target} is online"),
                user: Some(UserSummary {
                    id: 0,
                    username: session.username,
                    permission: session.permission,
                    online: session.online,
                    email: None,
                    created_at: 0,
                    last_login: None,
                    last_seen: None,
                }),
            },
            None => InfoOutcome {
                success: false,
                message: format!("{target} has no active session"),
                user: None,
            },
        }
    }

    /// Disconnect one user from the socket transport. Without a socket
    /// hook the session is removed directly, which at least invalidates
    /// the token.
    pub async fn kick_user(&self, token: &str, target: &str, reason: &str) -> OpOutcome {
        let caller = match self.require(token, Permission::Moderator) {
            Ok(session) => session,
            Err(msg) => return OpOutcome::fail(msg),
        };
        let Some(live) = self.authority.get_by_username(target) else {
            return OpOutcome::fail(format!("{target} is not online"));
        };
        if let Err(msg) = Self::hierarchy_allows(&caller, live.permission) {
            return OpOutcome::fail(msg);
        }

        let kicked = match &self.socket {
            Some(socket) => socket.kick(target, reason).await,
            None => {
                self.authority.remove_session(&live.token);
                true
            }
        };

        if kicked {
            info!(moderator = %caller.username, target = %target, reason = %reason, "user kicked");
            OpOutcome::ok(format!("{target} kicked"))
        } else {
            OpOutcome::fail(format!("{target} has no live socket connection"))
        }
    }

    /// Drop every session except the caller's own, after a maintenance
    /// notice to socket clients.
    pub async fn terminate_all_sessions(&self, token: &str, reason: &str) -> TerminateOutcome {
        let caller = match self.require(token, Permission::Admin) {
            Ok(session) => session,
            Err(msg) => {
                return TerminateOutcome {
                    success: false,
                    message: msg,
                    terminated: 0,
                };
            }
        };

        let notice = if reason.trim().is_empty() {
            "server entering maintenance - all sessions are being terminated".to_string()
        } else {
            reason.trim().to_string()
        };
        if let Some(socket) = &self.socket {
            socket.broadcast(&notice, true).await;
        }

        let terminated = self.authority.terminate_all_except(&caller.token);
        info!(admin = %caller.username, terminated, "all sessions terminated");
        TerminateOutcome {
            success: true,
            message: format!("{terminated} sessions terminated"),
            terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every transport call so tests can assert on side effects.
    #[derive(Default)]
    struct RecordingTransport {
        broadcasts: Mutex<Vec<(String, bool)>>,
        privates: Mutex<Vec<(String, String)>>,
        kicks: Mutex<Vec<(String, String)>>,
        notices: Mutex<Vec<(String, i32)>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn broadcast(&self, text: &str, is_system: bool) -> usize {
            self.broadcasts.lock().push((text.to_string(), is_system));
            1
        }

        async fn send_private(&self, username: &str, text: &str) -> bool {
            self.privates
                .lock()
                .push((username.to_string(), text.to_string()));
            true
        }

        async fn kick(&self, username: &str, reason: &str) -> bool {
            self.kicks
                .lock()
                .push((username.to_string(), reason.to_string()));
            true
        }

        async fn notify_permission_change(&self, username: &str, permission: Permission) {
            self.notices
                .lock()
                .push((username.to_string(), permission.rank()));
        }
    }

    struct Fixture {
        authority: Arc<SessionAuthority>,
        db: Database,
        socket: Arc<RecordingTransport>,
        stream: Arc<RecordingTransport>,
        control: ControlPlane,
    }

    async fn fixture() -> Fixture {
        let authority = Arc::new(SessionAuthority::new());
        let db = Database::new(":memory:").await.unwrap();
        db.users().seed_defaults().await.unwrap();
        let socket = Arc::new(RecordingTransport::default());
        let stream = Arc::new(RecordingTransport::default());
        let control = ControlPlane::new(
            Arc::clone(&authority),
            db.clone(),
            Some(Arc::clone(&socket) as Arc<dyn ChatTransport>),
            Some(Arc::clone(&stream) as Arc<dyn ChatTransport>),
        );
        Fixture {
            authority,
            db,
            socket,
            stream,
            control,
        }
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_everywhere() {
        let f = fixture().await;

        assert!(!f.control.change_permission("BOGUS", "user", 1).await.success);
        assert!(!f.control.ban_user("BOGUS", "user", "", 0).await.success);
        assert!(!f.control.kick_user("BOGUS", "user", "").await.success);
        assert!(!f.control.broadcast_message("BOGUS", "hi", false).await.success);
        assert!(
            !f.control
                .list_active_users("BOGUS", UserFilter::All, true)
                .await
                .success
        );
        assert!(!f.control.terminate_all_sessions("BOGUS", "").await.success);
    }

    #[tokio::test]
    async fn regular_user_cannot_administer() {
        let f = fixture().await;
        let user = f.authority.create_session("user", Permission::User);

        let out = f.control.ban_user(&user.token, "guest", "", 0).await;
        assert!(!out.success);
        assert_eq!(out.message, MSG_FORBIDDEN);

        let out = f.control.change_permission(&user.token, "guest", 1).await;
        assert!(!out.success);

        // Nothing was mutated or delivered.
        assert_eq!(
            f.db.users().permission_of("guest").await.unwrap(),
            Some(Permission::Guest)
        );
        assert!(f.socket.kicks.lock().is_empty());
    }

    #[tokio::test]
    async fn moderator_cannot_touch_admin_or_peers() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);
        f.db.users()
            .create("othermod", "pw-123456", None, Permission::Moderator)
            .await
            .unwrap();

        let out = f.control.ban_user(&moderator.token, "admin", "", 0).await;
        assert!(!out.success);
        let out = f.control.ban_user(&moderator.token, "othermod", "", 0).await;
        assert!(!out.success);

        assert_eq!(
            f.db.users().permission_of("admin").await.unwrap(),
            Some(Permission::Admin)
        );
        assert_eq!(
            f.db.users().permission_of("othermod").await.unwrap(),
            Some(Permission::Moderator)
        );
        assert!(f.socket.kicks.lock().is_empty());
        assert!(f.db.bans().history("admin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_bans_a_moderator() {
        let f = fixture().await;
        let admin = f.authority.create_session("admin", Permission::Admin);
        let target = f.authority.create_session("moderator", Permission::Moderator);

        let out = f
            .control
            .ban_user(&admin.token, "moderator", "abuse of power", 120)
            .await;
        assert!(out.success);

        assert_eq!(
            f.db.users().permission_of("moderator").await.unwrap(),
            Some(Permission::Banned)
        );
        // Live session demoted as well.
        assert_eq!(
            f.authority.get_by_token(&target.token).unwrap().permission,
            Permission::Banned
        );
        let audit = f.db.bans().history("moderator").await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].reason.as_deref(), Some("abuse of power"));
        assert_eq!(audit[0].duration_minutes, 120);
        assert_eq!(
            f.socket.kicks.lock().as_slice(),
            &[("moderator".to_string(), "abuse of power".to_string())]
        );
    }

    #[tokio::test]
    async fn ban_works_on_offline_accounts() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);

        let out = f.control.ban_user(&moderator.token, "user", "spam", 0).await;
        assert!(out.success);
        assert_eq!(
            f.db.users().permission_of("user").await.unwrap(),
            Some(Permission::Banned)
        );

        // Banning again fails cleanly.
        let out = f.control.ban_user(&moderator.token, "user", "spam", 0).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn unban_requires_a_banned_account() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);

        let out = f.control.unban_user(&moderator.token, "user").await;
        assert!(!out.success);

        f.control.ban_user(&moderator.token, "user", "", 0).await;
        let out = f.control.unban_user(&moderator.token, "user").await;
        assert!(out.success);
        assert_eq!(
            f.db.users().permission_of("user").await.unwrap(),
            Some(Permission::User)
        );
        assert!(f.db.bans().history("user").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_permission_is_admin_only_and_validated() {
        let f = fixture().await;
        let admin = f.authority.create_session("admin", Permission::Admin);
        let moderator = f.authority.create_session("moderator", Permission::Moderator);
        let target = f.authority.create_session("user", Permission::User);

        let out = f.control.change_permission(&moderator.token, "user", 1).await;
        assert!(!out.success);

        let out = f.control.change_permission(&admin.token, "user", 9).await;
        assert!(!out.success);
        assert!(out.message.contains("invalid permission rank"));

        let out = f.control.change_permission(&admin.token, "user", 1).await;
        assert!(out.success);
        assert_eq!(
            f.db.users().permission_of("user").await.unwrap(),
            Some(Permission::Moderator)
        );
        assert_eq!(
            f.authority.get_by_token(&target.token).unwrap().permission,
            Permission::Moderator
        );
        // Both transports were told, with the new rank in the notice.
        assert_eq!(f.stream.notices.lock().as_slice(), &[("user".to_string(), 1)]);
        assert_eq!(f.socket.notices.lock().as_slice(), &[("user".to_string(), 1)]);

        let out = f.control.change_permission(&admin.token, "ghost", 2).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn broadcast_framing() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);

        let out = f
            .control
            .broadcast_message(&moderator.token, "meeting at noon", false)
            .await;
        assert!(out.success);
        assert_eq!(out.recipients, 1);

        f.control
            .broadcast_message(&moderator.token, "restart imminent", true)
            .await;
        let out = f.control.broadcast_message(&moderator.token, "   ", false).await;
        assert!(!out.success);

        let broadcasts = f.socket.broadcasts.lock();
        assert_eq!(
            broadcasts.as_slice(),
            &[
                ("[ANNOUNCE - moderator] meeting at noon".to_string(), false),
                ("[SYSTEM] restart imminent".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn private_message_framing() {
        let f = fixture().await;
        let admin = f.authority.create_session("admin", Permission::Admin);

        let out = f
            .control
            .send_private_message(&admin.token, "user", "please behave")
            .await;
        assert!(out.success);
        assert_eq!(
            f.socket.privates.lock().as_slice(),
            &[("user".to_string(), "[PM - admin] please behave".to_string())]
        );
    }

    #[tokio::test]
    async fn kick_requires_a_live_target() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);

        let out = f.control.kick_user(&moderator.token, "user", "").await;
        assert!(!out.success);
        assert!(out.message.contains("not online"));

        f.authority.create_session("user", Permission::User);
        let out = f.control.kick_user(&moderator.token, "user", "flooding").await;
        assert!(out.success);
        assert_eq!(
            f.socket.kicks.lock().as_slice(),
            &[("user".to_string(), "flooding".to_string())]
        );
    }

    #[tokio::test]
    async fn kick_falls_back_to_session_removal_without_a_socket_hook() {
        let authority = Arc::new(SessionAuthority::new());
        let db = Database::new(":memory:").await.unwrap();
        db.users().seed_defaults().await.unwrap();
        let control = ControlPlane::new(Arc::clone(&authority), db, None, None);

        let admin = authority.create_session("admin", Permission::Admin);
        let target = authority.create_session("user", Permission::User);

        let out = control.kick_user(&admin.token, "user", "").await;
        assert!(out.success);
        assert!(!authority.is_valid(&target.token));
    }

    #[tokio::test]
    async fn terminate_all_spares_the_caller_and_warns_first() {
        let f = fixture().await;
        let admin = f.authority.create_session("admin", Permission::Admin);
        f.authority.create_session("user", Permission::User);
        f.authority.create_session("guest", Permission::Guest);

        let out = f.control.terminate_all_sessions(&admin.token, "").await;
        assert!(out.success);
        assert_eq!(out.terminated, 2);
        assert_eq!(f.authority.count_online(), 1);
        assert!(f.authority.is_valid(&admin.token));

        let broadcasts = f.socket.broadcasts.lock();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].0.contains("maintenance"));
        assert!(broadcasts[0].1);
    }

    #[tokio::test]
    async fn terminate_all_requires_admin() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);
        f.authority.create_session("user", Permission::User);

        let out = f.control.terminate_all_sessions(&moderator.token, "").await;
        assert!(!out.success);
        assert_eq!(f.authority.count_online(), 2);
    }

    #[tokio::test]
    async fn listing_cross_references_live_presence() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);
        f.authority.create_session("user", Permission::User);
        f.control.ban_user(&moderator.token, "guest", "", 0).await;

        let all = f
            .control
            .list_active_users(&moderator.token, UserFilter::All, true)
            .await;
        assert!(all.success);
        assert_eq!(all.users.len(), 4);

        let without_banned = f
            .control
            .list_active_users(&moderator.token, UserFilter::All, false)
            .await;
        assert_eq!(without_banned.users.len(), 3);

        let online = f
            .control
            .list_active_users(&moderator.token, UserFilter::Online, true)
            .await;
        let names: Vec<&str> = online.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["moderator", "user"]);

        let offline = f
            .control
            .list_active_users(&moderator.token, UserFilter::Offline, false)
            .await;
        let names: Vec<&str> = offline.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["admin"]);
    }

    #[tokio::test]
    async fn user_info_reads_the_live_session_only() {
        let f = fixture().await;
        let moderator = f.authority.create_session("moderator", Permission::Moderator);

        let out = f.control.get_user_info(&moderator.token, "user").await;
        assert!(!out.success);

        f.authority.create_session("user", Permission::User);
        let out = f.control.get_user_info(&moderator.token, "user").await;
        assert!(out.success);
        let user = out.user.unwrap();
        assert_eq!(user.username, "user");
        assert_eq!(user.permission, Permission::User);
        assert!(user.online);
    }
}
