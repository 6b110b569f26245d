//! Authentication frontend.
//!
//! Turns credentials into sessions and back. Login failures are
//! deliberately uniform: a wrong password and an unknown username produce
//! the same response, and the repository burns the same Argon2 time for
//! both.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use natter_proto::v1::auth_server::Auth;
use natter_proto::v1::{
    LoginRequest, LoginResponse, LogoutRequest, OnlineCountRequest, OnlineCountResponse,
    RegisterRequest, RegisterResponse, StatusResponse, StatusStreamRequest, UserStatusEvent,
};

use crate::db::{Database, DbError};
use crate::permission::Permission;
use crate::state::SessionAuthority;

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
const STATUS_QUEUE: usize = 32;

pub struct AuthService {
    authority: Arc<SessionAuthority>,
    db: Database,
}

impl AuthService {
    pub fn new(authority: Arc<SessionAuthority>, db: Database) -> Self {
        Self { authority, db }
    }
}

#[tonic::async_trait]
impl Auth for AuthService {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();
        let username = req.username.trim();
        let fail = |message: &str| {
            Ok(Response::new(LoginResponse {
                success: false,
                message: message.to_string(),
                token: String::new(),
                permission: Permission::Guest.rank(),
            }))
        };

        if username.is_empty() {
            return fail("missing username");
        }

        let valid = match self.db.users().validate_credentials(username, &req.password).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "credential check failed");
                return fail("authentication unavailable");
            }
        };
        if !valid {
            info!(username = %username, "login rejected");
            return fail("invalid username or password");
        }

        let permission = match self.db.users().permission_of(username).await {
            Ok(Some(permission)) => permission,
            Ok(None) => return fail("invalid username or password"),
            Err(e) => {
                warn!(error = %e, "permission lookup failed");
                return fail("authentication unavailable");
            }
        };
        if permission == Permission::Banned {
            info!(username = %username, "banned account login rejected");
            return fail("this account is banned");
        }

        let session = self.authority.create_session(username, permission);
        if let Err(e) = self.db.users().mark_online(username, true).await {
            warn!(error = %e, "online flag update failed");
        }
        if let Err(e) = self.db.users().touch_last_login(username).await {
            warn!(error = %e, "last_login update failed");
        }

        info!(username = %username, permission = %permission, "login");
        Ok(Response::new(LoginResponse {
            success: true,
            message: format!("welcome, {username}"),
            token: session.token,
            permission: permission.rank(),
        }))
    }

    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let username = req.username.trim();
        let fail = |message: String| {
            Ok(Response::new(RegisterResponse {
                success: false,
                message,
                user_id: 0,
            }))
        };

        if username.len() < MIN_USERNAME_LEN {
            return fail(format!(
                "username must be at least {MIN_USERNAME_LEN} characters"
            ));
        }
        if req.password.len() < MIN_PASSWORD_LEN {
            return fail(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        let email = Some(req.email.trim()).filter(|e| !e.is_empty());

        match self
            .db
            .users()
            .create(username, &req.password, email, Permission::User)
            .await
        {
            Ok(user_id) => {
                info!(username = %username, user_id, "account registered");
                Ok(Response::new(RegisterResponse {
                    success: true,
                    message: format!("account {username} created"),
                    user_id,
                }))
            }
            Err(DbError::UserExists(_)) => fail(format!("username already taken: {username}")),
            Err(e) => {
                warn!(error = %e, "registration failed");
                fail("registration unavailable".to_string())
            }
        }
    }

    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        match self.authority.remove_session(req.token.trim()) {
            Some(session) => {
                if let Err(e) = self.db.users().mark_online(&session.username, false).await {
                    warn!(error = %e, "offline flag update failed");
                }
                info!(username = %session.username, "logout");
                Ok(Response::new(StatusResponse {
                    success: true,
                    message: "logged out".to_string(),
                }))
            }
            None => Ok(Response::new(StatusResponse {
                success: false,
                message: "invalid or expired token".to_string(),
            })),
        }
    }

    async fn get_online_count(
        &self,
        _request: Request<OnlineCountRequest>,
    ) -> Result<Response<OnlineCountResponse>, Status> {
        Ok(Response::new(OnlineCountResponse {
            count: self.authority.count_online() as i32,
        }))
    }

    type StreamUserStatusStream = ReceiverStream<Result<UserStatusEvent, Status>>;

    async fn stream_user_status(
        &self,
        request: Request<StatusStreamRequest>,
    ) -> Result<Response<Self::StreamUserStatusStream>, Status> {
        let req = request.into_inner();
        if !self.authority.is_valid(req.token.trim()) {
            return Err(Status::unauthenticated("invalid or expired token"));
        }

        let mut events = self.authority.subscribe_presence();
        let (tx, rx) = mpsc::channel(STATUS_QUEUE);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let wire = UserStatusEvent {
                            username: event.username,
                            online: event.online,
                            timestamp: event.timestamp,
                        };
                        if tx.send(Ok(wire)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
