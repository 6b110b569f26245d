//! Wire adapter for the control plane.
//!
//! Pure translation layer: every RPC unpacks the request, calls the one
//! matching [`ControlPlane`] operation and repacks the outcome. Failures
//! travel inside the response value objects; this service never returns a
//! gRPC error status of its own.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use natter_proto::v1::admin_server::Admin;
use natter_proto::v1::{
    AdminPrivateMessageRequest, BanUserRequest, BroadcastRequest, BroadcastResponse,
    ChangePermissionRequest, KickUserRequest, ListUsersRequest, ListUsersResponse, StatusResponse,
    TerminateAllRequest, TerminateAllResponse, UnbanUserRequest, UserFilter as WireFilter,
    UserInfo, UserInfoRequest, UserInfoResponse,
};

use crate::control::{ControlPlane, UserFilter, UserSummary};

pub struct AdminService {
    control: Arc<ControlPlane>,
}

impl AdminService {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }
}

fn to_wire_user(user: UserSummary) -> UserInfo {
    UserInfo {
        user_id: user.id,
        username: user.username,
        permission: user.permission.rank(),
        online: user.online,
        email: user.email.unwrap_or_default(),
        created_at: user.created_at,
        last_login: user.last_login.unwrap_or_default(),
        last_seen: user.last_seen.unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl Admin for AdminService {
    async fn change_permission(
        &self,
        request: Request<ChangePermissionRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .change_permission(&req.token, &req.target_username, req.new_permission)
            .await;
        Ok(Response::new(StatusResponse {
            success: out.success,
            message: out.message,
        }))
    }

    async fn ban_user(
        &self,
        request: Request<BanUserRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .ban_user(
                &req.token,
                &req.target_username,
                &req.reason,
                req.duration_minutes as i64,
            )
            .await;
        Ok(Response::new(StatusResponse {
            success: out.success,
            message: out.message,
        }))
    }

    async fn unban_user(
        &self,
        request: Request<UnbanUserRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        let out = self.control.unban_user(&req.token, &req.target_username).await;
        Ok(Response::new(StatusResponse {
            success: out.success,
            message: out.message,
        }))
    }

    async fn broadcast_message(
        &self,
        request: Request<BroadcastRequest>,
    ) -> Result<Response<BroadcastResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .broadcast_message(&req.token, &req.text, req.is_system)
            .await;
        Ok(Response::new(BroadcastResponse {
            success: out.success,
            message: out.message,
            recipient_count: out.recipients as i32,
        }))
    }

    async fn send_private_message(
        &self,
        request: Request<AdminPrivateMessageRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .send_private_message(&req.token, &req.target_username, &req.text)
            .await;
        Ok(Response::new(StatusResponse {
            success: out.success,
            message: out.message,
        }))
    }

    async fn list_active_users(
        &self,
        request: Request<ListUsersRequest>,
    ) -> Result<Response<ListUsersResponse>, Status> {
        let req = request.into_inner();
        let filter = match req.filter() {
            WireFilter::All => UserFilter::All,
            WireFilter::Online => UserFilter::Online,
            WireFilter::Offline => UserFilter::Offline,
        };
        let out = self
            .control
            .list_active_users(&req.token, filter, req.include_banned)
            .await;
        Ok(Response::new(ListUsersResponse {
            success: out.success,
            message: out.message,
            users: out.users.into_iter().map(to_wire_user).collect(),
        }))
    }

    async fn get_user_info(
        &self,
        request: Request<UserInfoRequest>,
    ) -> Result<Response<UserInfoResponse>, Status> {
        let req = request.into_inner();
        let out = self.control.get_user_info(&req.token, &req.target_username).await;
        Ok(Response::new(UserInfoResponse {
            success: out.success,
            message: out.message,
            user: out.user.map(to_wire_user),
        }))
    }

    async fn kick_user(
        &self,
        request: Request<KickUserRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .kick_user(&req.token, &req.target_username, &req.reason)
            .await;
        Ok(Response::new(StatusResponse {
            success: out.success,
            message: out.message,
        }))
    }

    async fn terminate_all_sessions(
        &self,
        request: Request<TerminateAllRequest>,
    ) -> Result<Response<TerminateAllResponse>, Status> {
        let req = request.into_inner();
        let out = self
            .control
            .terminate_all_sessions(&req.token, &req.reason)
            .await;
        Ok(Response::new(TerminateAllResponse {
            success: out.success,
            message: out.message,
            terminated_count: out.terminated as i32,
        }))
    }
}
