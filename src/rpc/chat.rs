//! Bidirectional streaming chat engine.
//!
//! One `ChatStream` call per client. The first inbound frame must carry a
//! valid session token; after that the stream is registered as a live sink
//! and every accepted frame is stamped, persisted and routed. Outbound
//! delivery goes through a bounded channel per stream, so one stalled
//! client never blocks the fan-out.
//!
//! Unlike the socket transport, a public frame is not echoed back to its
//! sender here; stream clients render their own input locally. Private
//! frames do get an echo, carrying the persisted message id.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use natter_proto::v1::chat_server::Chat;
use natter_proto::v1::{
    ChatMessage, HistoryRequest, HistoryResponse, PrivateMessageRequest, PrivateMessageResponse,
};

use crate::db::{Database, SaveMessageParams, StoredMessage};
use crate::permission::Permission;
use crate::state::{Session, SessionAuthority};
use crate::transport::ChatTransport;

/// Outbound frames buffered per stream before the sender starts losing
/// broadcasts.
const STREAM_QUEUE: usize = 64;

struct StreamSink {
    username: String,
    tx: mpsc::Sender<Result<ChatMessage, Status>>,
}

/// Live stream sinks, keyed by session token.
#[derive(Default)]
pub struct StreamRegistry {
    sinks: DashMap<String, StreamSink>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        token: &str,
        username: &str,
        tx: mpsc::Sender<Result<ChatMessage, Status>>,
    ) {
        self.sinks.insert(
            token.to_string(),
            StreamSink {
                username: username.to_string(),
                tx,
            },
        );
        debug!(username = %username, total = self.len(), "stream registered");
    }

    fn unregister(&self, token: &str) {
        if let Some((_, sink)) = self.sinks.remove(token) {
            debug!(username = %sink.username, total = self.len(), "stream unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Push a frame to every registered stream except the one bound to
    /// `except_token`. Sinks whose channel has closed are dropped on the
    /// way; a sink with a full queue keeps its registration and loses this
    /// frame.
    fn fan_out(&self, message: &ChatMessage, except_token: Option<&str>) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();

        for entry in self.sinks.iter() {
            if except_token == Some(entry.key().as_str()) {
                continue;
            }
            match entry.value().tx.try_send(Ok(message.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(username = %entry.value().username, "stream queue full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(entry.key().clone());
                }
            }
        }

        // Removal happens after iteration; removing inside the loop could
        // deadlock on the entry's shard.
        for token in dead {
            self.unregister(&token);
        }
        delivered
    }

    /// Deliver one frame to every stream of the named user. True when at
    /// least one sink accepted it.
    fn send_to_user(&self, username: &str, message: &ChatMessage) -> bool {
        let mut delivered = false;
        let mut dead: Vec<String> = Vec::new();

        for entry in self.sinks.iter() {
            if entry.value().username != username {
                continue;
            }
            match entry.value().tx.try_send(Ok(message.clone())) {
                Ok(()) => delivered = true,
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(entry.key().clone());
                }
            }
        }

        for token in dead {
            self.unregister(&token);
        }
        delivered
    }
}

#[async_trait]
impl ChatTransport for StreamRegistry {
    async fn broadcast(&self, text: &str, is_system: bool) -> usize {
        let mut message = system_message(text);
        message.is_system = is_system;
        self.fan_out(&message, None)
    }

    async fn send_private(&self, username: &str, text: &str) -> bool {
        let mut message = system_message(text);
        message.is_private = true;
        message.target_username = username.to_string();
        self.send_to_user(username, &message)
    }

    async fn kick(&self, username: &str, reason: &str) -> bool {
        let farewell = if reason.is_empty() {
            "you have been disconnected by an administrator".to_string()
        } else {
            format!("you have been disconnected: {reason}")
        };
        let mut message = system_message(farewell);
        message.is_private = true;
        message.target_username = username.to_string();

        let tokens: Vec<String> = self
            .sinks
            .iter()
            .filter(|entry| entry.value().username == username)
            .map(|entry| entry.key().clone())
            .collect();
        if tokens.is_empty() {
            return false;
        }
        for token in tokens {
            if let Some(entry) = self.sinks.get(&token) {
                let _ = entry.value().tx.try_send(Ok(message.clone()));
            }
            self.unregister(&token);
        }
        true
    }

    async fn notify_permission_change(&self, username: &str, permission: Permission) {
        let mut message = system_message(format!(
            "your permission is now {} PERM_UPDATE:{}",
            permission,
            permission.rank()
        ));
        message.permission = permission.rank();
        message.is_private = true;
        message.target_username = username.to_string();
        self.send_to_user(username, &message);
    }
}

fn system_message(text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        token: String::new(),
        sender: "SYSTEM".to_string(),
        text: text.into(),
        timestamp: chrono::Utc::now().timestamp(),
        permission: Permission::Admin.rank(),
        is_system: true,
        is_private: false,
        target_username: String::new(),
        message_id: -1,
    }
}

fn from_stored(stored: StoredMessage) -> ChatMessage {
    ChatMessage {
        token: String::new(),
        sender: stored.sender_name,
        text: stored.text,
        timestamp: stored.timestamp,
        permission: stored.permission.rank(),
        is_system: stored.is_system,
        is_private: stored.is_private,
        target_username: stored.recipient_name.unwrap_or_default(),
        message_id: stored.id,
    }
}

/// The `Chat` gRPC service.
pub struct ChatService {
    authority: Arc<SessionAuthority>,
    db: Database,
    registry: Arc<StreamRegistry>,
    replay_depth: u32,
    history_limit: u32,
}

impl ChatService {
    pub fn new(
        authority: Arc<SessionAuthority>,
        db: Database,
        registry: Arc<StreamRegistry>,
        replay_depth: u32,
        history_limit: u32,
    ) -> Self {
        Self {
            authority,
            db,
            registry,
            replay_depth,
            history_limit,
        }
    }

    /// Session behind a unary request token, or the failure message for
    /// the value-object response. Banned sessions never pass.
    fn unary_session(&self, token: &str) -> Result<Session, String> {
        let Some(session) = self.authority.get_by_token(token.trim()) else {
            return Err("invalid or expired token".to_string());
        };
        if session.permission == Permission::Banned {
            return Err("you are banned".to_string());
        }
        Ok(session)
    }
}

/// One accepted chat stream: the read loop plus its registry bookkeeping.
struct StreamWorker {
    authority: Arc<SessionAuthority>,
    db: Database,
    registry: Arc<StreamRegistry>,
    tx: mpsc::Sender<Result<ChatMessage, Status>>,
    bound: Session,
}

impl StreamWorker {
    async fn run(mut self, mut inbound: Streaming<ChatMessage>) {
        loop {
            let frame = match inbound.message().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!(username = %self.bound.username, error = %e, "chat stream read error");
                    break;
                }
            };
            if !self.handle_frame(frame).await {
                break;
            }
        }

        self.registry.unregister(&self.bound.token);
        info!(username = %self.bound.username, "chat stream closed");
    }

    /// Process one inbound frame. Returns false when the stream must end.
    async fn handle_frame(&mut self, frame: ChatMessage) -> bool {
        // A frame may re-assert a different token; rebind or die.
        if !frame.token.is_empty() && frame.token != self.bound.token {
            match self.authority.get_by_token(&frame.token) {
                Some(next) if next.permission != Permission::Banned => {
                    self.registry.unregister(&self.bound.token);
                    self.registry
                        .register(&next.token, &next.username, self.tx.clone());
                    self.bound = next;
                }
                _ => {
                    self.reply("authentication failed").await;
                    return false;
                }
            }
        }

        // Administrative action may have demoted, banned or terminated the
        // session since the last frame.
        match self.authority.get_by_token(&self.bound.token) {
            Some(current) => self.bound = current,
            None => {
                self.reply("your session has been terminated").await;
                return false;
            }
        }
        if self.bound.permission == Permission::Banned {
            self.reply("you are banned").await;
            return false;
        }
        if self.bound.permission == Permission::Guest {
            self.reply("guests are not allowed to send messages").await;
            return true;
        }

        let text = frame.text.trim();
        if text.is_empty() {
            return true;
        }

        let target = frame.target_username.trim();
        let is_private = frame.is_private && !target.is_empty();
        let sender_id = self.db.users().id_of(&self.bound.username).await.ok().flatten();

        let mut message = ChatMessage {
            token: String::new(),
            sender: self.bound.username.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            permission: self.bound.permission.rank(),
            is_system: false,
            is_private,
            target_username: if is_private {
                target.to_string()
            } else {
                String::new()
            },
            message_id: -1,
        };

        if is_private {
            let recipient_id = self.db.users().id_of(target).await.ok().flatten();
            message.message_id = self
                .persist(SaveMessageParams {
                    sender_id,
                    sender_name: &self.bound.username,
                    text,
                    permission: self.bound.permission,
                    is_system: false,
                    is_private: true,
                    recipient_id,
                    recipient_name: Some(target),
                })
                .await;

            if !self.registry.send_to_user(target, &message) {
                self.reply(format!("{target} has no active stream")).await;
            }
            // Echo back so the sender sees the stored id.
            let _ = self.tx.send(Ok(message)).await;
        } else {
            message.message_id = self
                .persist(SaveMessageParams {
                    sender_id,
                    sender_name: &self.bound.username,
                    text,
                    permission: self.bound.permission,
                    is_system: false,
                    is_private: false,
                    recipient_id: None,
                    recipient_name: None,
                })
                .await;

            let delivered = self.registry.fan_out(&message, Some(self.bound.token.as_str()));
            debug!(
                sender = %self.bound.username,
                delivered,
                message_id = message.message_id,
                "public frame routed"
            );
        }
        true
    }

    async fn persist(&self, params: SaveMessageParams<'_>) -> i64 {
        match self.db.messages().save(params).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "message persist failed");
                -1
            }
        }
    }

    async fn reply(&self, text: impl Into<String>) {
        let _ = self.tx.send(Ok(system_message(text))).await;
    }
}

#[tonic::async_trait]
impl Chat for ChatService {
    type ChatStreamStream = ReceiverStream<Result<ChatMessage, Status>>;

    async fn chat_stream(
        &self,
        request: Request<Streaming<ChatMessage>>,
    ) -> Result<Response<Self::ChatStreamStream>, Status> {
        let mut inbound = request.into_inner();

        // The opening frame only authenticates; its text is ignored.
        let first = match inbound.message().await? {
            Some(frame) => frame,
            None => return Err(Status::invalid_argument("stream closed before authentication")),
        };

        let (tx, rx) = mpsc::channel(STREAM_QUEUE);

        let session = match self.authority.get_by_token(first.token.trim()) {
            Some(session) if session.permission != Permission::Banned => session,
            Some(_) => {
                let _ = tx.send(Ok(system_message("you are banned"))).await;
                return Ok(Response::new(ReceiverStream::new(rx)));
            }
            None => {
                let _ = tx
                    .send(Ok(system_message("authentication failed: invalid token")))
                    .await;
                return Ok(Response::new(ReceiverStream::new(rx)));
            }
        };

        self.registry
            .register(&session.token, &session.username, tx.clone());

        // Recent public history first, oldest to newest, then the welcome.
        match self
            .db
            .messages()
            .public_history(self.replay_depth, None)
            .await
        {
            Ok(history) => {
                for stored in history {
                    let _ = tx.send(Ok(from_stored(stored))).await;
                }
            }
            Err(e) => warn!(error = %e, "history replay failed"),
        }
        let _ = tx
            .send(Ok(system_message(format!(
                "connected as {} - permission: {}",
                session.username, session.permission
            ))))
            .await;

        info!(username = %session.username, "chat stream open");
        let worker = StreamWorker {
            authority: Arc::clone(&self.authority),
            db: self.db.clone(),
            registry: Arc::clone(&self.registry),
            tx,
            bound: session,
        };
        tokio::spawn(worker.run(inbound));

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_history(
        &self,
        request: Request<HistoryRequest>,
    ) -> Result<Response<HistoryResponse>, Status> {
        let req = request.into_inner();
        if let Err(message) = self.unary_session(&req.token) {
            return Ok(Response::new(HistoryResponse {
                success: false,
                message,
                messages: Vec::new(),
            }));
        }

        let limit = if req.limit > 0 {
            (req.limit as u32).min(200)
        } else {
            self.history_limit
        };
        let before = (req.before_message_id > 0).then_some(req.before_message_id);

        match self.db.messages().public_history(limit, before).await {
            Ok(stored) => Ok(Response::new(HistoryResponse {
                success: true,
                message: format!("{} messages", stored.len()),
                messages: stored.into_iter().map(from_stored).collect(),
            })),
            Err(e) => {
                warn!(error = %e, "history read failed");
                Ok(Response::new(HistoryResponse {
                    success: false,
                    message: "history unavailable".to_string(),
                    messages: Vec::new(),
                }))
            }
        }
    }

    async fn send_private(
        &self,
        request: Request<PrivateMessageRequest>,
    ) -> Result<Response<PrivateMessageResponse>, Status> {
        let req = request.into_inner();
        let fail = |message: String| {
            Ok(Response::new(PrivateMessageResponse {
                success: false,
                message,
                message_id: -1,
            }))
        };

        let session = match self.unary_session(&req.token) {
            Ok(session) => session,
            Err(message) => return fail(message),
        };
        if session.permission == Permission::Guest {
            return fail("guests are not allowed to send messages".to_string());
        }
        let text = req.text.trim();
        if text.is_empty() {
            return fail("empty message".to_string());
        }
        let target = req.target_username.trim();
        if target.is_empty() {
            return fail("missing target username".to_string());
        }

        let recipient_id = match self.db.users().id_of(target).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => return fail(format!("no such user: {target}")),
            Err(e) => {
                warn!(error = %e, "recipient lookup failed");
                return fail("persistence unavailable".to_string());
            }
        };
        let sender_id = self.db.users().id_of(&session.username).await.ok().flatten();

        let message_id = match self
            .db
            .messages()
            .save(SaveMessageParams {
                sender_id,
                sender_name: &session.username,
                text,
                permission: session.permission,
                is_system: false,
                is_private: true,
                recipient_id,
                recipient_name: Some(target),
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "private message persist failed");
                -1
            }
        };

        let frame = ChatMessage {
            token: String::new(),
            sender: session.username.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            permission: session.permission.rank(),
            is_system: false,
            is_private: true,
            target_username: target.to_string(),
            message_id,
        };
        let delivered = self.registry.send_to_user(target, &frame);

        Ok(Response::new(PrivateMessageResponse {
            success: true,
            message: if delivered {
                format!("delivered to {target}")
            } else {
                format!("stored; {target} has no active stream")
            },
            message_id,
        }))
    }
}
