use application::{
    ApplicationError, ConnectionId, LocalIdentity, SendMessageRequest, ServerEvent,
};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{DomainError, MessageKind, Room};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{Ack, ClientEvent};
use crate::state::AppState;

/// 单个 WebSocket 连接的会话处理器。
///
/// 状态机：升级前完成认证（失败的连接到不了这里），连接期间
/// 按到达顺序处理该连接的事件，可加入零或多个会话房间，断开后
/// 退出全部房间并注销。单个事件的失败只通过应答上报，从不拆连接。
pub struct SessionConnection {
    state: AppState,
    identity: LocalIdentity,
    connection_id: ConnectionId,
}

/// WebSocket 写操作命令，统一经由发送任务落到 socket 上。
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}

impl SessionConnection {
    pub fn new(state: AppState, identity: LocalIdentity) -> Self {
        Self {
            state,
            identity,
            connection_id: ConnectionId::generate(),
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let (mut sender, mut incoming) = socket.split();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        self.state
            .router
            .register(self.connection_id, event_tx)
            .await;
        self.state
            .router
            .join(self.connection_id, Room::User(self.identity.local_id))
            .await;

        tracing::info!(
            user_id = %self.identity.local_id,
            connection_id = %self.connection_id,
            "WebSocket 连接已建立"
        );

        // 连接建立即下发解析后的本地身份
        let me = serde_json::json!({ "event": "me", "data": &self.identity });
        let _ = cmd_tx.send(WsCommand::SendText(me.to_string())).await;

        // 发送任务：应答与房间广播统一写出；路由器的单连接通道
        // 保证广播按发布顺序送达
        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        let Some(command) = command else { break };
                        let message = match command {
                            WsCommand::SendText(text) => WsMessage::Text(text.into()),
                            WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                        };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        match serde_json::to_string(&event) {
                            Ok(payload) => {
                                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize websocket payload");
                            }
                        }
                    }
                }
            }
        });

        // 接收循环留在当前任务：同一连接的事件严格按序处理
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                WsMessage::Text(text) => self.handle_text(text.as_str(), &cmd_tx).await,
                WsMessage::Ping(data) => {
                    let _ = cmd_tx.send(WsCommand::SendPong(data.to_vec())).await;
                }
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) | WsMessage::Pong(_) => {}
            }
        }

        self.state.router.leave_all(self.connection_id).await;
        self.state.router.unregister(self.connection_id).await;
        send_task.abort();

        tracing::info!(
            user_id = %self.identity.local_id,
            connection_id = %self.connection_id,
            "WebSocket 连接已断开，房间订阅已清理"
        );
    }

    async fn handle_text(&self, text: &str, cmd_tx: &mpsc::Sender<WsCommand>) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "malformed websocket frame");
                return;
            }
        };
        let seq = value.get("seq").and_then(serde_json::Value::as_u64);

        let event: ClientEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "unparseable client event");
                self.ack(cmd_tx, seq, Ack::error("invalid payload")).await;
                return;
            }
        };

        match event {
            ClientEvent::JoinConversation { conversation_id } => {
                match self
                    .state
                    .chat_service
                    .join_conversation(conversation_id, self.identity.local_id)
                    .await
                {
                    Ok(conversation) => {
                        self.state
                            .router
                            .join(self.connection_id, Room::Conversation(conversation.id))
                            .await;
                        self.ack(cmd_tx, seq, Ack::ok()).await;
                    }
                    Err(err) => self.ack_error(cmd_tx, seq, err).await,
                }
            }
            ClientEvent::SendMessage {
                conversation_id,
                text,
                kind,
                media_url,
            } => {
                let request = SendMessageRequest {
                    conversation_id,
                    sender_id: self.identity.local_id,
                    kind: kind.unwrap_or(MessageKind::Text),
                    text,
                    media_url,
                };
                match self.state.chat_service.send_message(request).await {
                    Ok(message) => self.ack(cmd_tx, seq, Ack::with_message(message)).await,
                    Err(err) => self.ack_error(cmd_tx, seq, err).await,
                }
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.state
                    .chat_service
                    .typing(
                        conversation_id,
                        self.identity.local_id,
                        self.connection_id,
                        true,
                    )
                    .await;
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.state
                    .chat_service
                    .typing(
                        conversation_id,
                        self.identity.local_id,
                        self.connection_id,
                        false,
                    )
                    .await;
            }
            ClientEvent::MessageRead {
                conversation_id,
                message_id,
            } => {
                match self
                    .state
                    .chat_service
                    .message_read(conversation_id, message_id, self.identity.local_id)
                    .await
                {
                    Ok(()) => self.ack(cmd_tx, seq, Ack::ok()).await,
                    Err(err) => self.ack_error(cmd_tx, seq, err).await,
                }
            }
        }
    }

    async fn ack(&self, cmd_tx: &mpsc::Sender<WsCommand>, seq: Option<u64>, ack: Ack) {
        let Some(seq) = seq else { return };
        let frame = serde_json::json!({ "event": "ack", "seq": seq, "data": ack });
        let _ = cmd_tx.send(WsCommand::SendText(frame.to_string())).await;
    }

    async fn ack_error(
        &self,
        cmd_tx: &mpsc::Sender<WsCommand>,
        seq: Option<u64>,
        error: ApplicationError,
    ) {
        self.ack(cmd_tx, seq, Ack::error(client_error(&error))).await;
    }
}

/// 应答里只透出对客户端安全的错误文案。
fn client_error(error: &ApplicationError) -> String {
    match error {
        ApplicationError::Domain(DomainError::ConversationNotFound) => {
            "conversation not found".to_string()
        }
        ApplicationError::Domain(DomainError::MessageNotFound) => "message not found".to_string(),
        ApplicationError::Domain(DomainError::NotParticipant) => "not a participant".to_string(),
        ApplicationError::Domain(DomainError::InvalidArgument { field, reason }) => {
            format!("{field}: {reason}")
        }
        ApplicationError::Authentication => "authentication failed".to_string(),
        other => {
            tracing::error!(error = %other, "websocket event failed");
            "internal error".to_string()
        }
    }
}
