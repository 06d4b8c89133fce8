use std::fmt;

use async_trait::async_trait;
use domain::{Conversation, ConversationId, Message, MessageId, Room, Timestamp, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 连接句柄标识，生命周期与单个持久连接绑定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 会话列表视图用的最新消息摘要。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagePreview {
    pub text: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

/// 服务端推送事件，serde 序列化结果即为线上帧格式。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "conversation:new")]
    ConversationNew(Conversation),
    #[serde(rename = "conversation:update", rename_all = "camelCase")]
    ConversationUpdate {
        conversation_id: ConversationId,
        last_message: LastMessagePreview,
    },
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
        user_id: UserId,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: Timestamp,
    },
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 房间路由抽象：进程内实现见 [`crate::local_broadcast::LocalRoomRouter`]；
/// 多实例部署时可以换成共享 pub/sub 的实现，会话处理器不感知差异。
///
/// 投递是尽力而为且不阻塞的：慢消费者或已断开的连接不会拖住
/// 发送方，也不会影响同房间其他接收者。
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    async fn register(&self, connection: ConnectionId, sender: UnboundedSender<ServerEvent>);
    async fn unregister(&self, connection: ConnectionId);
    /// 幂等：重复加入同一房间是无操作。
    async fn join(&self, connection: ConnectionId, room: Room);
    async fn leave(&self, connection: ConnectionId, room: Room);
    /// 断开连接时调用，清理该连接的全部房间订阅。
    async fn leave_all(&self, connection: ConnectionId);
    async fn broadcast(
        &self,
        room: Room,
        event: ServerEvent,
        excluding: Option<ConnectionId>,
    ) -> Result<(), BroadcastError>;
}
