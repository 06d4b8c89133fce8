//! WebSocket 事件协议。
//!
//! 入站帧：`{"event": <名称>, "data": {...}, "seq": <n>?}`；
//! 带 `seq` 的请求会收到 `{"event":"ack","seq":n,"data":{...}}` 应答。
//! 出站推送事件的形状见 [`application::ServerEvent`]。

use domain::{Message, MessageKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 客户端入站事件。
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_conversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: Uuid },
    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        conversation_id: Uuid,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        kind: Option<MessageKind>,
        #[serde(default)]
        media_url: Option<String>,
    },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { conversation_id: Uuid },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { conversation_id: Uuid },
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: Uuid,
        message_id: Uuid,
    },
}

/// 应答载荷。
#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            message: None,
        }
    }

    pub fn with_message(message: Message) -> Self {
        Self {
            ok: true,
            error: None,
            message: Some(message),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            message: None,
        }
    }
}
